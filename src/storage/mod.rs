//! Catalog persistence.
//!
//! The reconciler reads and writes through [`CatalogLookup`] and
//! [`CatalogWriter`]. Writes for one term go into a [`TermTransaction`]: a
//! private working copy plus a journal of the entities it touched. Committing
//! replays the journal onto the shared catalog in one step; rolling back
//! drops it. A per-term lock serializes transactions on the same term, while
//! different terms proceed independently.
//!
//! ## Storage Layout
//!
//! ```text
//! {storage.dir}/
//! ├── config.toml           # Crawler configuration
//! ├── catalog.json          # Every entity, keyed by id
//! └── report.json           # Report of the most recent job
//! ```

pub mod catalog;
pub mod local;
pub mod memory;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::error::StorageError;
use crate::models::{Class, ClassKey, Entity, EntityId, EntityKind, Meeting, MeetingKey, NaturalKey};

pub use catalog::{Catalog, CatalogData, KindCount};
pub use local::LocalStore;
pub use memory::MemoryStore;

/// Read access to the catalog.
pub trait CatalogLookup {
    /// Every entity indexed under `key`. More than one result means the key is
    /// ambiguous (same-name instructors).
    fn find_by_natural_key(&self, key: &NaturalKey) -> Vec<Entity>;

    fn get(&self, kind: EntityKind, id: &EntityId) -> Option<Entity>;

    fn classes_in_term(&self, term_id: &EntityId) -> Vec<Class>;

    fn meetings_of_class(&self, class_id: &EntityId) -> Vec<Meeting>;
}

/// Write access to the catalog.
pub trait CatalogWriter: CatalogLookup {
    /// Insert or replace an entity by id. Fails when it references an entity
    /// the catalog does not hold.
    fn upsert(&mut self, entity: Entity) -> Result<Entity, StorageError>;

    /// Retire every active class of the term that is not in `seen`.
    fn retire_classes_not_in(
        &mut self,
        term_code: &str,
        seen: &HashSet<ClassKey>,
    ) -> Result<usize, StorageError>;

    /// Retire every active meeting of the class that is not in `seen`.
    fn retire_meetings_not_in(
        &mut self,
        class_id: &EntityId,
        seen: &HashSet<MeetingKey>,
    ) -> Result<usize, StorageError>;
}

/// Pending writes for one term.
///
/// Holds the term's lock until it is committed, rolled back or dropped.
pub struct TermTransaction {
    term_code: String,
    working: Catalog,
    journal: Vec<Entity>,
    _lock: OwnedMutexGuard<()>,
}

impl TermTransaction {
    pub(crate) fn new(term_code: &str, working: Catalog, lock: OwnedMutexGuard<()>) -> Self {
        Self {
            term_code: term_code.to_string(),
            working,
            journal: Vec::new(),
            _lock: lock,
        }
    }

    pub fn term_code(&self) -> &str {
        &self.term_code
    }

    /// Number of entity writes waiting for commit.
    pub fn pending_writes(&self) -> usize {
        self.journal.len()
    }

    /// Apply the journal to `catalog`, all or nothing.
    pub(crate) fn apply_to(&self, catalog: &Catalog) -> Result<Catalog, StorageError> {
        let mut next = catalog.clone();
        for entity in &self.journal {
            next.upsert(entity.clone())?;
        }
        Ok(next)
    }
}

impl CatalogLookup for TermTransaction {
    fn find_by_natural_key(&self, key: &NaturalKey) -> Vec<Entity> {
        self.working.find_by_natural_key(key)
    }

    fn get(&self, kind: EntityKind, id: &EntityId) -> Option<Entity> {
        self.working.get(kind, id)
    }

    fn classes_in_term(&self, term_id: &EntityId) -> Vec<Class> {
        self.working.classes_in_term(term_id)
    }

    fn meetings_of_class(&self, class_id: &EntityId) -> Vec<Meeting> {
        self.working.meetings_of_class(class_id)
    }
}

impl CatalogWriter for TermTransaction {
    fn upsert(&mut self, entity: Entity) -> Result<Entity, StorageError> {
        let entity = self.working.upsert(entity)?;
        self.journal.push(entity.clone());
        Ok(entity)
    }

    fn retire_classes_not_in(
        &mut self,
        term_code: &str,
        seen: &HashSet<ClassKey>,
    ) -> Result<usize, StorageError> {
        if term_code != self.term_code {
            return Err(StorageError::TermMismatch {
                expected: term_code.to_string(),
                actual: self.term_code.clone(),
            });
        }
        let retired = self.working.retire_classes(term_code, seen)?;
        let count = retired.len();
        self.journal.extend(retired);
        Ok(count)
    }

    fn retire_meetings_not_in(
        &mut self,
        class_id: &EntityId,
        seen: &HashSet<MeetingKey>,
    ) -> Result<usize, StorageError> {
        let retired = self.working.retire_meetings(class_id, seen)?;
        let count = retired.len();
        self.journal.extend(retired);
        Ok(count)
    }
}

/// Transactional catalog backend.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Start a transaction for `term_code`, waiting for any other transaction
    /// on the same term to finish.
    async fn begin_term_transaction(
        &self,
        term_code: &str,
    ) -> Result<TermTransaction, StorageError>;

    /// Make every write of the transaction visible at once.
    async fn commit(&self, tx: TermTransaction) -> Result<(), StorageError>;

    /// Discard the transaction's writes.
    async fn rollback(&self, tx: TermTransaction) {
        log::warn!(
            "Rolling back {} pending writes for term {}",
            tx.pending_writes(),
            tx.term_code()
        );
    }

    /// Copy of the committed catalog.
    async fn snapshot(&self) -> Result<Catalog, StorageError>;
}

/// Per-term locks shared by the store implementations.
#[derive(Default)]
pub(crate) struct TermLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TermLocks {
    pub(crate) async fn acquire(&self, term_code: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(term_code.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
