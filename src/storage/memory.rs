//! In-memory catalog store, used by tests and dry runs.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage::{Catalog, CatalogStore, TermLocks, TermTransaction};

#[derive(Default)]
pub struct MemoryStore {
    catalog: Mutex<Catalog>,
    locks: TermLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing catalog.
    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            catalog: Mutex::new(catalog),
            locks: TermLocks::default(),
        }
    }

    fn current(&self) -> Catalog {
        self.catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn begin_term_transaction(
        &self,
        term_code: &str,
    ) -> Result<TermTransaction, StorageError> {
        let lock = self.locks.acquire(term_code).await;
        Ok(TermTransaction::new(term_code, self.current(), lock))
    }

    async fn commit(&self, tx: TermTransaction) -> Result<(), StorageError> {
        let mut catalog = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        let next = tx.apply_to(&catalog)?;
        *catalog = next;
        log::debug!(
            "Committed {} writes for term {}",
            tx.pending_writes(),
            tx.term_code()
        );
        Ok(())
    }

    async fn snapshot(&self) -> Result<Catalog, StorageError> {
        Ok(self.current())
    }
}
