//! In-memory catalog: typed entity maps plus a natural-key index.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::models::{
    Class, ClassKey, Course, Entity, EntityId, EntityKind, Instructor, Meeting, MeetingKey,
    NaturalKey, Subject, Term,
};
use crate::storage::{CatalogLookup, CatalogWriter};

/// Serialized form of the catalog (`catalog.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub terms: BTreeMap<EntityId, Term>,
    #[serde(default)]
    pub subjects: BTreeMap<EntityId, Subject>,
    #[serde(default)]
    pub courses: BTreeMap<EntityId, Course>,
    #[serde(default)]
    pub classes: BTreeMap<EntityId, Class>,
    #[serde(default)]
    pub meetings: BTreeMap<EntityId, Meeting>,
    #[serde(default)]
    pub instructors: BTreeMap<EntityId, Instructor>,
}

/// Active/retired totals for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindCount {
    pub kind: EntityKind,
    pub active: usize,
    pub retired: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    data: CatalogData,
    index: HashMap<NaturalKey, BTreeSet<EntityId>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from its serialized form, rebuilding the index.
    pub fn from_data(data: CatalogData) -> Self {
        let mut catalog = Self {
            data,
            index: HashMap::new(),
        };
        let entities: Vec<Entity> = catalog.entities().collect();
        for entity in &entities {
            catalog.index_entity(entity);
        }
        catalog
    }

    pub fn data(&self) -> &CatalogData {
        &self.data
    }

    pub fn into_data(self) -> CatalogData {
        self.data
    }

    /// Every entity, parents before children.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        let d = &self.data;
        d.terms
            .values()
            .cloned()
            .map(Entity::from)
            .chain(d.subjects.values().cloned().map(Entity::from))
            .chain(d.courses.values().cloned().map(Entity::from))
            .chain(d.classes.values().cloned().map(Entity::from))
            .chain(d.instructors.values().cloned().map(Entity::from))
            .chain(d.meetings.values().cloned().map(Entity::from))
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        let d = &self.data;
        match kind {
            EntityKind::Term => d.terms.len(),
            EntityKind::Subject => d.subjects.len(),
            EntityKind::Course => d.courses.len(),
            EntityKind::Class => d.classes.len(),
            EntityKind::Meeting => d.meetings.len(),
            EntityKind::Instructor => d.instructors.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|k| self.len(*k) == 0)
    }

    /// Active and retired totals per entity type.
    pub fn counts(&self) -> Vec<KindCount> {
        let d = &self.data;
        EntityKind::ALL
            .iter()
            .map(|&kind| {
                let retired = match kind {
                    EntityKind::Class => d.classes.values().filter(|c| !c.active).count(),
                    EntityKind::Meeting => d.meetings.values().filter(|m| !m.active).count(),
                    _ => 0,
                };
                KindCount {
                    kind,
                    active: self.len(kind) - retired,
                    retired,
                }
            })
            .collect()
    }

    pub fn term(&self, id: &EntityId) -> Option<&Term> {
        self.data.terms.get(id)
    }

    pub fn class(&self, id: &EntityId) -> Option<&Class> {
        self.data.classes.get(id)
    }

    pub fn meeting(&self, id: &EntityId) -> Option<&Meeting> {
        self.data.meetings.get(id)
    }

    pub fn instructor(&self, id: &EntityId) -> Option<&Instructor> {
        self.data.instructors.get(id)
    }

    /// Mark every active class of the term whose key is not in `seen` as
    /// retired. Returns the retired classes.
    pub fn retire_classes(
        &mut self,
        term_code: &str,
        seen: &HashSet<ClassKey>,
    ) -> Result<Vec<Entity>, StorageError> {
        let term_id = self
            .single_id(&NaturalKey::Term(term_code.to_string()))
            .ok_or_else(|| StorageError::UnknownTerm(term_code.to_string()))?;

        let mut retired = Vec::new();
        for class in self.data.classes.values_mut() {
            if class.term_id == term_id && class.active && !seen.contains(&class.key()) {
                class.active = false;
                retired.push(Entity::Class(class.clone()));
            }
        }
        Ok(retired)
    }

    /// Mark every active meeting of the class whose key is not in `seen` as
    /// retired. Returns the retired meetings.
    pub fn retire_meetings(
        &mut self,
        class_id: &EntityId,
        seen: &HashSet<MeetingKey>,
    ) -> Result<Vec<Entity>, StorageError> {
        if !self.data.classes.contains_key(class_id) {
            return Err(StorageError::dangling("meetings", class_id, "class", class_id));
        }

        let mut retired = Vec::new();
        for meeting in self.data.meetings.values_mut() {
            if &meeting.class_id == class_id && meeting.active && !seen.contains(&meeting.key()) {
                meeting.active = false;
                retired.push(Entity::Meeting(meeting.clone()));
            }
        }
        Ok(retired)
    }

    fn single_id(&self, key: &NaturalKey) -> Option<EntityId> {
        let ids = self.index.get(key)?;
        if ids.len() == 1 {
            ids.iter().next().cloned()
        } else {
            None
        }
    }

    /// Reject writes whose references point outside the catalog.
    fn check_references(&self, entity: &Entity) -> Result<(), StorageError> {
        let d = &self.data;
        match entity {
            Entity::Term(_) | Entity::Subject(_) | Entity::Instructor(_) => Ok(()),
            Entity::Course(c) => require(d.subjects.contains_key(&c.subject_id), || {
                StorageError::dangling("course", &c.id, "subject", &c.subject_id)
            }),
            Entity::Class(c) => {
                require(d.courses.contains_key(&c.course_id), || {
                    StorageError::dangling("class", &c.id, "course", &c.course_id)
                })?;
                require(d.terms.contains_key(&c.term_id), || {
                    StorageError::dangling("class", &c.id, "term", &c.term_id)
                })
            }
            Entity::Meeting(m) => {
                require(d.classes.contains_key(&m.class_id), || {
                    StorageError::dangling("meeting", &m.id, "class", &m.class_id)
                })?;
                for instructor_id in &m.instructor_ids {
                    require(d.instructors.contains_key(instructor_id), || {
                        StorageError::dangling("meeting", &m.id, "instructor", instructor_id)
                    })?;
                }
                Ok(())
            }
        }
    }

    fn index_keys(entity: &Entity) -> Vec<NaturalKey> {
        match entity {
            Entity::Instructor(i) => {
                let mut keys = vec![i.name_key()];
                if i.email.is_some() {
                    keys.push(i.natural_key());
                }
                keys
            }
            other => vec![other.natural_key()],
        }
    }

    fn index_entity(&mut self, entity: &Entity) {
        for key in Self::index_keys(entity) {
            self.index
                .entry(key)
                .or_default()
                .insert(entity.id().clone());
        }
    }

    fn unindex_entity(&mut self, entity: &Entity) {
        for key in Self::index_keys(entity) {
            if let Some(ids) = self.index.get_mut(&key) {
                ids.remove(entity.id());
                if ids.is_empty() {
                    self.index.remove(&key);
                }
            }
        }
    }

    fn insert(&mut self, entity: Entity) -> Option<Entity> {
        let d = &mut self.data;
        match entity {
            Entity::Term(e) => d.terms.insert(e.id.clone(), e).map(Entity::from),
            Entity::Subject(e) => d.subjects.insert(e.id.clone(), e).map(Entity::from),
            Entity::Course(e) => d.courses.insert(e.id.clone(), e).map(Entity::from),
            Entity::Class(e) => d.classes.insert(e.id.clone(), e).map(Entity::from),
            Entity::Meeting(e) => d.meetings.insert(e.id.clone(), e).map(Entity::from),
            Entity::Instructor(e) => d.instructors.insert(e.id.clone(), e).map(Entity::from),
        }
    }
}

fn require(ok: bool, err: impl FnOnce() -> StorageError) -> Result<(), StorageError> {
    if ok { Ok(()) } else { Err(err()) }
}

impl CatalogLookup for Catalog {
    fn find_by_natural_key(&self, key: &NaturalKey) -> Vec<Entity> {
        let Some(ids) = self.index.get(key) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.get(key.kind(), id))
            .collect()
    }

    fn get(&self, kind: EntityKind, id: &EntityId) -> Option<Entity> {
        let d = &self.data;
        match kind {
            EntityKind::Term => d.terms.get(id).cloned().map(Entity::from),
            EntityKind::Subject => d.subjects.get(id).cloned().map(Entity::from),
            EntityKind::Course => d.courses.get(id).cloned().map(Entity::from),
            EntityKind::Class => d.classes.get(id).cloned().map(Entity::from),
            EntityKind::Meeting => d.meetings.get(id).cloned().map(Entity::from),
            EntityKind::Instructor => d.instructors.get(id).cloned().map(Entity::from),
        }
    }

    fn classes_in_term(&self, term_id: &EntityId) -> Vec<Class> {
        self.data
            .classes
            .values()
            .filter(|c| &c.term_id == term_id)
            .cloned()
            .collect()
    }

    fn meetings_of_class(&self, class_id: &EntityId) -> Vec<Meeting> {
        self.data
            .meetings
            .values()
            .filter(|m| &m.class_id == class_id)
            .cloned()
            .collect()
    }
}

impl CatalogWriter for Catalog {
    fn upsert(&mut self, entity: Entity) -> Result<Entity, StorageError> {
        self.check_references(&entity)?;
        if let Some(previous) = self.get(entity.kind(), entity.id()) {
            self.unindex_entity(&previous);
        }
        self.index_entity(&entity);
        self.insert(entity.clone());
        Ok(entity)
    }

    fn retire_classes_not_in(
        &mut self,
        term_code: &str,
        seen: &HashSet<ClassKey>,
    ) -> Result<usize, StorageError> {
        self.retire_classes(term_code, seen).map(|r| r.len())
    }

    fn retire_meetings_not_in(
        &mut self,
        class_id: &EntityId,
        seen: &HashSet<MeetingKey>,
    ) -> Result<usize, StorageError> {
        self.retire_meetings(class_id, seen).map(|r| r.len())
    }
}
