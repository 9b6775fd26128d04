//! Catalog entities, their identities and their merge rules.
//!
//! Entities reference each other by [`EntityId`] only; navigation goes through
//! a [`crate::storage::CatalogLookup`] rather than embedded object graphs.

use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::ClassStatus;

/// Opaque, stable identity of a catalog entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Derive the id a newly created entity gets from its natural key.
    ///
    /// Two writers creating the same entity independently end up with the
    /// same id, so no duplicate can appear.
    pub fn derive(key: &NaturalKey) -> Self {
        let digest = Sha256::digest(key.canonical().as_bytes());
        Self(hex::encode(&digest[..8]))
    }

    /// Id for the `n`th entity whose derived id was already taken (an
    /// instructor renamed onto another's name key).
    pub fn derive_nth(key: &NaturalKey, n: usize) -> Self {
        let digest = Sha256::digest(format!("{}#{n}", key.canonical()).as_bytes());
        Self(hex::encode(&digest[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The six catalog entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Term,
    Subject,
    Course,
    Class,
    Meeting,
    Instructor,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        Self::Term,
        Self::Subject,
        Self::Course,
        Self::Class,
        Self::Meeting,
        Self::Instructor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Term => "term",
            Self::Subject => "subject",
            Self::Course => "course",
            Self::Class => "class",
            Self::Meeting => "meeting",
            Self::Instructor => "instructor",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of a Class: (CourseId, TermId, CRN).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassKey {
    pub course_id: EntityId,
    pub term_id: EntityId,
    pub crn: String,
}

/// Natural key of a Meeting: (ClassId, day pattern, start time, room).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeetingKey {
    pub class_id: EntityId,
    pub days: String,
    pub start_time: Option<NaiveTime>,
    pub room: String,
}

/// Natural key lookups understood by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NaturalKey {
    Term(String),
    Subject(String),
    Course { subject_id: EntityId, number: String },
    Class(ClassKey),
    Meeting(MeetingKey),
    /// Lower-cased e-mail address
    InstructorEmail(String),
    /// Output of [`normalize_name`]; may match several instructors
    InstructorName(String),
}

impl NaturalKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Term(_) => EntityKind::Term,
            Self::Subject(_) => EntityKind::Subject,
            Self::Course { .. } => EntityKind::Course,
            Self::Class(_) => EntityKind::Class,
            Self::Meeting(_) => EntityKind::Meeting,
            Self::InstructorEmail(_) | Self::InstructorName(_) => EntityKind::Instructor,
        }
    }

    /// Stable textual form, used for id derivation and reporting.
    pub fn canonical(&self) -> String {
        match self {
            Self::Term(code) => format!("term:{code}"),
            Self::Subject(code) => format!("subject:{code}"),
            Self::Course { subject_id, number } => format!("course:{subject_id}:{number}"),
            Self::Class(k) => format!("class:{}:{}:{}", k.course_id, k.term_id, k.crn),
            Self::Meeting(k) => format!(
                "meeting:{}:{}:{}:{}",
                k.class_id,
                k.days,
                k.start_time
                    .map(|t| t.format("%H:%M").to_string())
                    .unwrap_or_else(|| "TBA".into()),
                k.room
            ),
            Self::InstructorEmail(email) => format!("instructor:email:{email}"),
            Self::InstructorName(name) => format!("instructor:name:{name}"),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Lower-case and collapse whitespace so cosmetic differences in the source
/// do not split one instructor into two.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.trim_matches(|c: char| c == '.' || c == ','))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Keep the previous value when the fresh scrape does not carry one.
fn merge_opt<T: Clone>(previous: &Option<T>, fresh: &Option<T>) -> Option<T> {
    fresh.clone().or_else(|| previous.clone())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub id: EntityId,
    pub code: String,
    pub name: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Term {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::Term(self.code.clone())
    }

    pub fn merge(&self, fresh: &Term) -> Term {
        Term {
            id: self.id.clone(),
            code: self.code.clone(),
            name: merge_opt(&self.name, &fresh.name),
            start_date: merge_opt(&self.start_date, &fresh.start_date),
            end_date: merge_opt(&self.end_date, &fresh.end_date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: EntityId,
    pub code: String,
    pub name: Option<String>,
}

impl Subject {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::Subject(self.code.clone())
    }

    pub fn merge(&self, fresh: &Subject) -> Subject {
        Subject {
            id: self.id.clone(),
            code: self.code.clone(),
            name: merge_opt(&self.name, &fresh.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: EntityId,
    pub subject_id: EntityId,
    /// Subject-scoped course number such as "10100"
    pub number: String,
    pub title: String,
    pub credit_hours: Option<f64>,
    pub description: Option<String>,
}

impl Course {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::Course {
            subject_id: self.subject_id.clone(),
            number: self.number.clone(),
        }
    }

    pub fn merge(&self, fresh: &Course) -> Course {
        Course {
            id: self.id.clone(),
            subject_id: self.subject_id.clone(),
            number: self.number.clone(),
            title: fresh.title.clone(),
            credit_hours: merge_opt(&self.credit_hours, &fresh.credit_hours),
            description: merge_opt(&self.description, &fresh.description),
        }
    }
}

/// One offering of a Course in one Term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub id: EntityId,
    pub course_id: EntityId,
    pub term_id: EntityId,
    pub crn: String,
    pub class_type: Option<String>,
    pub capacity: Option<u32>,
    pub status: ClassStatus,
    /// False once a complete scrape of the term stopped listing it
    pub active: bool,
}

impl Class {
    pub fn key(&self) -> ClassKey {
        ClassKey {
            course_id: self.course_id.clone(),
            term_id: self.term_id.clone(),
            crn: self.crn.clone(),
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::Class(self.key())
    }

    pub fn merge(&self, fresh: &Class) -> Class {
        Class {
            id: self.id.clone(),
            course_id: self.course_id.clone(),
            term_id: self.term_id.clone(),
            crn: self.crn.clone(),
            class_type: merge_opt(&self.class_type, &fresh.class_type),
            capacity: merge_opt(&self.capacity, &fresh.capacity),
            status: fresh.status,
            active: fresh.active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: EntityId,
    pub class_id: EntityId,
    pub days: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    /// Building and room
    pub room: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub instructor_ids: Vec<EntityId>,
    pub active: bool,
}

impl Meeting {
    pub fn key(&self) -> MeetingKey {
        MeetingKey {
            class_id: self.class_id.clone(),
            days: self.days.clone(),
            start_time: self.start_time,
            room: self.room.clone(),
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::Meeting(self.key())
    }

    /// An empty fresh instructor list means "not reported", not "nobody".
    pub fn merge(&self, fresh: &Meeting) -> Meeting {
        let instructor_ids = if fresh.instructor_ids.is_empty() {
            self.instructor_ids.clone()
        } else {
            fresh.instructor_ids.clone()
        };
        Meeting {
            id: self.id.clone(),
            class_id: self.class_id.clone(),
            days: self.days.clone(),
            start_time: self.start_time,
            end_time: merge_opt(&self.end_time, &fresh.end_time),
            room: self.room.clone(),
            start_date: merge_opt(&self.start_date, &fresh.start_date),
            end_date: merge_opt(&self.end_date, &fresh.end_date),
            instructor_ids,
            active: fresh.active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructor {
    pub id: EntityId,
    pub name: String,
    pub email: Option<String>,
}

impl Instructor {
    /// E-mail when known, otherwise the normalized name.
    pub fn natural_key(&self) -> NaturalKey {
        match &self.email {
            Some(email) => NaturalKey::InstructorEmail(email.clone()),
            None => self.name_key(),
        }
    }

    pub fn name_key(&self) -> NaturalKey {
        NaturalKey::InstructorName(normalize_name(&self.name))
    }

    pub fn merge(&self, fresh: &Instructor) -> Instructor {
        Instructor {
            id: self.id.clone(),
            name: fresh.name.clone(),
            email: merge_opt(&self.email, &fresh.email),
        }
    }
}

/// Any catalog entity, for the store's generic upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Term(Term),
    Subject(Subject),
    Course(Course),
    Class(Class),
    Meeting(Meeting),
    Instructor(Instructor),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Term(_) => EntityKind::Term,
            Self::Subject(_) => EntityKind::Subject,
            Self::Course(_) => EntityKind::Course,
            Self::Class(_) => EntityKind::Class,
            Self::Meeting(_) => EntityKind::Meeting,
            Self::Instructor(_) => EntityKind::Instructor,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Self::Term(e) => &e.id,
            Self::Subject(e) => &e.id,
            Self::Course(e) => &e.id,
            Self::Class(e) => &e.id,
            Self::Meeting(e) => &e.id,
            Self::Instructor(e) => &e.id,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        match self {
            Self::Term(e) => e.natural_key(),
            Self::Subject(e) => e.natural_key(),
            Self::Course(e) => e.natural_key(),
            Self::Class(e) => e.natural_key(),
            Self::Meeting(e) => e.natural_key(),
            Self::Instructor(e) => e.natural_key(),
        }
    }
}

macro_rules! entity_from {
    ($($variant:ident),*) => {
        $(impl From<$variant> for Entity {
            fn from(e: $variant) -> Self {
                Entity::$variant(e)
            }
        })*
    };
}

entity_from!(Term, Subject, Course, Class, Meeting, Instructor);
