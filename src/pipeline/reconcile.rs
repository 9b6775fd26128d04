//! Reconciler: merges one term's scrape into the catalog.
//!
//! Every scraped record is matched against the catalog by natural key.
//! Unmatched records are created; matched ones are merged (never replaced)
//! and written only when the merge changed something. After a complete scrape
//! the term's classes that were not seen are retired (mark-and-sweep); after
//! an incomplete one nothing is retired.
//!
//! The reconciler only needs a [`CatalogWriter`], so it runs the same against
//! a bare [`crate::storage::Catalog`] as inside a
//! [`crate::storage::TermTransaction`].

use std::collections::{HashMap, HashSet};

use crate::error::StorageError;
use crate::models::{
    ChangeSet, Class, ClassKey, Course, Entity, EntityId, EntityKind, Instructor, Meeting,
    MeetingKey, NaturalKey, ReconciliationAmbiguity, ScrapedInstructor, SectionRecord, Subject,
    Term, TermScrape, normalize_name,
};
use crate::storage::CatalogWriter;

/// Whether the scrape may retire entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// The scrape saw every class of the term
    Full,
    /// Some list page failed; create and update only
    UpdateOnly,
}

impl ReconcileMode {
    pub fn for_scrape(scrape: &TermScrape) -> Self {
        if scrape.complete {
            Self::Full
        } else {
            Self::UpdateOnly
        }
    }
}

/// Reconcile one term's scrape into `store`.
pub fn reconcile<W>(store: &mut W, scrape: &TermScrape) -> Result<ChangeSet, StorageError>
where
    W: CatalogWriter + ?Sized,
{
    let mode = ReconcileMode::for_scrape(scrape);
    let mut reconciler = Reconciler {
        store,
        changes: ChangeSet::default(),
        subjects: HashMap::new(),
    };
    reconciler.run(scrape, mode)?;
    Ok(reconciler.changes)
}

/// Catalog entity types the reconciler can merge generically.
trait Reconcilable: Clone + PartialEq + Into<Entity> {
    const KIND: EntityKind;

    fn from_entity(entity: Entity) -> Option<Self>;

    fn merge(&self, fresh: &Self) -> Self;

    fn id(&self) -> &EntityId;
}

macro_rules! reconcilable {
    ($($ty:ident),*) => {
        $(impl Reconcilable for $ty {
            const KIND: EntityKind = EntityKind::$ty;

            fn from_entity(entity: Entity) -> Option<Self> {
                match entity {
                    Entity::$ty(e) => Some(e),
                    _ => None,
                }
            }

            fn merge(&self, fresh: &Self) -> Self {
                $ty::merge(self, fresh)
            }

            fn id(&self) -> &EntityId {
                &self.id
            }
        })*
    };
}

reconcilable!(Term, Subject, Course, Class, Meeting, Instructor);

struct Reconciler<'a, W: ?Sized> {
    store: &'a mut W,
    changes: ChangeSet,
    /// Subject code → id, for this run
    subjects: HashMap<String, EntityId>,
}

impl<W: CatalogWriter + ?Sized> Reconciler<'_, W> {
    fn run(&mut self, scrape: &TermScrape, mode: ReconcileMode) -> Result<(), StorageError> {
        let code = &scrape.term.code;
        let (start_date, end_date) = scrape.date_span();
        let term_key = NaturalKey::Term(code.clone());
        let term = self.merge_in(
            &term_key,
            Term {
                id: EntityId::derive(&term_key),
                code: code.clone(),
                name: scrape.term.name.clone(),
                start_date,
                end_date,
            },
        )?;

        for subject in &scrape.subjects {
            self.subject(&subject.code, non_empty(&subject.name))?;
        }

        // Arrival order from the crawl is arbitrary.
        let mut sections: Vec<&SectionRecord> = scrape.sections.iter().collect();
        sections.sort_by(|a, b| a.summary.crn.cmp(&b.summary.crn));

        let mut seen = HashSet::new();
        for record in sections {
            let class = self.section(&term, record)?;
            seen.insert(class.key());
        }

        // Listed upstream but without detail: not reconciled, not retired.
        for summary in &scrape.unresolved {
            let Some(subject_id) = self.existing_subject(&summary.subject_code) else {
                continue;
            };
            let course_key = NaturalKey::Course {
                subject_id,
                number: summary.course_number.clone(),
            };
            if let Some(course) = self.existing::<Course>(&course_key) {
                seen.insert(ClassKey {
                    course_id: course.id,
                    term_id: term.id.clone(),
                    crn: summary.crn.clone(),
                });
            }
        }

        match mode {
            ReconcileMode::Full => self.retire_unseen(&term, &seen)?,
            ReconcileMode::UpdateOnly => log::info!(
                "Term {} scrape is incomplete; retirement suppressed",
                code
            ),
        }

        log::info!(
            "Term {}: created [{}], updated [{}], retired [{}]",
            code,
            self.changes.created,
            self.changes.updated,
            self.changes.retired
        );
        Ok(())
    }

    /// Course, class and meetings of one section.
    fn section(&mut self, term: &Term, record: &SectionRecord) -> Result<Class, StorageError> {
        let summary = &record.summary;
        let subject_id = self.subject(&summary.subject_code, None)?;

        let course_key = NaturalKey::Course {
            subject_id: subject_id.clone(),
            number: summary.course_number.clone(),
        };
        let course = self.merge_in(
            &course_key,
            Course {
                id: EntityId::derive(&course_key),
                subject_id,
                number: summary.course_number.clone(),
                title: summary.title.clone(),
                credit_hours: summary.credit_hours,
                description: record.detail.description.clone(),
            },
        )?;

        let class_key = ClassKey {
            course_id: course.id.clone(),
            term_id: term.id.clone(),
            crn: summary.crn.clone(),
        };
        let class_natural = NaturalKey::Class(class_key);
        let class = self.merge_in(
            &class_natural,
            Class {
                id: EntityId::derive(&class_natural),
                course_id: course.id,
                term_id: term.id.clone(),
                crn: summary.crn.clone(),
                class_type: summary.class_type.clone(),
                capacity: summary.capacity,
                status: summary.status,
                active: true,
            },
        )?;

        let context = format!("{}/{}", term.code, summary.crn);
        let mut meetings: Vec<Meeting> = Vec::new();
        for scraped in &record.detail.meetings {
            let mut instructor_ids: Vec<EntityId> = Vec::new();
            for instructor in &scraped.instructors {
                if let Some(id) = self.instructor(instructor, &context)? {
                    if !instructor_ids.contains(&id) {
                        instructor_ids.push(id);
                    }
                }
            }

            let meeting_natural = NaturalKey::Meeting(MeetingKey {
                class_id: class.id.clone(),
                days: scraped.days.clone(),
                start_time: scraped.start_time,
                room: scraped.location.clone(),
            });
            let row = Meeting {
                id: EntityId::derive(&meeting_natural),
                class_id: class.id.clone(),
                days: scraped.days.clone(),
                start_time: scraped.start_time,
                end_time: scraped.end_time,
                room: scraped.location.clone(),
                start_date: scraped.start_date,
                end_date: scraped.end_date,
                instructor_ids,
                active: true,
            };
            // Rows sharing a key (split date ranges, per-half instructors)
            // are one meeting.
            match meetings.iter_mut().find(|m| m.key() == row.key()) {
                Some(meeting) => fold_meeting_row(meeting, row),
                None => meetings.push(row),
            }
        }

        let mut seen_meetings = HashSet::new();
        for meeting in meetings {
            seen_meetings.insert(meeting.key());
            self.merge_in(&meeting.natural_key(), meeting)?;
        }

        // The detail page lists every meeting of the class.
        let retired = self
            .store
            .retire_meetings_not_in(&class.id, &seen_meetings)?;
        self.changes.retired.add(EntityKind::Meeting, retired);

        Ok(class)
    }

    /// Match an instructor by e-mail, then by name. Returns `None` when the
    /// name is ambiguous.
    fn instructor(
        &mut self,
        scraped: &ScrapedInstructor,
        context: &str,
    ) -> Result<Option<EntityId>, StorageError> {
        let name_key = NaturalKey::InstructorName(normalize_name(&scraped.name));

        let Some(email) = &scraped.email else {
            let candidates = self.candidates(&name_key);
            return match candidates.as_slice() {
                [] => self.create_instructor(&name_key, scraped).map(Some),
                [single] => {
                    let fresh = Instructor {
                        id: single.id.clone(),
                        name: scraped.name.clone(),
                        email: None,
                    };
                    self.update(single.clone(), fresh).map(|i| Some(i.id))
                }
                several => {
                    self.ambiguous(&name_key, several, context);
                    Ok(None)
                }
            };
        };

        let email_key = NaturalKey::InstructorEmail(email.clone());
        let fresh = Instructor {
            id: EntityId::derive(&email_key),
            name: scraped.name.clone(),
            email: Some(email.clone()),
        };
        if self.existing::<Instructor>(&email_key).is_some() {
            return self.merge_in(&email_key, fresh).map(|i| Some(i.id));
        }

        // Known so far only by name: adopt it and record the e-mail.
        let nameless: Vec<Instructor> = self
            .candidates(&name_key)
            .into_iter()
            .filter(|i| i.email.is_none())
            .collect();
        match nameless.as_slice() {
            [single] => {
                let fresh = Instructor {
                    id: single.id.clone(),
                    ..fresh
                };
                self.update(single.clone(), fresh).map(|i| Some(i.id))
            }
            several => {
                if several.len() > 1 {
                    self.ambiguous(&name_key, several, context);
                }
                self.create_instructor(&email_key, scraped).map(Some)
            }
        }
    }

    fn create_instructor(
        &mut self,
        key: &NaturalKey,
        scraped: &ScrapedInstructor,
    ) -> Result<EntityId, StorageError> {
        let mut id = EntityId::derive(key);
        let mut n = 0;
        while self.store.get(EntityKind::Instructor, &id).is_some() {
            n += 1;
            id = EntityId::derive_nth(key, n);
        }
        let instructor = Instructor {
            id,
            name: scraped.name.clone(),
            email: scraped.email.clone(),
        };
        self.create(instructor).map(|i| i.id)
    }

    fn candidates(&self, key: &NaturalKey) -> Vec<Instructor> {
        self.store
            .find_by_natural_key(key)
            .into_iter()
            .filter_map(Instructor::from_entity)
            .collect()
    }

    fn ambiguous(&mut self, key: &NaturalKey, candidates: &[Instructor], context: &str) {
        let ambiguity = ReconciliationAmbiguity {
            kind: EntityKind::Instructor,
            key: key.canonical(),
            candidates: candidates.iter().map(|i| i.id.to_string()).collect(),
            context: context.to_string(),
        };
        log::warn!("Ambiguous match: {}", ambiguity);
        self.changes.ambiguities.push(ambiguity);
    }

    /// Retire the term's classes (and their meetings) the scrape did not see.
    fn retire_unseen(&mut self, term: &Term, seen: &HashSet<ClassKey>) -> Result<(), StorageError> {
        let doomed: Vec<Class> = self
            .store
            .classes_in_term(&term.id)
            .into_iter()
            .filter(|c| c.active && !seen.contains(&c.key()))
            .collect();

        let retired = self.store.retire_classes_not_in(&term.code, seen)?;
        self.changes.retired.add(EntityKind::Class, retired);

        let nothing = HashSet::new();
        for class in &doomed {
            let meetings = self.store.retire_meetings_not_in(&class.id, &nothing)?;
            self.changes.retired.add(EntityKind::Meeting, meetings);
        }
        Ok(())
    }

    /// Subject id for `code`, creating the subject on first sight.
    fn subject(&mut self, code: &str, name: Option<String>) -> Result<EntityId, StorageError> {
        if name.is_none() {
            if let Some(id) = self.subjects.get(code) {
                return Ok(id.clone());
            }
        }
        let key = NaturalKey::Subject(code.to_string());
        let subject = self.merge_in(
            &key,
            Subject {
                id: EntityId::derive(&key),
                code: code.to_string(),
                name,
            },
        )?;
        self.subjects.insert(code.to_string(), subject.id.clone());
        Ok(subject.id)
    }

    fn existing_subject(&self, code: &str) -> Option<EntityId> {
        if let Some(id) = self.subjects.get(code) {
            return Some(id.clone());
        }
        self.existing::<Subject>(&NaturalKey::Subject(code.to_string()))
            .map(|s| s.id)
    }

    fn existing<T: Reconcilable>(&self, key: &NaturalKey) -> Option<T> {
        self.store
            .find_by_natural_key(key)
            .into_iter()
            .find_map(T::from_entity)
    }

    /// Create `fresh` or merge it into the entity already holding `key`.
    fn merge_in<T: Reconcilable>(&mut self, key: &NaturalKey, fresh: T) -> Result<T, StorageError> {
        match self.existing::<T>(key) {
            Some(previous) => self.update(previous, fresh),
            None => self.create(fresh),
        }
    }

    fn create<T: Reconcilable>(&mut self, fresh: T) -> Result<T, StorageError> {
        self.store.upsert(fresh.clone().into())?;
        self.changes.created.bump(T::KIND);
        Ok(fresh)
    }

    fn update<T: Reconcilable>(&mut self, previous: T, fresh: T) -> Result<T, StorageError> {
        let merged = previous.merge(&fresh);
        if merged != previous {
            log::debug!("Updating {} {}", T::KIND, merged.id());
            self.store.upsert(merged.clone().into())?;
            self.changes.updated.bump(T::KIND);
        }
        Ok(merged)
    }
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Fold another row of the same meeting into `meeting`.
fn fold_meeting_row(meeting: &mut Meeting, row: Meeting) {
    meeting.start_date = match (meeting.start_date, row.start_date) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    meeting.end_date = match (meeting.end_date, row.end_date) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    meeting.end_time = meeting.end_time.or(row.end_time);
    for id in row.instructor_ids {
        if !meeting.instructor_ids.contains(&id) {
            meeting.instructor_ids.push(id);
        }
    }
}
