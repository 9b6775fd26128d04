//! Change-set and job report structures.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, StorageError};
use crate::models::EntityKind;

/// Per-entity-type counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeCounts(BTreeMap<EntityKind, usize>);

impl ChangeCounts {
    pub fn add(&mut self, kind: EntityKind, n: usize) {
        if n > 0 {
            *self.0.entry(kind).or_insert(0) += n;
        }
    }

    pub fn bump(&mut self, kind: EntityKind) {
        self.add(kind, 1);
    }

    pub fn get(&self, kind: EntityKind) -> usize {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for ChangeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let parts: Vec<String> = self.0.iter().map(|(k, n)| format!("{n} {k}")).collect();
        f.write_str(&parts.join(", "))
    }
}

/// A scraped record that matched several catalog entities (or none where
/// exactly one was required). Reported, never silently resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationAmbiguity {
    pub kind: EntityKind,
    /// Natural key that was looked up
    pub key: String,
    /// Ids of every candidate the key matched
    pub candidates: Vec<String>,
    /// Where the record was seen (e.g. the CRN)
    pub context: String,
}

impl fmt::Display for ReconciliationAmbiguity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} matched {} candidates ({}) in {}",
            self.kind,
            self.key,
            self.candidates.len(),
            self.candidates.join(", "),
            self.context
        )
    }
}

/// Output of reconciling one term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub created: ChangeCounts,
    pub updated: ChangeCounts,
    pub retired: ChangeCounts,
    pub ambiguities: Vec<ReconciliationAmbiguity>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.created.is_empty() || !self.updated.is_empty() || !self.retired.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.created.total() + self.updated.total() + self.retired.total()
    }
}

/// Where in the crawl a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    TermList,
    SubjectList,
    SectionList,
    SectionDetail,
    Reconcile,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    Parse,
    /// A requested term is not on the source's term list
    NotListed,
    Ambiguity,
    Storage,
    Cancelled,
}

/// One recorded failure with enough context to retry or alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub stage: FailureStage,
    /// Term, subject or CRN the failure is scoped to
    pub key: String,
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(
        stage: FailureStage,
        key: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            key: key.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn from_fetch(stage: FailureStage, key: impl Into<String>, error: &FetchError) -> Self {
        let kind = match error {
            FetchError::Connection(_) => FailureKind::Connection,
            FetchError::Parse(_) => FailureKind::Parse,
            FetchError::Cancelled => FailureKind::Cancelled,
        };
        Self::new(stage, key, kind, error.to_string())
    }

    pub fn from_storage(key: impl Into<String>, error: &StorageError) -> Self {
        Self::new(
            FailureStage::Storage,
            key,
            FailureKind::Storage,
            error.to_string(),
        )
    }

    pub fn from_ambiguity(ambiguity: &ReconciliationAmbiguity) -> Self {
        Self::new(
            FailureStage::Reconcile,
            ambiguity.context.clone(),
            FailureKind::Ambiguity,
            ambiguity.to_string(),
        )
    }
}

/// Outcome of one term, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermStatus {
    Completed,
    /// Reconciled, but some pages failed or retirement was suppressed
    Partial,
    /// The job was cancelled before this term's crawl finished
    Cancelled,
    Failed,
}

impl fmt::Display for TermStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermReport {
    pub term_code: String,
    pub status: TermStatus,
    pub created: ChangeCounts,
    pub updated: ChangeCounts,
    pub retired: ChangeCounts,
    pub ambiguities: Vec<ReconciliationAmbiguity>,
    pub failures: Vec<Failure>,
}

impl TermReport {
    /// A term that produced no change set.
    pub fn without_changes(
        term_code: impl Into<String>,
        status: TermStatus,
        failures: Vec<Failure>,
    ) -> Self {
        Self {
            term_code: term_code.into(),
            status,
            created: ChangeCounts::default(),
            updated: ChangeCounts::default(),
            retired: ChangeCounts::default(),
            ambiguities: Vec::new(),
            failures,
        }
    }

    pub fn with_changes(
        term_code: impl Into<String>,
        status: TermStatus,
        changes: ChangeSet,
        failures: Vec<Failure>,
    ) -> Self {
        Self {
            term_code: term_code.into(),
            status,
            created: changes.created,
            updated: changes.updated,
            retired: changes.retired,
            ambiguities: changes.ambiguities,
            failures,
        }
    }

    pub fn failures_at(&self, stage: FailureStage) -> impl Iterator<Item = &Failure> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }
}

/// Report for a whole crawl job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: TermStatus,
    pub terms: Vec<TermReport>,
    /// Failures not scoped to a single term (e.g. the term list)
    pub failures: Vec<Failure>,
}

impl JobReport {
    /// Worst status among the terms; `Failed` when no term ran.
    pub fn worst_status(terms: &[TermReport]) -> TermStatus {
        terms
            .iter()
            .map(|t| t.status)
            .max()
            .unwrap_or(TermStatus::Failed)
    }

    pub fn term(&self, code: &str) -> Option<&TermReport> {
        self.terms.iter().find(|t| t.term_code == code)
    }

    pub fn completed_terms(&self) -> Vec<&str> {
        self.terms_with(|s| s != TermStatus::Cancelled && s != TermStatus::Failed)
    }

    pub fn cancelled_terms(&self) -> Vec<&str> {
        self.terms_with(|s| s == TermStatus::Cancelled)
    }

    fn terms_with(&self, pred: impl Fn(TermStatus) -> bool) -> Vec<&str> {
        self.terms
            .iter()
            .filter(|t| pred(t.status))
            .map(|t| t.term_code.as_str())
            .collect()
    }
}
