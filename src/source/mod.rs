//! Source connection: the raw-page transport boundary.
//!
//! No retry and no parsing happens here. Failure policy belongs to the
//! orchestrator, markup interpretation to [`crate::parsers`].

mod fixture;
mod http;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

pub use fixture::{FixturePage, FixtureSource};
pub use http::HttpSource;

/// The four page kinds the registration site serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    TermList,
    SubjectList,
    SectionList,
    SectionDetail,
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TermList => "term list",
            Self::SubjectList => "subject list",
            Self::SectionList => "section list",
            Self::SectionDetail => "section detail",
        })
    }
}

/// Minimal key identifying one page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageKey {
    TermList,
    SubjectList {
        term: String,
    },
    SectionList {
        term: String,
        subject: String,
    },
    SectionDetail {
        term: String,
        subject: String,
        crn: String,
    },
}

impl PageKey {
    pub fn subject_list(term: &str) -> Self {
        Self::SubjectList {
            term: term.to_string(),
        }
    }

    pub fn section_list(term: &str, subject: &str) -> Self {
        Self::SectionList {
            term: term.to_string(),
            subject: subject.to_string(),
        }
    }

    pub fn section_detail(term: &str, subject: &str, crn: &str) -> Self {
        Self::SectionDetail {
            term: term.to_string(),
            subject: subject.to_string(),
            crn: crn.to_string(),
        }
    }

    pub fn kind(&self) -> PageKind {
        match self {
            Self::TermList => PageKind::TermList,
            Self::SubjectList { .. } => PageKind::SubjectList,
            Self::SectionList { .. } => PageKind::SectionList,
            Self::SectionDetail { .. } => PageKind::SectionDetail,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TermList => f.write_str("terms"),
            Self::SubjectList { term } => write!(f, "subjects/{term}"),
            Self::SectionList { term, subject } => write!(f, "sections/{term}/{subject}"),
            Self::SectionDetail { term, subject, crn } => {
                write!(f, "detail/{term}/{subject}/{crn}")
            }
        }
    }
}

/// Fetches raw page content from the registration site.
#[async_trait]
pub trait SourceConnection: Send + Sync {
    /// Fetch the raw markup for `key`.
    async fn fetch(&self, key: &PageKey) -> Result<String, ConnectionError>;

    async fn fetch_term_list(&self) -> Result<String, ConnectionError> {
        self.fetch(&PageKey::TermList).await
    }

    async fn fetch_subject_list(&self, term: &str) -> Result<String, ConnectionError> {
        self.fetch(&PageKey::subject_list(term)).await
    }

    async fn fetch_section_list(
        &self,
        term: &str,
        subject: &str,
    ) -> Result<String, ConnectionError> {
        self.fetch(&PageKey::section_list(term, subject)).await
    }

    async fn fetch_section_detail(
        &self,
        term: &str,
        subject: &str,
        crn: &str,
    ) -> Result<String, ConnectionError> {
        self.fetch(&PageKey::section_detail(term, subject, crn)).await
    }
}
