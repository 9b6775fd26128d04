// src/error.rs

//! Unified error handling for the catalog crawler.
//!
//! Page-level failures (`ConnectionError`, `ParseError`) and storage failures
//! (`StorageError`) are separate types so each stage can only surface what it
//! is allowed to. `AppError` wraps all of them for application-level code.

use std::fmt;

use thiserror::Error;

use crate::source::PageKind;

/// Result type alias for application-level operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Source page could not be fetched
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Source page did not have the expected structure
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Page could not be fetched, parsed, or the fetch was cancelled
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Catalog store failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Transient failure fetching one page. Always retryable by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to fetch {key}: {cause}")]
pub struct ConnectionError {
    /// Rendered page key that was attempted
    pub key: String,
    /// Underlying cause (transport error, status, empty body)
    pub cause: String,
}

impl ConnectionError {
    pub fn new(key: impl fmt::Display, cause: impl fmt::Display) -> Self {
        Self {
            key: key.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// A page did not contain a structural anchor the parser requires.
///
/// Never retryable: fetching the same markup again cannot help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{page} page: expected {anchor}{}", detail_suffix(.detail))]
pub struct ParseError {
    pub page: PageKind,
    /// The anchor (selector, column, cell) that was expected and absent
    pub anchor: String,
    pub detail: Option<String>,
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl ParseError {
    pub fn missing(page: PageKind, anchor: impl Into<String>) -> Self {
        Self {
            page,
            anchor: anchor.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Outcome of a failed page fetch as seen by the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The job was cancelled while this fetch was pending
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// The catalog store could not persist or validate a write.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// An entity referenced an id the catalog does not hold
    #[error("{entity} {id} references missing {target} {missing}")]
    DanglingReference {
        entity: &'static str,
        id: String,
        target: &'static str,
        missing: String,
    },

    #[error("term {0} is not in the catalog")]
    UnknownTerm(String),

    #[error("transaction for term {actual} cannot write to term {expected}")]
    TermMismatch { expected: String, actual: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn dangling(
        entity: &'static str,
        id: impl fmt::Display,
        target: &'static str,
        missing: impl fmt::Display,
    ) -> Self {
        Self::DanglingReference {
            entity,
            id: id.to_string(),
            target,
            missing: missing.to_string(),
        }
    }
}
