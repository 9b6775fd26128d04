//! Canned-page source for tests and offline runs.
//!
//! Maps a [`PageKey`] to fixed content, independent of where the content came
//! from (inline strings, files, generated markup).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::ConnectionError;
use crate::source::{PageKey, SourceConnection};

/// What a fixture key answers with.
#[derive(Debug, Clone)]
pub enum FixturePage {
    Content(String),
    /// Every fetch fails with this cause
    Fail(String),
    /// The first `n` fetches fail, later ones return the content
    FailTimes(usize, String),
}

/// A [`SourceConnection`] that serves canned pages.
#[derive(Debug, Default)]
pub struct FixtureSource {
    pages: HashMap<PageKey, FixturePage>,
    fetches: Mutex<HashMap<PageKey, usize>>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `content` for `key`, replacing any previous fixture.
    pub fn insert(&mut self, key: PageKey, content: impl Into<String>) -> &mut Self {
        self.pages.insert(key, FixturePage::Content(content.into()));
        self
    }

    /// Make every fetch of `key` fail.
    pub fn fail(&mut self, key: PageKey, cause: impl Into<String>) -> &mut Self {
        self.pages.insert(key, FixturePage::Fail(cause.into()));
        self
    }

    /// Fail the first `times` fetches of `key`, then serve `content`.
    pub fn flaky(&mut self, key: PageKey, times: usize, content: impl Into<String>) -> &mut Self {
        self.pages
            .insert(key, FixturePage::FailTimes(times, content.into()));
        self
    }

    pub fn remove(&mut self, key: &PageKey) -> Option<FixturePage> {
        self.pages.remove(key)
    }

    /// How many times `key` has been fetched so far.
    pub fn fetch_count(&self, key: &PageKey) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Total fetches across all keys.
    pub fn total_fetches(&self) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    fn record_fetch(&self, key: &PageKey) -> usize {
        let mut fetches = self.fetches.lock().unwrap_or_else(PoisonError::into_inner);
        let count = fetches.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }
}

#[async_trait]
impl SourceConnection for FixtureSource {
    async fn fetch(&self, key: &PageKey) -> Result<String, ConnectionError> {
        let attempt = self.record_fetch(key);
        match self.pages.get(key) {
            Some(FixturePage::Content(content)) => Ok(content.clone()),
            Some(FixturePage::Fail(cause)) => Err(ConnectionError::new(key, cause)),
            Some(FixturePage::FailTimes(times, content)) => {
                if attempt <= *times {
                    Err(ConnectionError::new(
                        key,
                        format!("simulated failure {attempt}/{times}"),
                    ))
                } else {
                    Ok(content.clone())
                }
            }
            None => Err(ConnectionError::new(key, "no fixture for page")),
        }
    }
}
