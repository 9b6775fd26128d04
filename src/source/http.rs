// src/source/http.rs

//! HTTP transport for the registration site.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::{ConnectionError, Result};
use crate::models::SourceConfig;
use crate::source::{PageKey, SourceConnection};

/// Fetches pages over HTTP using the paths configured in [`SourceConfig`].
pub struct HttpSource {
    client: Client,
    base: Url,
    config: SourceConfig,
}

impl HttpSource {
    /// Create a configured HTTP source.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base = Url::parse(&config.base_url)?;

        Ok(Self {
            client,
            base,
            config: config.clone(),
        })
    }

    /// Build the request URL for a page.
    pub fn url_for(&self, key: &PageKey) -> std::result::Result<Url, url::ParseError> {
        let (path, params): (&str, Vec<(&str, &str)>) = match key {
            PageKey::TermList => (self.config.term_list_path.as_str(), Vec::new()),
            PageKey::SubjectList { term } => (
                self.config.subject_list_path.as_str(),
                vec![
                    ("p_calling_proc", "bwckschd.p_disp_dyn_sched"),
                    ("p_term", term.as_str()),
                ],
            ),
            PageKey::SectionList { term, subject } => (
                self.config.section_list_path.as_str(),
                vec![("term_in", term.as_str()), ("sel_subj", subject.as_str())],
            ),
            PageKey::SectionDetail { term, subject, crn } => (
                self.config.section_detail_path.as_str(),
                vec![
                    ("term_in", term.as_str()),
                    ("subj_in", subject.as_str()),
                    ("crn_in", crn.as_str()),
                ],
            ),
        };

        let mut url = self.base.join(path)?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }
}

#[async_trait]
impl SourceConnection for HttpSource {
    async fn fetch(&self, key: &PageKey) -> std::result::Result<String, ConnectionError> {
        let url = self
            .url_for(key)
            .map_err(|e| ConnectionError::new(key, format!("invalid URL: {e}")))?;

        log::debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ConnectionError::new(key, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectionError::new(key, format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ConnectionError::new(key, e))?;
        if body.trim().is_empty() {
            return Err(ConnectionError::new(key, "empty response body"));
        }
        Ok(body)
    }
}
