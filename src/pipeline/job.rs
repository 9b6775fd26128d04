//! End-to-end crawl job: term discovery, per-term crawl, per-term
//! transactional reconciliation and the job report.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::models::{
    CrawlerConfig, Failure, FailureKind, FailureStage, JobReport, ScrapedTerm, TermReport,
    TermStatus,
};
use crate::pipeline::{Crawler, RetryPolicy, reconcile};
use crate::source::{PageKey, SourceConnection};
use crate::storage::CatalogStore;

/// A crawl-and-reconcile job over one source and one catalog store.
pub struct CatalogJob<S, C> {
    crawler: Crawler<S>,
    store: Arc<C>,
    term_concurrency: usize,
    deadline: Option<Duration>,
}

impl<S: SourceConnection, C: CatalogStore> CatalogJob<S, C> {
    pub fn new(source: Arc<S>, store: Arc<C>, config: &CrawlerConfig) -> Self {
        Self {
            crawler: Crawler::new(source, config),
            store,
            term_concurrency: config.term_concurrency.max(1),
            deadline: config.deadline(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.crawler = self.crawler.with_retry(retry);
        self
    }

    pub fn crawler(&self) -> &Crawler<S> {
        &self.crawler
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    /// Crawl and reconcile `requested` terms (every listed term when empty).
    ///
    /// Never fails as a whole; every problem is in the report.
    pub async fn run(&self, requested: &[String], cancel: &CancellationToken) -> JobReport {
        let started_at = Utc::now();
        let token = cancel.child_token();
        let deadline = self.deadline.map(|after| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                log::warn!("Job deadline of {:?} reached, cancelling", after);
                token.cancel();
            })
        });

        log::info!(
            "Starting catalog job ({})",
            if requested.is_empty() {
                "all listed terms".to_string()
            } else {
                requested.join(", ")
            }
        );

        let mut failures = Vec::new();
        let mut reports = Vec::new();
        let terms = self
            .resolve_terms(requested, &token, &mut failures, &mut reports)
            .await;

        let crawled: Vec<TermReport> = stream::iter(terms)
            .map(|term| self.run_term(term, &token))
            .buffered(self.term_concurrency)
            .collect()
            .await;
        reports.extend(crawled);

        if let Some(handle) = deadline {
            handle.abort();
        }

        let report = JobReport {
            started_at,
            finished_at: Utc::now(),
            status: JobReport::worst_status(&reports),
            terms: reports,
            failures,
        };
        log::info!(
            "Catalog job finished: {} ({} terms, {} completed, {} cancelled)",
            report.status,
            report.terms.len(),
            report.completed_terms().len(),
            report.cancelled_terms().len()
        );
        report
    }

    /// Decide which terms to crawl from the term list and the request.
    async fn resolve_terms(
        &self,
        requested: &[String],
        cancel: &CancellationToken,
        failures: &mut Vec<Failure>,
        reports: &mut Vec<TermReport>,
    ) -> Vec<ScrapedTerm> {
        let unnamed = |code: &String| ScrapedTerm {
            code: code.clone(),
            name: None,
        };

        let listed = match self.crawler.fetch_terms(cancel).await {
            Ok(listed) => listed,
            Err(FetchError::Cancelled) => {
                reports.extend(
                    requested
                        .iter()
                        .map(|code| TermReport::without_changes(code, TermStatus::Cancelled, Vec::new())),
                );
                return Vec::new();
            }
            Err(e) => {
                log::warn!("Term list failed: {}", e);
                failures.push(Failure::from_fetch(
                    FailureStage::TermList,
                    PageKey::TermList.to_string(),
                    &e,
                ));
                if requested.is_empty() {
                    log::error!("No terms requested and the term list is unavailable");
                }
                return requested.iter().map(unnamed).collect();
            }
        };

        if requested.is_empty() {
            return listed;
        }

        let mut terms = Vec::new();
        for code in requested {
            match listed.iter().find(|t| &t.code == code) {
                Some(term) => terms.push(term.clone()),
                None => {
                    log::warn!("Requested term {} is not on the term list", code);
                    let failure = Failure::new(
                        FailureStage::TermList,
                        code.clone(),
                        FailureKind::NotListed,
                        format!("term {code} is not on the term list"),
                    );
                    reports.push(TermReport::without_changes(
                        code,
                        TermStatus::Failed,
                        vec![failure],
                    ));
                }
            }
        }
        terms
    }

    /// Crawl one term and reconcile it in its own transaction.
    async fn run_term(&self, term: ScrapedTerm, cancel: &CancellationToken) -> TermReport {
        let code = term.code.clone();
        let crawl = self.crawler.crawl_term(term, cancel).await;

        if crawl.cancelled {
            log::warn!("Term {} cancelled before its crawl finished", code);
            return TermReport::without_changes(&code, TermStatus::Cancelled, crawl.failures);
        }
        if crawl.subject_list_failed() {
            return TermReport::without_changes(&code, TermStatus::Failed, crawl.failures);
        }

        let (scrape, mut failures) = crawl.into_scrape();
        let status = if scrape.complete && failures.is_empty() {
            TermStatus::Completed
        } else {
            TermStatus::Partial
        };

        let mut tx = match self.store.begin_term_transaction(&code).await {
            Ok(tx) => tx,
            Err(e) => {
                log::error!("Cannot start transaction for term {}: {}", code, e);
                failures.push(Failure::from_storage(&code, &e));
                return TermReport::without_changes(&code, TermStatus::Failed, failures);
            }
        };

        let changes = match reconcile(&mut tx, &scrape) {
            Ok(changes) => changes,
            Err(e) => {
                log::error!("Reconciling term {} failed, rolling back: {}", code, e);
                self.store.rollback(tx).await;
                failures.push(Failure::from_storage(&code, &e));
                return TermReport::without_changes(&code, TermStatus::Failed, failures);
            }
        };

        if let Err(e) = self.store.commit(tx).await {
            log::error!("Committing term {} failed: {}", code, e);
            failures.push(Failure::from_storage(&code, &e));
            return TermReport::without_changes(&code, TermStatus::Failed, failures);
        }

        TermReport::with_changes(&code, status, changes, failures)
    }
}
