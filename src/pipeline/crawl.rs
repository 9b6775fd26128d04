// src/pipeline/crawl.rs

//! Crawl orchestrator.
//!
//! Walks term → subject → section list → section detail for one term at a
//! time. List pages and detail pages are throttled by two separate
//! semaphores shared by every term this crawler processes. A failing page is
//! recorded and skipped; it never stops its siblings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, ParseError};
use crate::models::{
    CrawlerConfig, Failure, FailureStage, ScrapedSubject, ScrapedTerm, SectionRecord,
    SectionSummary, TermScrape,
};
use crate::parsers::{parse_section_detail, parse_section_list, parse_subject_list, parse_term_list};
use crate::pipeline::RetryPolicy;
use crate::source::{PageKey, SourceConnection};

/// Everything one term's crawl produced.
#[derive(Debug, Clone)]
pub struct TermCrawl {
    pub term: ScrapedTerm,
    pub subjects: Vec<ScrapedSubject>,
    pub sections: Vec<SectionRecord>,
    /// Listed sections whose detail page could not be fetched or parsed
    pub unresolved: Vec<SectionSummary>,
    pub failures: Vec<Failure>,
    /// Subject list and every section list succeeded
    pub complete: bool,
    /// Cancellation interrupted the crawl; its results must not be reconciled
    pub cancelled: bool,
}

impl TermCrawl {
    fn new(term: ScrapedTerm) -> Self {
        Self {
            term,
            subjects: Vec::new(),
            sections: Vec::new(),
            unresolved: Vec::new(),
            failures: Vec::new(),
            complete: false,
            cancelled: false,
        }
    }

    /// The subject list never arrived, so there is nothing to reconcile.
    pub fn subject_list_failed(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.stage == FailureStage::SubjectList)
    }

    /// Split into the reconciler's input and the page failures.
    pub fn into_scrape(self) -> (TermScrape, Vec<Failure>) {
        let scrape = TermScrape {
            term: self.term,
            subjects: self.subjects,
            sections: self.sections,
            unresolved: self.unresolved,
            complete: self.complete,
        };
        (scrape, self.failures)
    }
}

/// Result of one subject's section list and its details.
#[derive(Default)]
struct SubjectCrawl {
    subject: String,
    sections: Vec<SectionRecord>,
    unresolved: Vec<SectionSummary>,
    failures: Vec<Failure>,
    list_ok: bool,
    cancelled: bool,
}

/// Crawl orchestrator over any [`SourceConnection`].
pub struct Crawler<S> {
    source: Arc<S>,
    retry: RetryPolicy,
    list_permits: Semaphore,
    detail_permits: Semaphore,
    list_concurrency: usize,
    detail_concurrency: usize,
    request_delay: Duration,
}

impl<S: SourceConnection> Crawler<S> {
    pub fn new(source: Arc<S>, config: &CrawlerConfig) -> Self {
        let list_concurrency = config.list_concurrency.max(1);
        let detail_concurrency = config.detail_concurrency.max(1);
        Self {
            source,
            retry: RetryPolicy::from_config(config),
            list_permits: Semaphore::new(list_concurrency),
            detail_permits: Semaphore::new(detail_concurrency),
            list_concurrency,
            detail_concurrency,
            request_delay: config.request_delay(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch and parse the term list.
    pub async fn fetch_terms(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapedTerm>, FetchError> {
        self.fetch_page(&PageKey::TermList, &self.list_permits, cancel, parse_term_list)
            .await
    }

    /// Crawl one term. Never fails as a whole: problems end up in
    /// [`TermCrawl::failures`].
    pub async fn crawl_term(&self, term: ScrapedTerm, cancel: &CancellationToken) -> TermCrawl {
        let mut crawl = TermCrawl::new(term);
        let code = crawl.term.code.clone();

        let key = PageKey::subject_list(&code);
        match self
            .fetch_page(&key, &self.list_permits, cancel, parse_subject_list)
            .await
        {
            Ok(subjects) => crawl.subjects = subjects,
            Err(FetchError::Cancelled) => {
                crawl.cancelled = true;
                return crawl;
            }
            Err(e) => {
                log::warn!("Subject list for term {} failed: {}", code, e);
                crawl
                    .failures
                    .push(Failure::from_fetch(FailureStage::SubjectList, key.to_string(), &e));
                return crawl;
            }
        }

        let mut results: Vec<SubjectCrawl> = stream::iter(crawl.subjects.clone())
            .map(|subject| {
                let code = code.as_str();
                async move { self.crawl_subject(code, &subject.code, cancel).await }
            })
            .buffer_unordered(self.list_concurrency)
            .collect()
            .await;
        results.sort_by(|a, b| a.subject.cmp(&b.subject));

        // A CRN listed under several subjects belongs to the subject its row
        // names; otherwise to the lowest subject code.
        let mut complete = true;
        let mut kept: HashMap<String, (usize, bool)> = HashMap::new();
        for result in results {
            complete &= result.list_ok;
            crawl.cancelled |= result.cancelled;
            crawl.failures.extend(result.failures);
            crawl.unresolved.extend(result.unresolved);
            for record in result.sections {
                let native = record.summary.subject_code == result.subject;
                match kept.get(&record.summary.crn).copied() {
                    None => {
                        kept.insert(record.summary.crn.clone(), (crawl.sections.len(), native));
                        crawl.sections.push(record);
                    }
                    Some((index, kept_native)) => {
                        log::warn!(
                            "Term {} lists CRN {} under more than one subject",
                            code,
                            record.summary.crn
                        );
                        if native && !kept_native {
                            kept.insert(record.summary.crn.clone(), (index, true));
                            crawl.sections[index] = record;
                        }
                    }
                }
            }
        }

        crawl.complete = complete && !crawl.cancelled;
        log::info!(
            "Term {}: {} subjects, {} sections, {} unresolved, {} failures{}",
            code,
            crawl.subjects.len(),
            crawl.sections.len(),
            crawl.unresolved.len(),
            crawl.failures.len(),
            if crawl.cancelled { " (cancelled)" } else { "" }
        );
        crawl
    }

    async fn crawl_subject(
        &self,
        term: &str,
        subject: &str,
        cancel: &CancellationToken,
    ) -> SubjectCrawl {
        let mut out = SubjectCrawl {
            subject: subject.to_string(),
            ..SubjectCrawl::default()
        };

        let key = PageKey::section_list(term, subject);
        let summaries = match self
            .fetch_page(&key, &self.list_permits, cancel, |html| {
                parse_section_list(html, subject)
            })
            .await
        {
            Ok(summaries) => summaries,
            Err(FetchError::Cancelled) => {
                out.cancelled = true;
                return out;
            }
            Err(e) => {
                log::warn!("Section list {} failed: {}", key, e);
                out.failures
                    .push(Failure::from_fetch(FailureStage::SectionList, key.to_string(), &e));
                return out;
            }
        };
        out.list_ok = true;

        let mut details = stream::iter(summaries)
            .map(|summary| async move {
                let key = PageKey::section_detail(term, subject, &summary.crn);
                let result = self
                    .fetch_page(&key, &self.detail_permits, cancel, |html| {
                        parse_section_detail(html, &summary.crn)
                    })
                    .await;
                (summary, key, result)
            })
            .buffer_unordered(self.detail_concurrency);

        while let Some((summary, key, result)) = details.next().await {
            match result {
                Ok(detail) => out.sections.push(SectionRecord { summary, detail }),
                Err(FetchError::Cancelled) => out.cancelled = true,
                Err(e) => {
                    log::warn!("Section detail {} failed: {}", key, e);
                    out.failures.push(Failure::from_fetch(
                        FailureStage::SectionDetail,
                        key.to_string(),
                        &e,
                    ));
                    out.unresolved.push(summary);
                }
            }
        }
        out
    }

    /// Fetch one page under the tier's permit, with retry, and parse it.
    async fn fetch_page<T, P>(
        &self,
        key: &PageKey,
        tier: &Semaphore,
        cancel: &CancellationToken,
        parse: P,
    ) -> Result<T, FetchError>
    where
        P: Fn(&str) -> Result<T, ParseError>,
    {
        let source = &*self.source;
        let parse = &parse;
        let delay = self.request_delay;

        self.retry
            .run(&key.to_string(), cancel, move || async move {
                let _permit = tier.acquire().await.map_err(|_| FetchError::Cancelled)?;
                let html = source.fetch(key).await?;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                parse(&html).map_err(FetchError::from)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::ConnectionError;
    use crate::models::FailureKind;
    use crate::source::{FixtureSource, PageKind};

    const SUBJECTS: &str = r#"<select name="sel_subj">
        <option value="CS">Computer Sciences</option>
        <option value="MA">Mathematics</option></select>"#;

    fn sections(rows: &[(&str, &str)]) -> String {
        let rows: String = rows
            .iter()
            .map(|(crn, crse)| format!("<tr><td>{crn}</td><td>{crse}</td><td>Course {crse}</td></tr>"))
            .collect();
        format!(
            r#"<table class="datadisplaytable"><caption>Sections Found</caption>
               <tr><th>CRN</th><th>Crse</th><th>Title</th></tr>{rows}</table>"#
        )
    }

    const DETAIL: &str = r#"<table class="datadisplaytable"><caption>Scheduled Meeting Times</caption>
        <tr><th>Time</th><th>Days</th><th>Where</th><th>Instructors</th></tr>
        <tr><td>10:30 am - 11:20 am</td><td>MWF</td><td>LWSN 1142</td><td>Jane Doe (P)</td></tr>
        </table>"#;

    fn config() -> CrawlerConfig {
        CrawlerConfig {
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..CrawlerConfig::default()
        }
    }

    fn term() -> ScrapedTerm {
        ScrapedTerm {
            code: "202510".into(),
            name: Some("Fall 2025".into()),
        }
    }

    fn fixture() -> FixtureSource {
        let mut source = FixtureSource::new();
        source
            .insert(PageKey::subject_list("202510"), SUBJECTS)
            .insert(
                PageKey::section_list("202510", "CS"),
                sections(&[("10001", "10100"), ("10002", "18000")]),
            )
            .insert(PageKey::section_list("202510", "MA"), sections(&[("20001", "16100")]))
            .insert(PageKey::section_detail("202510", "CS", "10001"), DETAIL)
            .insert(PageKey::section_detail("202510", "CS", "10002"), DETAIL)
            .insert(PageKey::section_detail("202510", "MA", "20001"), DETAIL);
        source
    }

    #[tokio::test]
    async fn test_crawls_whole_term() {
        let crawler = Crawler::new(Arc::new(fixture()), &config());
        let crawl = crawler.crawl_term(term(), &CancellationToken::new()).await;

        assert!(crawl.complete);
        assert!(!crawl.cancelled);
        assert!(crawl.failures.is_empty());
        assert_eq!(crawl.subjects.len(), 2);
        assert_eq!(crawl.sections.len(), 3);
    }

    #[tokio::test]
    async fn test_detail_failure_is_isolated() {
        let mut source = fixture();
        source.fail(PageKey::section_detail("202510", "CS", "10002"), "HTTP 503");
        let source = Arc::new(source);

        let crawler = Crawler::new(Arc::clone(&source), &config());
        let crawl = crawler.crawl_term(term(), &CancellationToken::new()).await;

        assert!(crawl.complete);
        assert_eq!(crawl.sections.len(), 2);
        assert_eq!(crawl.unresolved.len(), 1);
        assert_eq!(crawl.unresolved[0].crn, "10002");
        assert_eq!(crawl.failures.len(), 1);
        assert_eq!(crawl.failures[0].stage, FailureStage::SectionDetail);
        assert_eq!(crawl.failures[0].kind, FailureKind::Connection);
        assert_eq!(
            source.fetch_count(&PageKey::section_detail("202510", "CS", "10002")),
            3
        );
    }

    #[tokio::test]
    async fn test_section_list_failure_marks_term_incomplete() {
        let mut source = fixture();
        source.fail(PageKey::section_list("202510", "MA"), "connection reset");

        let crawler = Crawler::new(Arc::new(source), &config());
        let crawl = crawler.crawl_term(term(), &CancellationToken::new()).await;

        assert!(!crawl.complete);
        assert_eq!(crawl.sections.len(), 2);
        assert_eq!(crawl.failures[0].stage, FailureStage::SectionList);
    }

    #[tokio::test]
    async fn test_subject_list_failure() {
        let mut source = fixture();
        source.fail(PageKey::subject_list("202510"), "HTTP 500");

        let crawler = Crawler::new(Arc::new(source), &config());
        let crawl = crawler.crawl_term(term(), &CancellationToken::new()).await;

        assert!(crawl.subject_list_failed());
        assert!(!crawl.complete);
        assert!(crawl.sections.is_empty());
    }

    #[tokio::test]
    async fn test_flaky_page_recovers() {
        let mut source = fixture();
        source.flaky(PageKey::section_list("202510", "MA"), 2, sections(&[("20001", "16100")]));
        let source = Arc::new(source);

        let crawler = Crawler::new(Arc::clone(&source), &config());
        let crawl = crawler.crawl_term(term(), &CancellationToken::new()).await;

        assert!(crawl.complete);
        assert_eq!(crawl.sections.len(), 3);
        assert_eq!(source.fetch_count(&PageKey::section_list("202510", "MA")), 3);
    }

    #[tokio::test]
    async fn test_parse_failure_is_not_retried() {
        let mut source = fixture();
        source.insert(
            PageKey::section_detail("202510", "MA", "20001"),
            "<html>No detailed class information found</html>",
        );
        let source = Arc::new(source);

        let crawler = Crawler::new(Arc::clone(&source), &config());
        let crawl = crawler.crawl_term(term(), &CancellationToken::new()).await;

        assert_eq!(crawl.failures[0].kind, FailureKind::Parse);
        assert_eq!(
            source.fetch_count(&PageKey::section_detail("202510", "MA", "20001")),
            1
        );
    }

    #[tokio::test]
    async fn test_cancelled_crawl() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let crawler = Crawler::new(Arc::new(fixture()), &config());
        let crawl = crawler.crawl_term(term(), &cancel).await;

        assert!(crawl.cancelled);
        assert!(!crawl.complete);
        assert_eq!(crawler.source().total_fetches(), 0);
    }

    #[tokio::test]
    async fn test_crn_under_several_subjects_resolves_the_same_way() {
        const THREE: &str = r#"<select name="sel_subj">
            <option value="AA">Aeronautics</option>
            <option value="CS">Computer Sciences</option>
            <option value="MA">Mathematics</option></select>"#;
        const CROSS_LISTED: &str = r#"<table class="datadisplaytable"><caption>Sections Found</caption>
            <tr><th>CRN</th><th>Subj</th><th>Crse</th><th>Title</th></tr>
            <tr><td>10001</td><td>CS</td><td>99999</td><td>Cross listed</td></tr></table>"#;

        let mut source = FixtureSource::new();
        source
            .insert(PageKey::subject_list("202510"), THREE)
            .insert(PageKey::section_list("202510", "AA"), CROSS_LISTED)
            .insert(PageKey::section_list("202510", "CS"), sections(&[("10001", "10100")]))
            .insert(PageKey::section_list("202510", "MA"), sections(&[("10001", "16100")]));
        for subject in ["AA", "CS", "MA"] {
            source.insert(PageKey::section_detail("202510", subject, "10001"), DETAIL);
        }

        let crawler = Crawler::new(Arc::new(source), &config());
        let crawl = crawler.crawl_term(term(), &CancellationToken::new()).await;

        assert_eq!(crawl.sections.len(), 1);
        assert_eq!(crawl.sections[0].summary.subject_code, "CS");
        assert_eq!(crawl.sections[0].summary.course_number, "10100");
    }

    #[derive(Default)]
    struct InFlight {
        now: AtomicUsize,
        max: AtomicUsize,
    }

    /// Records how many fetches of each tier overlap.
    struct MeteredSource {
        inner: FixtureSource,
        lists: InFlight,
        details: InFlight,
    }

    #[async_trait]
    impl SourceConnection for MeteredSource {
        async fn fetch(&self, key: &PageKey) -> Result<String, ConnectionError> {
            let tier = match key.kind() {
                PageKind::SectionDetail => &self.details,
                _ => &self.lists,
            };
            let now = tier.now.fetch_add(1, Ordering::SeqCst) + 1;
            tier.max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let page = self.inner.fetch(key).await;
            tier.now.fetch_sub(1, Ordering::SeqCst);
            page
        }
    }

    #[tokio::test]
    async fn test_tier_bounds_hold_across_terms() {
        let crns = [("10001", "10100"), ("10002", "18000"), ("10003", "25000")];
        let mut inner = FixtureSource::new();
        for code in ["202510", "202520"] {
            inner
                .insert(PageKey::subject_list(code), SUBJECTS)
                .insert(PageKey::section_list(code, "CS"), sections(&crns))
                .insert(PageKey::section_list(code, "MA"), sections(&crns));
            for subject in ["CS", "MA"] {
                for (crn, _) in crns {
                    inner.insert(PageKey::section_detail(code, subject, crn), DETAIL);
                }
            }
        }
        let source = Arc::new(MeteredSource {
            inner,
            lists: InFlight::default(),
            details: InFlight::default(),
        });

        let config = CrawlerConfig {
            list_concurrency: 1,
            detail_concurrency: 2,
            ..config()
        };
        let crawler = Crawler::new(Arc::clone(&source), &config);
        let spring = ScrapedTerm {
            code: "202520".into(),
            name: None,
        };
        let cancel = CancellationToken::new();
        let (fall, spring) = tokio::join!(
            crawler.crawl_term(term(), &cancel),
            crawler.crawl_term(spring, &cancel)
        );

        assert!(fall.complete && spring.complete);
        assert_eq!(fall.sections.len() + spring.sections.len(), 6);
        assert_eq!(source.lists.max.load(Ordering::SeqCst), 1);
        assert_eq!(source.details.max.load(Ordering::SeqCst), 2);
    }
}
