//! End-to-end crawl + reconcile runs against canned pages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catalog_crawler::error::{ConnectionError, StorageError};
use catalog_crawler::models::{
    CrawlerConfig, EntityKind, FailureKind, FailureStage, JobReport, NaturalKey, TermStatus,
};
use catalog_crawler::pipeline::CatalogJob;
use catalog_crawler::source::{FixtureSource, PageKey, SourceConnection};
use catalog_crawler::storage::{
    Catalog, CatalogLookup, CatalogStore, LocalStore, MemoryStore, TermTransaction,
};
use tokio_util::sync::CancellationToken;

const TERM: &str = "202510";

const TERMS: &str = r#"
<form action="/prod/bwckgens.p_proc_term_date" method="post">
  <select name="p_term" size="1" id="term_input_id">
    <option value="">None</option>
    <option value="202520">Spring 2026</option>
    <option value="202510">Fall 2025 (View only)</option>
  </select>
</form>"#;

const SUBJECTS: &str = r#"
<select name="sel_subj" size="10" multiple id="subj_id">
  <option value="CS">Computer Sciences</option>
  <option value="MA">Mathematics</option>
</select>"#;

/// (crn, course number, title, credits)
type Row<'a> = (&'a str, &'a str, &'a str, &'a str);

fn section_list(subject: &str, rows: &[Row<'_>]) -> String {
    let rows: String = rows
        .iter()
        .map(|(crn, crse, title, cred)| {
            format!(
                r#"<tr><td class="dddefault">{crn}</td><td class="dddefault">{subject}</td>
                   <td class="dddefault">{crse}</td><td class="dddefault">{title}</td>
                   <td class="dddefault">{cred}</td><td class="dddefault">Lecture</td>
                   <td class="dddefault">40</td><td class="dddefault">Active</td></tr>"#
            )
        })
        .collect();
    format!(
        r#"<table class="datadisplaytable" summary="This layout table is used to present the sections found">
             <caption class="captiontext">Sections Found</caption>
             <tr><th class="ddheader">CRN</th><th class="ddheader">Subj</th><th class="ddheader">Crse</th>
                 <th class="ddheader">Title</th><th class="ddheader">Cred</th><th class="ddheader">Schedule Type</th>
                 <th class="ddheader">Cap</th><th class="ddheader">Status</th></tr>
             {rows}
           </table>"#
    )
}

fn detail(days: &str, room: &str, instructor: &str) -> String {
    format!(
        r#"<table class="datadisplaytable" summary="This table lists the scheduled meeting times and assigned instructors for this class..">
             <caption class="captiontext">Scheduled Meeting Times</caption>
             <tr><th class="ddheader">Type</th><th class="ddheader">Time</th><th class="ddheader">Days</th>
                 <th class="ddheader">Where</th><th class="ddheader">Date Range</th>
                 <th class="ddheader">Schedule Type</th><th class="ddheader">Instructors</th></tr>
             <tr><td class="dddefault">Class</td><td class="dddefault">10:30 am - 11:20 am</td>
                 <td class="dddefault">{days}</td><td class="dddefault">{room}</td>
                 <td class="dddefault">Aug 25, 2025 - Dec 13, 2025</td><td class="dddefault">Lecture</td>
                 <td class="dddefault">{instructor}</td></tr>
           </table>"#
    )
}

const JANE: &str = r#"Jane Doe (<abbr title="Primary">P</abbr>)<a href="mailto:jdoe@example.edu" target="Jane Doe">E-mail</a>"#;

const INTRO: Row<'static> = ("10001", "10100", "Intro to CS", "3.000");

/// The "202510" term: CS has one section, MA has none.
fn fixture() -> FixtureSource {
    let mut source = FixtureSource::new();
    source
        .insert(PageKey::TermList, TERMS)
        .insert(PageKey::subject_list(TERM), SUBJECTS)
        .insert(PageKey::section_list(TERM, "CS"), section_list("CS", &[INTRO]))
        .insert(PageKey::section_list(TERM, "MA"), section_list("MA", &[]))
        .insert(
            PageKey::section_detail(TERM, "CS", "10001"),
            detail("MWF", "LWSN 1142", JANE),
        );
    source
}

fn config() -> CrawlerConfig {
    CrawlerConfig {
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        ..CrawlerConfig::default()
    }
}

async fn run<C: CatalogStore>(source: FixtureSource, store: &Arc<C>) -> JobReport {
    CatalogJob::new(Arc::new(source), Arc::clone(store), &config())
        .run(&[TERM.to_string()], &CancellationToken::new())
        .await
}

async fn snapshot<C: CatalogStore>(store: &Arc<C>) -> Catalog {
    store.snapshot().await.unwrap()
}

#[tokio::test]
async fn test_fall_term_scenario() {
    let store = Arc::new(MemoryStore::new());

    let first = run(fixture(), &store).await;
    assert_eq!(first.status, TermStatus::Completed);
    let term = first.term(TERM).unwrap();
    assert_eq!(term.created.get(EntityKind::Term), 1);
    assert_eq!(term.created.get(EntityKind::Subject), 2);
    assert_eq!(term.created.get(EntityKind::Course), 1);
    assert_eq!(term.created.get(EntityKind::Class), 1);
    assert_eq!(term.created.get(EntityKind::Meeting), 1);
    assert_eq!(term.created.get(EntityKind::Instructor), 1);
    assert!(term.failures.is_empty());

    let catalog = snapshot(&store).await;
    let course = catalog.data().courses.values().next().unwrap();
    assert_eq!(course.number, "10100");
    assert_eq!(course.title, "Intro to CS");
    assert_eq!(course.credit_hours, Some(3.0));
    let instructor = catalog.data().instructors.values().next().unwrap();
    assert_eq!(instructor.name, "Jane Doe");
    assert_eq!(instructor.email.as_deref(), Some("jdoe@example.edu"));
    let fall = catalog.data().terms.values().next().unwrap();
    assert_eq!(fall.name.as_deref(), Some("Fall 2025"));

    let second = run(fixture(), &store).await;
    let term = second.term(TERM).unwrap();
    assert_eq!(term.status, TermStatus::Completed);
    assert!(term.created.is_empty());
    assert!(term.updated.is_empty());
    assert!(term.retired.is_empty());

    let mut removed = fixture();
    removed.insert(PageKey::section_list(TERM, "CS"), section_list("CS", &[]));
    let third = run(removed, &store).await;
    let term = third.term(TERM).unwrap();
    assert_eq!(term.retired.get(EntityKind::Class), 1);
    assert!(term.created.is_empty());
    assert!(term.updated.is_empty());

    let catalog = snapshot(&store).await;
    assert!(catalog.data().classes.values().all(|c| !c.active));
    assert_eq!(catalog.len(EntityKind::Course), 1);
    assert_eq!(catalog.len(EntityKind::Subject), 2);
    assert_eq!(catalog.len(EntityKind::Term), 1);
}

#[tokio::test]
async fn test_markup_variation_keeps_identities() {
    let store = Arc::new(MemoryStore::new());
    run(fixture(), &store).await;
    let before = snapshot(&store).await;

    // Reordered attributes, extra whitespace, different header case.
    let mut varied = fixture();
    varied
        .insert(
            PageKey::section_list(TERM, "CS"),
            r#"<TABLE summary="sections"   class="datadisplaytable">
                 <caption class="captiontext">  Sections   Found </caption>
                 <tr><th>crn</th><th>SUBJ</th><th>crse</th><th>TITLE</th><th>cred</th></tr>
                 <tr><td>  10001 </td><td> CS</td><td>10100  </td>
                     <td>Intro   to
                         CS</td><td> 3.000 </td></tr>
               </TABLE>"#,
        )
        .insert(
            PageKey::section_detail(TERM, "CS", "10001"),
            detail(
                " MWF ",
                "LWSN&nbsp;1142",
                r#"Jane&nbsp;  Doe  (P)<a target="Jane Doe" href="mailto:JDOE@example.edu">E-mail</a>"#,
            ),
        );
    let report = run(varied, &store).await;
    let term = report.term(TERM).unwrap();
    assert!(term.created.is_empty(), "{:?}", term.created);
    assert!(term.retired.is_empty());

    let after = snapshot(&store).await;
    for kind in EntityKind::ALL {
        assert_eq!(before.len(kind), after.len(kind), "{kind}");
    }
    assert_eq!(
        before.data().classes.keys().collect::<Vec<_>>(),
        after.data().classes.keys().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_retirement_of_missing_class() {
    let store = Arc::new(MemoryStore::new());
    let rows = [
        INTRO,
        ("10002", "18000", "Seminar", "1.000"),
        ("10003", "18200", "Discrete Math", "3.000"),
    ];
    let mut source = fixture();
    source.insert(PageKey::section_list(TERM, "CS"), section_list("CS", &rows));
    for crn in ["10002", "10003"] {
        source.insert(
            PageKey::section_detail(TERM, "CS", crn),
            detail("TR", "HAAS G066", "TBA"),
        );
    }
    run(source, &store).await;
    let before = snapshot(&store).await;

    let mut next = fixture();
    next.insert(PageKey::section_list(TERM, "CS"), section_list("CS", &rows[..2]));
    next.insert(
        PageKey::section_detail(TERM, "CS", "10002"),
        detail("TR", "HAAS G066", "TBA"),
    );
    let report = run(next, &store).await;
    let term = report.term(TERM).unwrap();
    assert_eq!(term.retired.get(EntityKind::Class), 1);
    assert!(term.updated.is_empty());

    let after = snapshot(&store).await;
    for class in after.data().classes.values() {
        assert_eq!(class.active, class.crn != "10003", "{}", class.crn);
        if class.active {
            assert_eq!(Some(class), before.class(&class.id));
        }
    }
}

#[tokio::test]
async fn test_failed_subject_list_suppresses_retirement() {
    let store = Arc::new(MemoryStore::new());
    let mut source = fixture();
    source.insert(
        PageKey::section_list(TERM, "MA"),
        section_list("MA", &[("20001", "16100", "Calculus I", "5.000")]),
    );
    source.insert(
        PageKey::section_detail(TERM, "MA", "20001"),
        detail("MTWRF", "MATH 175", "TBA"),
    );
    run(source, &store).await;

    // MA's listing is down and CS no longer lists 10001.
    let mut partial = fixture();
    partial
        .fail(PageKey::section_list(TERM, "MA"), "HTTP 503")
        .insert(PageKey::section_list(TERM, "CS"), section_list("CS", &[]));
    let report = run(partial, &store).await;

    let term = report.term(TERM).unwrap();
    assert_eq!(term.status, TermStatus::Partial);
    assert!(term.retired.is_empty());
    assert_eq!(term.failures_at(FailureStage::SectionList).count(), 1);
    assert!(
        snapshot(&store)
            .await
            .data()
            .classes
            .values()
            .all(|c| c.active)
    );
}

#[tokio::test]
async fn test_detail_failure_is_isolated() {
    let store = Arc::new(MemoryStore::new());
    let rows = [
        INTRO,
        ("10002", "18000", "Seminar", "1.000"),
        ("10003", "18200", "Discrete Math", "3.000"),
    ];
    let mut source = fixture();
    source
        .insert(PageKey::section_list(TERM, "CS"), section_list("CS", &rows))
        .insert(
            PageKey::section_detail(TERM, "CS", "10002"),
            detail("TR", "HAAS G066", "TBA"),
        )
        .fail(PageKey::section_detail(TERM, "CS", "10003"), "connection reset");
    let source = Arc::new(source);

    let report = CatalogJob::new(Arc::clone(&source), Arc::clone(&store), &config())
        .run(&[TERM.to_string()], &CancellationToken::new())
        .await;

    let term = report.term(TERM).unwrap();
    assert_eq!(term.status, TermStatus::Partial);
    assert_eq!(term.created.get(EntityKind::Class), 2);
    assert_eq!(term.failures.len(), 1);
    assert_eq!(term.failures[0].stage, FailureStage::SectionDetail);
    assert_eq!(term.failures[0].kind, FailureKind::Connection);
    assert_eq!(term.failures[0].key, "detail/202510/CS/10003");
    assert_eq!(
        source.fetch_count(&PageKey::section_detail(TERM, "CS", "10003")),
        3
    );
}

#[tokio::test]
async fn test_missing_email_keeps_recorded_email() {
    let store = Arc::new(MemoryStore::new());
    run(fixture(), &store).await;

    let mut no_email = fixture();
    no_email.insert(
        PageKey::section_detail(TERM, "CS", "10001"),
        detail("MWF", "LWSN 1142", "Jane Doe (P)"),
    );
    let report = run(no_email, &store).await;
    assert!(report.term(TERM).unwrap().updated.is_empty());

    let catalog = snapshot(&store).await;
    let found =
        catalog.find_by_natural_key(&NaturalKey::InstructorEmail("jdoe@example.edu".into()));
    assert_eq!(found.len(), 1);
    assert_eq!(catalog.len(EntityKind::Instructor), 1);
}

/// Fails every commit for one term.
struct FailingStore {
    inner: MemoryStore,
    failing_term: &'static str,
}

#[async_trait]
impl CatalogStore for FailingStore {
    async fn begin_term_transaction(
        &self,
        term_code: &str,
    ) -> Result<TermTransaction, StorageError> {
        self.inner.begin_term_transaction(term_code).await
    }

    async fn commit(&self, tx: TermTransaction) -> Result<(), StorageError> {
        if tx.term_code() == self.failing_term {
            self.inner.rollback(tx).await;
            return Err(StorageError::Backend("disk full".into()));
        }
        self.inner.commit(tx).await
    }

    async fn snapshot(&self) -> Result<Catalog, StorageError> {
        self.inner.snapshot().await
    }
}

#[tokio::test]
async fn test_storage_failure_fails_only_its_term() {
    let mut source = fixture();
    source
        .insert(PageKey::subject_list("202520"), SUBJECTS)
        .insert(PageKey::section_list("202520", "CS"), section_list("CS", &[]))
        .insert(PageKey::section_list("202520", "MA"), section_list("MA", &[]));

    let store = Arc::new(FailingStore {
        inner: MemoryStore::new(),
        failing_term: "202520",
    });
    let report = CatalogJob::new(Arc::new(source), Arc::clone(&store), &config())
        .run(
            &["202510".to_string(), "202520".to_string()],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.term("202510").unwrap().status, TermStatus::Completed);
    let spring = report.term("202520").unwrap();
    assert_eq!(spring.status, TermStatus::Failed);
    assert!(spring.created.is_empty());
    assert_eq!(spring.failures[0].kind, FailureKind::Storage);
    assert_eq!(report.status, TermStatus::Failed);

    let catalog = snapshot(&store).await;
    assert_eq!(catalog.len(EntityKind::Term), 1);
    assert!(
        catalog
            .find_by_natural_key(&NaturalKey::Term("202520".into()))
            .is_empty()
    );
}

/// Detail pages hang long enough for the job deadline to pass.
struct SlowDetails(FixtureSource);

#[async_trait]
impl SourceConnection for SlowDetails {
    async fn fetch(&self, key: &PageKey) -> Result<String, ConnectionError> {
        if matches!(key, PageKey::SectionDetail { .. }) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.0.fetch(key).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_unfinished_term() {
    let store = Arc::new(MemoryStore::new());
    let config = CrawlerConfig {
        deadline_secs: Some(5),
        ..config()
    };

    let report = CatalogJob::new(Arc::new(SlowDetails(fixture())), Arc::clone(&store), &config)
        .run(&[TERM.to_string()], &CancellationToken::new())
        .await;

    assert_eq!(report.status, TermStatus::Cancelled);
    assert_eq!(report.cancelled_terms(), vec![TERM]);
    assert!(snapshot(&store).await.is_empty());
}

#[tokio::test]
async fn test_local_store_round_trip() {
    let temp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(LocalStore::open(temp.path()).await.unwrap());

    let report = run(fixture(), &store).await;
    store.write_report(&report).await.unwrap();

    let reopened = LocalStore::open(temp.path()).await.unwrap();
    let catalog = reopened.snapshot().await.unwrap();
    assert_eq!(catalog.len(EntityKind::Class), 1);
    assert_eq!(catalog.len(EntityKind::Subject), 2);

    let saved = reopened.load_report().await.unwrap().unwrap();
    assert_eq!(saved.status, TermStatus::Completed);

    // Rerunning on the reloaded catalog changes nothing.
    let again = run(fixture(), &Arc::new(reopened)).await;
    assert!(again.term(TERM).unwrap().created.is_empty());
    assert!(again.term(TERM).unwrap().updated.is_empty());
}
