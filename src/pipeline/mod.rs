//! Pipeline stages of a catalog job.
//!
//! - `crawl`: fetch and parse the term's pages with retry and bounded concurrency
//! - `reconcile`: merge a term's scrape into the catalog
//! - `job`: run both per term inside a store transaction and build the report

pub mod crawl;
pub mod job;
pub mod reconcile;
pub mod retry;

pub use crawl::{Crawler, TermCrawl};
pub use job::CatalogJob;
pub use reconcile::{ReconcileMode, reconcile};
pub use retry::RetryPolicy;
