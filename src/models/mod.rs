// src/models/mod.rs

//! Domain models for the catalog crawler.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod catalog;
mod config;
mod report;
mod scraped;

// Re-export all public types
pub use catalog::{
    Class, ClassKey, Course, Entity, EntityId, EntityKind, Instructor, Meeting, MeetingKey,
    NaturalKey, Subject, Term, normalize_name,
};
pub use config::{Config, CrawlerConfig, LoggingConfig, SourceConfig, StorageConfig};
pub use report::{
    ChangeCounts, ChangeSet, Failure, FailureKind, FailureStage, JobReport,
    ReconciliationAmbiguity, TermReport, TermStatus,
};
pub use scraped::{
    ClassStatus, ScrapedInstructor, ScrapedMeeting, ScrapedSubject, ScrapedTerm, SectionDetail,
    SectionRecord, SectionSummary, TermScrape,
};
