//! Intermediate records produced by the page parsers.
//!
//! These mirror what a page says, not what the catalog holds. The reconciler
//! turns them into catalog entities.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// One option of the term list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedTerm {
    pub code: String,
    /// Absent when the term list could not be fetched
    pub name: Option<String>,
}

/// One option of a term's subject list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedSubject {
    pub code: String,
    pub name: String,
}

/// Offering status as printed by the section list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassStatus {
    #[default]
    Active,
    Cancelled,
}

/// One row of a section list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub crn: String,
    pub subject_code: String,
    pub course_number: String,
    pub title: String,
    pub credit_hours: Option<f64>,
    /// Schedule type such as "Lecture" or "Laboratory"
    pub class_type: Option<String>,
    pub capacity: Option<u32>,
    pub status: ClassStatus,
}

/// A person listed in a meeting's instructor cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScrapedInstructor {
    pub name: String,
    pub email: Option<String>,
}

/// One row of a section's meeting-times table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedMeeting {
    /// Day pattern such as "MWF"; "TBA" when the source has none
    pub days: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    /// Building and room such as "LWSN 1142"; "TBA" when unassigned
    pub location: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub instructors: Vec<ScrapedInstructor>,
}

/// Parsed section detail page for a single CRN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDetail {
    pub crn: String,
    pub description: Option<String>,
    pub meetings: Vec<ScrapedMeeting>,
}

/// A section whose list row and detail page were both scraped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub summary: SectionSummary,
    pub detail: SectionDetail,
}

/// Everything scraped for one term, ready for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermScrape {
    pub term: ScrapedTerm,
    pub subjects: Vec<ScrapedSubject>,
    pub sections: Vec<SectionRecord>,
    /// Listed sections whose detail page failed; kept out of the merge but
    /// never retired because the source still lists them
    pub unresolved: Vec<SectionSummary>,
    /// True only when the subject list and every section list succeeded
    pub complete: bool,
}

impl TermScrape {
    /// Earliest and latest meeting dates across the term's sections.
    pub fn date_span(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        let meetings = self.sections.iter().flat_map(|s| &s.detail.meetings);
        let start = meetings.clone().filter_map(|m| m.start_date).min();
        let end = meetings.filter_map(|m| m.end_date).max();
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meeting(start: Option<NaiveDate>, end: Option<NaiveDate>) -> ScrapedMeeting {
        ScrapedMeeting {
            days: "MWF".into(),
            start_time: None,
            end_time: None,
            location: "TBA".into(),
            start_date: start,
            end_date: end,
            instructors: Vec::new(),
        }
    }

    fn record(crn: &str, meetings: Vec<ScrapedMeeting>) -> SectionRecord {
        SectionRecord {
            summary: SectionSummary {
                crn: crn.into(),
                subject_code: "CS".into(),
                course_number: "10100".into(),
                title: "Intro".into(),
                credit_hours: None,
                class_type: None,
                capacity: None,
                status: ClassStatus::Active,
            },
            detail: SectionDetail {
                crn: crn.into(),
                description: None,
                meetings,
            },
        }
    }

    #[test]
    fn test_date_span_covers_all_meetings() {
        let d = |m, d| NaiveDate::from_ymd_opt(2025, m, d);
        let scrape = TermScrape {
            term: ScrapedTerm {
                code: "202510".into(),
                name: None,
            },
            subjects: Vec::new(),
            sections: vec![
                record("1", vec![meeting(d(8, 25), d(12, 13))]),
                record("2", vec![meeting(d(8, 18), None), meeting(None, d(12, 20))]),
            ],
            unresolved: Vec::new(),
            complete: true,
        };

        assert_eq!(scrape.date_span(), (d(8, 18), d(12, 20)));
    }
}
