//! Section list page for one term and subject.

use scraper::Html;

use crate::error::ParseError;
use crate::models::{ClassStatus, SectionSummary};
use crate::source::PageKind;

use super::table::{Table, cell_text, find_captioned_table};

const CAPTION: &str = "Sections Found";

const CRN: &[&str] = &["crn"];
const SUBJECT: &[&str] = &["subj", "subject"];
const COURSE: &[&str] = &["crse", "course", "course number"];
const TITLE: &[&str] = &["title"];
const CREDITS: &[&str] = &["cred", "credits", "credit hours"];
const TYPE: &[&str] = &["type", "schedule type"];
const CAPACITY: &[&str] = &["cap", "capacity"];
const STATUS: &[&str] = &["status"];

/// Parse the bulk section listing. `subject` fills in rows when the page has
/// no subject column.
pub fn parse_section_list(html: &str, subject: &str) -> Result<Vec<SectionSummary>, ParseError> {
    let page = PageKind::SectionList;
    let document = Html::parse_document(html);
    let table = find_captioned_table(&document, CAPTION)
        .ok_or_else(|| ParseError::missing(page, format!("table captioned '{CAPTION}'")))?;
    let table = Table::read(page, table)?;

    let crn_col = table.column(CRN)?;
    let course_col = table.column(COURSE)?;
    let title_col = table.column(TITLE)?;
    let subject_col = table.optional_column(SUBJECT);
    let credits_col = table.optional_column(CREDITS);
    let type_col = table.optional_column(TYPE);
    let capacity_col = table.optional_column(CAPACITY);
    let status_col = table.optional_column(STATUS);

    let mut sections = Vec::with_capacity(table.rows().len());
    for (i, row) in table.rows().iter().enumerate() {
        let required = |col: usize, name: &str| {
            let text = cell_text(row, Some(col));
            if text.is_empty() {
                Err(ParseError::missing(page, format!("{name} cell"))
                    .with_detail(format!("data row {}", i + 1)))
            } else {
                Ok(text)
            }
        };

        let crn = required(crn_col, "CRN")?;
        let course_number = required(course_col, "course")?;
        let title = required(title_col, "title")?;

        let subject_code = match cell_text(row, subject_col) {
            s if s.is_empty() => subject.to_string(),
            s => s,
        };

        sections.push(SectionSummary {
            crn,
            subject_code,
            course_number,
            title,
            credit_hours: parse_credits(&cell_text(row, credits_col)),
            class_type: non_empty(cell_text(row, type_col)),
            capacity: cell_text(row, capacity_col).parse().ok(),
            status: parse_status(&cell_text(row, status_col)),
        });
    }
    Ok(sections)
}

/// `"3.000"` → 3.0; a variable range such as `"1.000 TO 3.000"` yields its
/// upper bound.
fn parse_credits(text: &str) -> Option<f64> {
    let upper = text.to_ascii_uppercase();
    let last = upper.rsplit("TO").next()?.rsplit('-').next()?;
    last.trim().parse().ok()
}

fn parse_status(text: &str) -> ClassStatus {
    if text.to_lowercase().contains("cancel") {
        ClassStatus::Cancelled
    } else {
        ClassStatus::Active
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}
