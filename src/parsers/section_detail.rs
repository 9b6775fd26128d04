//! Section detail page: meeting times and instructors of one CRN.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use crate::error::ParseError;
use crate::models::{ScrapedInstructor, ScrapedMeeting, SectionDetail, normalize_name};
use crate::source::PageKind;

use super::table::{Table, cell, cell_text, clean_text, element_text, find_captioned_table};

const CAPTION: &str = "Scheduled Meeting Times";
const TBA: &str = "TBA";

const TIME: &[&str] = &["time"];
const DAYS: &[&str] = &["days"];
const WHERE: &[&str] = &["where", "location"];
const DATE_RANGE: &[&str] = &["date range"];
const INSTRUCTORS: &[&str] = &["instructors", "instructor"];

static TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{1,2}):(\d{2})\s*([ap])\.?m\.?\s*-\s*(\d{1,2}):(\d{2})\s*([ap])\.?m\.?$")
        .unwrap()
});
static MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\((?:p|e-?mail)?\)").unwrap());
static MAILTO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href^="mailto:"]"#).unwrap());
static DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".courseDescription").unwrap());

/// Parse the meeting-times table of the detail page for `crn`.
pub fn parse_section_detail(html: &str, crn: &str) -> Result<SectionDetail, ParseError> {
    let page = PageKind::SectionDetail;
    let document = Html::parse_document(html);
    let table = find_captioned_table(&document, CAPTION)
        .ok_or_else(|| ParseError::missing(page, format!("table captioned '{CAPTION}'")))?;
    let table = Table::read(page, table)?;

    let time_col = table.column(TIME)?;
    let days_col = table.column(DAYS)?;
    let where_col = table.column(WHERE)?;
    let instructors_col = table.column(INSTRUCTORS)?;
    let dates_col = table.optional_column(DATE_RANGE);

    let meetings = table
        .rows()
        .iter()
        .map(|row| {
            let (start_time, end_time) = parse_time_range(&cell_text(row, Some(time_col)));
            let (start_date, end_date) = parse_date_range(&cell_text(row, dates_col));
            ScrapedMeeting {
                days: or_tba(cell_text(row, Some(days_col)).replace(' ', "")),
                start_time,
                end_time,
                location: or_tba(cell_text(row, Some(where_col))),
                start_date,
                end_date,
                instructors: cell(row, instructors_col)
                    .map(parse_instructors)
                    .unwrap_or_default(),
            }
        })
        .collect();

    let description = document
        .select(&DESCRIPTION)
        .next()
        .map(element_text)
        .filter(|d| !d.is_empty());

    Ok(SectionDetail {
        crn: crn.to_string(),
        description,
        meetings,
    })
}

fn or_tba(text: String) -> String {
    if text.is_empty() { TBA.to_string() } else { text }
}

/// `"10:30 am - 11:20 am"`; anything else (including `TBA`) has no time.
fn parse_time_range(text: &str) -> (Option<NaiveTime>, Option<NaiveTime>) {
    let Some(caps) = TIME_RANGE.captures(text.trim()) else {
        return (None, None);
    };
    let clock = |h: usize, m: usize, ampm: usize| -> Option<NaiveTime> {
        let hour: u32 = caps.get(h)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(m)?.as_str().parse().ok()?;
        if !(1..=12).contains(&hour) {
            return None;
        }
        let pm = caps.get(ampm)?.as_str().eq_ignore_ascii_case("p");
        NaiveTime::from_hms_opt(hour % 12 + if pm { 12 } else { 0 }, minute, 0)
    };
    (clock(1, 2, 3), clock(4, 5, 6))
}

/// `"Aug 25, 2025 - Dec 13, 2025"` (ISO dates are accepted too).
fn parse_date_range(text: &str) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let mut parts = text.splitn(2, " - ");
    let start = parts.next().and_then(parse_date);
    let end = parts.next().and_then(parse_date);
    (start, end)
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%b %d, %Y")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .ok()
}

/// Names are the comma-separated text outside of links; e-mails come from
/// `mailto:` links whose `target` names the instructor.
fn parse_instructors(cell: ElementRef<'_>) -> Vec<ScrapedInstructor> {
    let names_text: String = cell
        .descendants()
        .filter(|node| !node.ancestors().any(|a| is_link(a.value())))
        .filter_map(|node| match node.value() {
            Node::Text(text) => Some(&**text),
            _ => None,
        })
        .collect();
    let names_text = MARKERS.replace_all(&names_text, " ");

    let names: Vec<String> = names_text
        .split(',')
        .map(clean_text)
        .filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case(TBA))
        .collect();

    let links: Vec<(Option<String>, String)> = cell
        .select(&MAILTO)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let email = href.get("mailto:".len()..)?.trim().to_lowercase();
            if email.is_empty() {
                return None;
            }
            let target = a.value().attr("target").map(normalize_name);
            Some((target, email))
        })
        .collect();

    let single_pair = names.len() == 1 && links.len() == 1;
    names
        .into_iter()
        .map(|name| {
            let key = normalize_name(&name);
            let email = links
                .iter()
                .find(|(target, _)| target.as_deref() == Some(key.as_str()))
                .or_else(|| links.first().filter(|_| single_pair))
                .map(|(_, email)| email.clone());
            ScrapedInstructor { name, email }
        })
        .collect()
}

fn is_link(node: &Node) -> bool {
    node.as_element().is_some_and(|e| e.name() == "a")
}
