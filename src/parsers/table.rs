//! Header-addressed access to `datadisplaytable` tables.
//!
//! Columns are found by header text, so column order and extra columns in
//! the source do not matter.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::error::ParseError;
use crate::source::PageKind;

static DATA_TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.datadisplaytable").unwrap());
static CAPTION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("caption").unwrap());

/// Collapse whitespace (including `&nbsp;`) and trim.
pub fn clean_text(raw: &str) -> String {
    raw.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized text content of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<String>())
}

/// The first data table whose caption matches `caption` (case-insensitive).
pub fn find_captioned_table<'a>(document: &'a Html, caption: &str) -> Option<ElementRef<'a>> {
    document.select(&DATA_TABLE).find(|table| {
        table
            .select(&CAPTION)
            .next()
            .is_some_and(|c| element_text(c).eq_ignore_ascii_case(caption))
    })
}

/// A table split into a header and its data rows.
pub struct Table<'a> {
    page: PageKind,
    headers: Vec<String>,
    rows: Vec<Vec<ElementRef<'a>>>,
}

impl<'a> Table<'a> {
    /// Read the header row (the first row made only of `th` cells) and every
    /// following row that has `td` cells. Nested tables are not descended.
    pub fn read(page: PageKind, table: ElementRef<'a>) -> Result<Self, ParseError> {
        let mut headers: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        for row in direct_rows(table) {
            let cells: Vec<ElementRef<'a>> = row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| matches!(c.value().name(), "td" | "th"))
                .collect();
            if cells.is_empty() {
                continue;
            }

            let all_header = cells.iter().all(|c| c.value().name() == "th");
            if headers.is_none() {
                if all_header {
                    headers = Some(cells.iter().map(|c| element_text(*c).to_lowercase()).collect());
                }
            } else if !all_header {
                rows.push(cells);
            }
        }

        let headers = headers.ok_or_else(|| ParseError::missing(page, "table header row"))?;
        Ok(Self {
            page,
            headers,
            rows,
        })
    }

    /// Index of the first header matching any alias.
    pub fn optional_column(&self, aliases: &[&str]) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| aliases.iter().any(|a| h.eq_ignore_ascii_case(a)))
    }

    /// Like [`Self::optional_column`] but the column is a structural anchor.
    pub fn column(&self, aliases: &[&str]) -> Result<usize, ParseError> {
        self.optional_column(aliases)
            .ok_or_else(|| ParseError::missing(self.page, format!("column '{}'", aliases[0])))
    }

    pub fn rows(&self) -> &[Vec<ElementRef<'a>>] {
        &self.rows
    }
}

/// Cell at `index`, if the row is long enough.
pub fn cell<'a>(row: &[ElementRef<'a>], index: usize) -> Option<ElementRef<'a>> {
    row.get(index).copied()
}

/// Normalized text of the cell at `index`; empty when the cell is missing.
pub fn cell_text(row: &[ElementRef<'_>], index: Option<usize>) -> String {
    index
        .and_then(|i| cell(row, i))
        .map(element_text)
        .unwrap_or_default()
}

/// `tr` children of a table, looking through `thead`/`tbody`/`tfoot`.
fn direct_rows<'a>(table: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|r| r.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}
