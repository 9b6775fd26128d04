//! Page parsers: raw markup in, scraped records out.
//!
//! Parsers are pure. They tolerate incidental markup variation (attribute
//! order, whitespace, column order) and fail with a [`ParseError`] when a
//! structural anchor is missing instead of guessing.

mod section_detail;
mod section_list;
mod subject_list;
mod table;
mod term_list;

use scraper::{Html, Selector};

use crate::error::ParseError;
use crate::source::PageKind;

pub use section_detail::parse_section_detail;
pub use section_list::parse_section_list;
pub use subject_list::parse_subject_list;
pub use term_list::parse_term_list;

/// `(value, label)` pairs of the `option`s inside the first `select`
/// matching `select_css`. Options with an empty value are placeholders.
fn select_options(
    html: &str,
    page: PageKind,
    select_css: &str,
) -> Result<Vec<(String, String)>, ParseError> {
    let document = Html::parse_document(html);
    let select_sel = parse_selector(page, select_css)?;
    let option_sel = parse_selector(page, "option")?;

    let select = document
        .select(&select_sel)
        .next()
        .ok_or_else(|| ParseError::missing(page, select_css))?;

    let mut seen = std::collections::HashSet::new();
    let options = select
        .select(&option_sel)
        .filter_map(|option| {
            let value = option.value().attr("value")?.trim().to_string();
            if value.is_empty() || !seen.insert(value.clone()) {
                return None;
            }
            let label = table::element_text(option);
            Some((value, label))
        })
        .collect();
    Ok(options)
}

fn parse_selector(page: PageKind, css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css)
        .map_err(|e| ParseError::missing(page, css).with_detail(format!("invalid selector: {e:?}")))
}
