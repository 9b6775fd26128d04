//! Term list page.

use crate::error::ParseError;
use crate::models::ScrapedTerm;
use crate::source::PageKind;

const TERM_SELECT: &str = r#"select[name="p_term"]"#;
const VIEW_ONLY: &str = "(view only)";

/// Parse the term dropdown into `(code, name)` records.
pub fn parse_term_list(html: &str) -> Result<Vec<ScrapedTerm>, ParseError> {
    let options = super::select_options(html, PageKind::TermList, TERM_SELECT)?;
    Ok(options
        .into_iter()
        .map(|(code, label)| ScrapedTerm {
            code,
            name: Some(strip_view_only(&label)),
        })
        .collect())
}

fn strip_view_only(label: &str) -> String {
    let lower = label.to_ascii_lowercase();
    match lower.strip_suffix(VIEW_ONLY) {
        Some(rest) => label[..rest.len()].trim_end().to_string(),
        None => label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_terms() {
        let html = r#"
            <form><select id="term_input_id" name="p_term" size="1">
              <option value="">None</option>
              <option value="202520">Spring 2026</option>
              <option  value = "202510" >Fall   2025 (View only)</option>
            </select></form>
        "#;
        let terms = parse_term_list(html).unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].code, "202520");
        assert_eq!(terms[1].name.as_deref(), Some("Fall 2025"));
    }

    #[test]
    fn test_missing_select_is_parse_error() {
        let err = parse_term_list("<html><body>Service unavailable</body></html>").unwrap_err();
        assert_eq!(err.page, PageKind::TermList);
        assert_eq!(err.anchor, TERM_SELECT);
    }

    #[test]
    fn test_empty_select_is_empty_list() {
        let terms = parse_term_list(r#"<select name="p_term"></select>"#).unwrap();
        assert!(terms.is_empty());
    }
}
