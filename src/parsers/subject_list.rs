//! Subject list page for one term.

use crate::error::ParseError;
use crate::models::ScrapedSubject;
use crate::source::PageKind;

const SUBJECT_SELECT: &str = r#"select[name="sel_subj"]"#;

pub fn parse_subject_list(html: &str) -> Result<Vec<ScrapedSubject>, ParseError> {
    let options = super::select_options(html, PageKind::SubjectList, SUBJECT_SELECT)?;
    Ok(options
        .into_iter()
        .map(|(code, name)| ScrapedSubject { code, name })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_subjects() {
        let html = r#"
            <select size="10" multiple id="subj_id" name="sel_subj">
              <option value="CS">Computer Sciences</option>
              <option value="MA">Mathematics</option>
            </select>
        "#;
        let subjects = parse_subject_list(html).unwrap();
        assert_eq!(
            subjects,
            vec![
                ScrapedSubject {
                    code: "CS".into(),
                    name: "Computer Sciences".into()
                },
                ScrapedSubject {
                    code: "MA".into(),
                    name: "Mathematics".into()
                },
            ]
        );
    }

    #[test]
    fn test_term_page_is_not_a_subject_page() {
        let html = r#"<select name="p_term"><option value="202510">Fall</option></select>"#;
        assert!(parse_subject_list(html).is_err());
    }
}
