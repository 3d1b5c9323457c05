//! Term-group compilation.
//!
//! Turns user term specifications into normalized [`TermGroups`] and renders
//! them as the boolean query string the openFDA endpoint expects:
//! `(mri)+AND+(stapes+OR+tympanostomy)`.
//!
//! Whether an empty group list means "match everything" (local store) or
//! "invalid request" (remote endpoint) is decided by the caller.

use crate::errors::TermError;
use crate::models::TermGroups;

/// One term specification: a bare term, or a group of alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermSpec {
    Single(String),
    Group(Vec<String>),
}

impl From<&str> for TermSpec {
    fn from(s: &str) -> Self {
        TermSpec::Single(s.to_string())
    }
}

impl From<Vec<&str>> for TermSpec {
    fn from(v: Vec<&str>) -> Self {
        TermSpec::Group(v.into_iter().map(str::to_string).collect())
    }
}

/// Compile typed term specifications. A single term becomes a singleton group.
pub fn compile_terms<I>(specs: I) -> TermGroups
where
    I: IntoIterator<Item = TermSpec>,
{
    specs
        .into_iter()
        .map(|spec| match spec {
            TermSpec::Single(term) => vec![term],
            TermSpec::Group(group) => group,
        })
        .collect()
}

/// Compile dynamically typed term specifications (e.g. `--terms-json`).
///
/// A string is a singleton group and an array is a group. Array elements
/// must be strings, numbers or booleans; anything else cannot be turned into
/// a term.
pub fn compile_json_terms(specs: &[serde_json::Value]) -> Result<TermGroups, TermError> {
    let mut keywords = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        match spec {
            serde_json::Value::String(term) => keywords.push(vec![term.clone()]),
            serde_json::Value::Array(items) => {
                let group = items
                    .iter()
                    .map(json_term_to_string)
                    .collect::<Result<Vec<_>, _>>()?;
                keywords.push(group);
            }
            other => {
                let err = TermError::InvalidTermType {
                    index,
                    type_name: json_type_name(other).to_string(),
                };
                tracing::error!("{}", err);
                return Err(err);
            }
        }
    }
    Ok(keywords)
}

fn json_term_to_string(value: &serde_json::Value) -> Result<String, TermError> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(TermError::StringConversion {
            type_name: json_type_name(other).to_string(),
        }),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Split a comma-separated CLI argument (`"MRI,MAGNET"`) into one group.
pub fn parse_cli_group(arg: &str) -> Vec<String> {
    arg.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render groups as the endpoint's boolean query. Spaces become `+`.
pub fn render_query(keywords: &TermGroups) -> String {
    keywords
        .iter()
        .map(|group| format!("({})", group.join("+OR+")))
        .collect::<Vec<_>>()
        .join("+AND+")
        .replace(' ', "+")
}

/// Build a request URL: `{base}?search={field}:{query}&limit={n}[&sort={s}]`.
pub fn construct_url(
    base_endpoint: &str,
    field: &str,
    query: &str,
    limit: usize,
    sort: Option<&str>,
) -> String {
    let mut url = format!(
        "{}?search={}:{}&limit={}",
        base_endpoint,
        field,
        query.replace(' ', "+"),
        limit
    );
    if let Some(sort) = sort {
        url.push_str("&sort=");
        url.push_str(sort);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mixed_specs_compile_to_groups() {
        let kw = compile_terms(vec![
            TermSpec::from("mri"),
            TermSpec::from(vec!["stapes", "tympanostomy"]),
        ]);
        assert_eq!(
            kw,
            vec![
                vec!["mri".to_string()],
                vec!["stapes".to_string(), "tympanostomy".to_string()]
            ]
        );
        assert_eq!(render_query(&kw), "(mri)+AND+(stapes+OR+tympanostomy)");
    }

    #[test]
    fn json_terms_stringify_scalars() {
        let kw = compile_json_terms(&[json!("mri"), json!(["a", 12, true])]).unwrap();
        assert_eq!(kw[0], vec!["mri"]);
        assert_eq!(kw[1], vec!["a", "12", "true"]);
    }

    #[test]
    fn json_terms_reject_bad_top_level_type() {
        let err = compile_json_terms(&[json!("ok"), json!(42)]).unwrap_err();
        assert_eq!(
            err,
            TermError::InvalidTermType {
                index: 1,
                type_name: "number".into()
            }
        );
    }

    #[test]
    fn json_terms_reject_unconvertible_element() {
        let err = compile_json_terms(&[json!(["a", {"b": 1}])]).unwrap_err();
        assert_eq!(
            err,
            TermError::StringConversion {
                type_name: "object".into()
            }
        );
        assert!(err.to_string().contains("object"));
    }

    #[test]
    fn spaces_become_plus() {
        let kw = compile_terms(vec![TermSpec::from(vec!["hearing aid", "cochlear implant"])]);
        assert_eq!(render_query(&kw), "(hearing+aid+OR+cochlear+implant)");
    }

    #[test]
    fn empty_groups_render_empty_query() {
        assert_eq!(render_query(&Vec::new()), "");
    }

    #[test]
    fn cli_group_splits_on_commas() {
        assert_eq!(parse_cli_group("MRI, MAGNET,,"), vec!["MRI", "MAGNET"]);
    }

    #[test]
    fn url_with_and_without_sort() {
        let base = "https://api.fda.gov/device/event.json";
        assert_eq!(
            construct_url(base, "mdr_text.text", "(mri)", 10, None),
            "https://api.fda.gov/device/event.json?search=mdr_text.text:(mri)&limit=10"
        );
        assert_eq!(
            construct_url(base, "mdr_text.text", "(mri)", 10, Some("date_received:desc")),
            "https://api.fda.gov/device/event.json?search=mdr_text.text:(mri)&limit=10&sort=date_received:desc"
        );
    }
}
