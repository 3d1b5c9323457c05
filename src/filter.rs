//! Post-fetch exclusion filtering over dotted field paths.
//!
//! A record is dropped only when it matches **every** exclusion group; it
//! matches a group when any of the group's terms occurs (case-insensitively)
//! in the text extracted from the field path.
//!
//! Path extraction walks nested maps segment by segment and fans out across
//! every element of a sequence it meets on the way, so `mdr_text.text` pulls
//! the text out of each narrative fragment in a report. A path that is
//! missing from a record yields no text, and a record without text never
//! matches a group.

use crate::models::{Record, TermGroups, Value};

/// Lazily yield every text leaf reachable from `record` along `path`.
pub fn extract_text<'a>(record: &'a Record, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    let mut segments = path.split('.');
    let head = segments.next().unwrap_or_default();
    let rest: Vec<&'a str> = segments.collect();
    record
        .get(head)
        .into_iter()
        .flat_map(move |v| walk(v, rest.clone()))
}

fn walk<'a>(value: &'a Value, rest: Vec<&'a str>) -> Box<dyn Iterator<Item = &'a str> + 'a> {
    match value {
        Value::List(items) => Box::new(
            items
                .iter()
                .flat_map(move |item| walk(item, rest.clone())),
        ),
        Value::Map(map) => match rest.split_first() {
            Some((next, tail)) => {
                let tail = tail.to_vec();
                Box::new(map.get(*next).into_iter().flat_map(move |v| walk(v, tail.clone())))
            }
            None => Box::new(std::iter::empty()),
        },
        Value::Text(s) if rest.is_empty() => Box::new(std::iter::once(s.as_str())),
        _ => Box::new(std::iter::empty()),
    }
}

/// Lowercased, space-joined text of a field path, or `None` if it has none.
fn haystack(record: &Record, path: &str) -> Option<String> {
    let mut leaves = extract_text(record, path).peekable();
    leaves.peek()?;
    Some(leaves.collect::<Vec<_>>().join(" ").to_lowercase())
}

/// Whether any term in `group` occurs in the record's field text.
pub fn matches_group(record: &Record, group: &[String], path: &str) -> bool {
    match haystack(record, path) {
        Some(text) => group.iter().any(|t| text.contains(&t.to_lowercase())),
        None => false,
    }
}

/// Whether the record matches all exclusion groups and should be dropped.
pub fn is_excluded(record: &Record, exclude: &TermGroups, path: &str) -> bool {
    let Some(text) = haystack(record, path) else {
        return false;
    };
    exclude
        .iter()
        .all(|group| group.iter().any(|t| text.contains(&t.to_lowercase())))
}

/// Keep the records that do not match every exclusion group.
///
/// `None` or an empty group list returns the input unchanged.
pub fn filter_records(records: Vec<Record>, exclude: Option<&TermGroups>, path: &str) -> Vec<Record> {
    match exclude {
        Some(groups) if !groups.is_empty() => records
            .into_iter()
            .filter(|r| !is_excluded(r, groups, path))
            .collect(),
        _ => records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn narrative(texts: &[&str]) -> Record {
        let fragments = texts
            .iter()
            .map(|t| {
                let mut m = Record::new();
                m.insert("text".into(), Value::text(*t));
                Value::Map(m)
            })
            .collect();
        let mut r = Record::new();
        r.insert("mdr_text".into(), Value::List(fragments));
        r
    }

    fn groups(g: &[&[&str]]) -> TermGroups {
        g.iter()
            .map(|grp| grp.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn excludes_only_records_matching_every_group() {
        let records = vec![
            narrative(&["MRI report"]),
            narrative(&["Artifact in MRI"]),
            narrative(&["Artifact with metal"]),
        ];
        let exclude = groups(&[&["artifact"], &["metal"]]);
        let out = filter_records(records, Some(&exclude), "mdr_text.text");
        assert_eq!(out.len(), 2);
        let texts: Vec<&str> = out
            .iter()
            .flat_map(|r| extract_text(r, "mdr_text.text"))
            .collect();
        assert_eq!(texts, vec!["MRI report", "Artifact in MRI"]);
    }

    #[test]
    fn single_group_excludes_any_match() {
        let records = vec![narrative(&["MRI report"]), narrative(&["Artifact in MRI"])];
        let exclude = groups(&[&["artifact", "shadow"]]);
        let out = filter_records(records, Some(&exclude), "mdr_text.text");
        assert_eq!(out, vec![narrative(&["MRI report"])]);
    }

    #[test]
    fn no_exclusions_is_identity() {
        let records = vec![narrative(&["a"]), narrative(&["b"])];
        assert_eq!(filter_records(records.clone(), None, "mdr_text.text"), records);
        assert_eq!(
            filter_records(records.clone(), Some(&Vec::new()), "mdr_text.text"),
            records
        );
    }

    #[test]
    fn empty_input_stays_empty() {
        let exclude = groups(&[&["x"]]);
        assert!(filter_records(Vec::new(), Some(&exclude), "mdr_text.text").is_empty());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let exclude = groups(&[&["ARTIFACT"]]);
        let out = filter_records(vec![narrative(&["artifact seen"])], Some(&exclude), "mdr_text.text");
        assert!(out.is_empty());
    }

    #[test]
    fn text_is_joined_across_fragments() {
        let r = narrative(&["first fragment", "second fragment"]);
        let exclude = groups(&[&["first"], &["second"]]);
        assert!(is_excluded(&r, &exclude, "mdr_text.text"));
    }

    #[test]
    fn missing_path_survives() {
        let mut r = Record::new();
        r.insert("report_number".into(), Value::text("R1"));
        let exclude = groups(&[&[""]]);
        let out = filter_records(vec![r.clone()], Some(&exclude), "mdr_text.text");
        assert_eq!(out, vec![r]);
    }

    #[test]
    fn extracts_flat_and_deeply_nested_paths() {
        let r: Record = serde_json::from_str(
            r#"{"foi_text": "plain",
                "device": [{"openfda": {"device_name": ["Stapes", "Prosthesis"]}},
                           {"openfda": {"device_name": "Grommet"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(&r, "foi_text").collect::<Vec<_>>(), vec!["plain"]);
        assert_eq!(
            extract_text(&r, "device.openfda.device_name").collect::<Vec<_>>(),
            vec!["Stapes", "Prosthesis", "Grommet"]
        );
        assert_eq!(extract_text(&r, "device.missing").count(), 0);
    }
}
