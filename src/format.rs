//! Output rendering for search results: Org-mode, JSON, CSV and plain text.

use clap::ValueEnum;
use std::fmt::Write as _;
use std::path::Path;

use crate::models::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Org,
    Json,
    Csv,
    Text,
}

impl OutputFormat {
    /// Format implied by a file suffix (`txt` counts as text).
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix.to_ascii_lowercase().as_str() {
            "org" => Some(OutputFormat::Org),
            "json" => Some(OutputFormat::Json),
            "csv" => Some(OutputFormat::Csv),
            "txt" | "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Field used as the Org heading.
    pub name: String,
    /// Restrict output to these fields.
    pub fields: Option<Vec<String>>,
    /// Org heading depth.
    pub level: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            name: "report_number".to_string(),
            fields: None,
            level: 3,
        }
    }
}

impl RenderOptions {
    fn includes(&self, key: &str) -> bool {
        self.fields
            .as_ref()
            .map(|f| f.iter().any(|x| x == key))
            .unwrap_or(true)
    }
}

/// The output file's suffix wins over a mismatching requested format.
pub fn resolve_format(requested: OutputFormat, output: Option<&Path>) -> OutputFormat {
    let Some(suffix) = output.and_then(|p| p.extension()).and_then(|e| e.to_str()) else {
        return requested;
    };
    match OutputFormat::from_suffix(suffix) {
        Some(implied) if implied != requested => {
            tracing::warn!(
                "format ({:?}) does not match file format ({}), using {:?}",
                requested,
                suffix,
                implied
            );
            implied
        }
        _ => requested,
    }
}

/// Render records; non-empty output always ends with a newline.
pub fn render(records: &[Record], format: OutputFormat, opts: &RenderOptions) -> String {
    let mut out = match format {
        OutputFormat::Org => as_org(records, opts),
        OutputFormat::Json => serde_json::to_string_pretty(records).unwrap_or_default(),
        OutputFormat::Csv => as_csv(records, opts.fields.as_deref()),
        OutputFormat::Text => as_text(records, opts),
    };
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Org TODO headings with every other field as a property drawer entry.
pub fn as_org(records: &[Record], opts: &RenderOptions) -> String {
    let mut out = String::new();
    for record in records {
        let name = record.get(&opts.name).map(|v| v.to_string()).unwrap_or_default();
        let _ = write!(out, "{} TODO {}\n:PROPERTIES:", "*".repeat(opts.level), name);
        for (key, value) in record {
            if *key != opts.name && opts.includes(key) {
                org_property(&mut out, key, value, "");
            }
        }
        out.push_str("\n:END:\n");
    }
    out
}

/// Nested maps extend the property name with `_CHILD`; list items after the
/// first insert their index into the parent prefix.
fn org_property(out: &mut String, key: &str, value: &Value, root: &str) {
    let name = if root.is_empty() {
        key.to_uppercase()
    } else {
        format!("{}_{}", root, key.to_uppercase())
    };
    match value {
        Value::Null => {
            let _ = write!(out, "\n:{}: ", name);
        }
        Value::Text(s) => {
            let _ = write!(out, "\n:{}: {}", name, s);
        }
        Value::Map(map) => {
            for (k, v) in map {
                org_property(out, k, v, &name);
            }
        }
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                let item_root = if i > 0 { format!("{}_{}", root, i) } else { root.to_string() };
                org_property(out, key, item, &item_root);
            }
        }
    }
}

/// CSV with a header row. Columns are `fields`, or the sorted union of keys.
pub fn as_csv(records: &[Record], fields: Option<&[String]>) -> String {
    if records.is_empty() {
        return String::new();
    }

    let headers: Vec<String> = match fields {
        Some(f) => f.to_vec(),
        None => {
            let mut keys: Vec<String> = records.iter().flat_map(|r| r.keys().cloned()).collect();
            keys.sort();
            keys.dedup();
            keys
        }
    };

    let mut out = String::new();
    out.push_str(&csv_line(headers.iter().map(String::as_str)));
    for record in records {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| record.get(h).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        out.push_str(&csv_line(cells.iter().map(String::as_str)));
    }
    out
}

fn csv_line<'a>(cells: impl Iterator<Item = &'a str>) -> String {
    let mut line = cells.map(csv_escape).collect::<Vec<_>>().join(",");
    line.push('\n');
    line
}

fn csv_escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// `Result n:` blocks with one indented `key: value` line per field.
pub fn as_text(records: &[Record], opts: &RenderOptions) -> String {
    let mut out = String::new();
    for (i, record) in records.iter().enumerate() {
        let _ = write!(out, "\nResult {}:", i + 1);
        for (key, value) in record {
            if opts.includes(key) {
                let _ = write!(out, "\n  {}: {}", key, value);
            }
        }
    }
    out
}
