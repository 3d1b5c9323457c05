//! Core data models used throughout the search and ingestion pipelines.
//!
//! Remote and local results share one record shape: a string-keyed map whose
//! values are text, nested maps, or sequences of either. No schema is imposed
//! on remote records; local records carry whatever columns the ingested files
//! declared plus `row_hash`.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Key under which merged output records carry their provenance.
pub const SOURCE_KEY: &str = "_source";

/// Ordered list of term groups. Groups are AND-ed, terms within a group OR-ed.
pub type TermGroups = Vec<Vec<String>>;

/// One search result: an adverse-event report, or a device / narrative row.
pub type Record = BTreeMap<String, Value>;

/// A field value inside a [`Record`].
///
/// JSON numbers and booleans are kept as their textual form; the search
/// pipeline only ever compares text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum Value {
    Null,
    Text(String),
    List(Vec<Value>),
    Map(Record),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Returns the text of a scalar value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Record> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Text(b.to_string()),
            serde_json::Value::Number(n) => Value::Text(n.to_string()),
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        v.map(Value::Text).unwrap_or(Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::List(items) => serializer.collect_seq(items),
            Value::Map(map) => serializer.collect_map(map),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => f.write_str(s),
            other => {
                let json = serde_json::to_string(other).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

/// The three historical MAUDE file families, one local table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    Device,
    Foitext,
    Foidev,
}

impl RecordType {
    pub const ALL: [RecordType; 3] = [RecordType::Device, RecordType::Foitext, RecordType::Foidev];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Device => "device",
            RecordType::Foitext => "foitext",
            RecordType::Foidev => "foidev",
        }
    }

    /// Local table holding rows of this type. Table names are fixed
    /// identifiers and safe to interpolate into SQL.
    pub fn table(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" => Ok(RecordType::Device),
            "foitext" => Ok(RecordType::Foitext),
            "foidev" => Ok(RecordType::Foidev),
            other => anyhow::bail!("unknown record type: '{}'", other),
        }
    }
}

/// One row of `ingestion_log`: the ledger that makes builds resumable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionLogEntry {
    pub file_name: String,
    pub file_hash: String,
    pub record_type: RecordType,
    pub rows_ingested: i64,
    /// Unix seconds of the last write.
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_scalars_become_text() {
        let v: Value = serde_json::from_str(r#"{"a": 1, "b": true, "c": null, "d": ["x"]}"#).unwrap();
        let map = v.as_map().unwrap();
        assert_eq!(map["a"], Value::text("1"));
        assert_eq!(map["b"], Value::text("true"));
        assert_eq!(map["c"], Value::Null);
        assert_eq!(map["d"], Value::List(vec![Value::text("x")]));
    }

    #[test]
    fn serializes_as_plain_json() {
        let mut rec = Record::new();
        rec.insert("report_number".into(), Value::text("R1"));
        rec.insert("device".into(), Value::List(vec![Value::Null]));
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(json, r#"{"device":[null],"report_number":"R1"}"#);
    }

    #[test]
    fn record_type_parses_table_names() {
        for rt in RecordType::ALL {
            assert_eq!(rt.as_str().parse::<RecordType>().unwrap(), rt);
        }
        assert!("events".parse::<RecordType>().is_err());
    }
}
