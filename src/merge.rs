//! Concatenation of remote and local results.
//!
//! Each origin keeps its own internal order; nothing is deduplicated across
//! origins.

use crate::models::{Record, Value, SOURCE_KEY};

/// Provenance tag given to remote records.
pub const REMOTE_SOURCE: &str = "openfda";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeOrder {
    #[default]
    RemoteFirst,
    LocalFirst,
}

/// Merge both result sets. Remote records without a provenance tag are
/// tagged [`REMOTE_SOURCE`]; local records keep theirs.
pub fn merge_results(remote: Vec<Record>, local: Vec<Record>, order: MergeOrder) -> Vec<Record> {
    let remote = remote.into_iter().map(|mut r| {
        r.entry(SOURCE_KEY.to_string())
            .or_insert_with(|| Value::text(REMOTE_SOURCE));
        r
    });

    match order {
        MergeOrder::RemoteFirst => remote.chain(local).collect(),
        MergeOrder::LocalFirst => local.into_iter().chain(remote).collect(),
    }
}
