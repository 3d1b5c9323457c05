//! On-demand schema evolution for the record tables.
//!
//! MAUDE flat files change their column sets from release to release. Each
//! record table starts with only `row_hash`; columns observed in a newly
//! parsed file are added as nullable `TEXT` before its rows are appended.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashSet;

/// The synthetic primary key present on every record table.
pub const ROW_HASH: &str = "row_hash";

/// Canonical column name: trimmed, lowercase, with `-`, `.` and whitespace
/// replaced by `_`.
///
/// Applied to flat-file headers at ingestion and to search fields when routing
/// local queries, so both sides agree on names.
pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column names currently present on `table`.
pub async fn table_columns(pool: &SqlitePool, table: &str) -> Result<HashSet<String>> {
    let names: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(pool)
        .await?;
    Ok(names.into_iter().collect())
}

/// Add every column in `columns` that `table` lacks. Returns the columns added.
///
/// A column that cannot be added is logged and skipped; ingestion carries on
/// with whatever schema it ends up with.
pub async fn evolve_table(pool: &SqlitePool, table: &str, columns: &[String]) -> Result<Vec<String>> {
    let existing = table_columns(pool, table).await?;
    let mut added = Vec::new();

    for column in columns {
        let safe = normalize_column_name(column);
        if safe == ROW_HASH || safe.is_empty() || existing.contains(&safe) || added.contains(&safe) {
            continue;
        }
        if safe != *column {
            tracing::debug!("sanitized column name '{}' to '{}'", column, safe);
        }

        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} TEXT",
            quote_ident(table),
            quote_ident(&safe)
        );
        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => {
                tracing::debug!("added column '{}' to table '{}'", safe, table);
                added.push(safe);
            }
            Err(e) => {
                tracing::warn!("could not add column '{}' to '{}': {}", safe, table, e);
            }
        }
    }

    Ok(added)
}
