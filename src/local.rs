//! Term-group search over the locally ingested historical store.
//!
//! The local store is an optional enrichment: a missing store or a failing
//! query yields an empty result set with a logged message, never an error.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::filter;
use crate::models::{Record, RecordType, TermGroups, Value, SOURCE_KEY};
use crate::schema::{self, normalize_column_name, quote_ident};

const NARRATIVE_FIELDS: &[&str] = &["foi_text", "mdr_text_key", "text_type_code"];
const DEVICE_FIELDS: &[&str] = &[
    "brand_name",
    "generic_name",
    "manufacturer_d_name",
    "model_number",
    "device_report_product_code",
];

/// One local search.
#[derive(Debug, Clone)]
pub struct LocalQuery {
    pub terms: TermGroups,
    pub exclude: Option<TermGroups>,
    pub search_field: String,
    /// Row cap applied to each table separately.
    pub limit: Option<usize>,
}

/// Tables expected to carry `field`. Unknown fields search every table.
pub fn route_tables(field: &str) -> Vec<RecordType> {
    if NARRATIVE_FIELDS.contains(&field) {
        vec![RecordType::Foitext]
    } else if DEVICE_FIELDS.contains(&field) {
        vec![RecordType::Device, RecordType::Foidev]
    } else {
        RecordType::ALL.to_vec()
    }
}

/// Escape `%`, `_` and `\` so a term matches literally under `ESCAPE '\'`.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// WHERE clause and bind parameters for `groups` against `field`.
///
/// Each group becomes a parenthesized OR of `LIKE` predicates; groups are
/// AND-ed. No groups matches every row.
pub fn build_where(field: &str, groups: &TermGroups) -> (String, Vec<String>) {
    let column = quote_ident(field);
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    for group in groups {
        if group.is_empty() {
            continue;
        }
        let ors: Vec<String> = group
            .iter()
            .map(|term| {
                params.push(format!("%{}%", escape_like(term)));
                format!("{} LIKE ? ESCAPE '\\'", column)
            })
            .collect();
        clauses.push(format!("({})", ors.join(" OR ")));
    }

    if clauses.is_empty() {
        ("1=1".to_string(), params)
    } else {
        (clauses.join(" AND "), params)
    }
}

pub fn database_exists(db_path: &Path) -> bool {
    db_path.is_file()
}

/// Search the store at `db_path`. Never fails; see the module docs.
pub async fn query_local(db_path: &Path, query: &LocalQuery) -> Vec<Record> {
    if !database_exists(db_path) {
        tracing::warn!("local database not found at {}", db_path.display());
        return Vec::new();
    }

    let pool = match db::connect_path(db_path, false).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("error opening local database: {:#}", e);
            return Vec::new();
        }
    };

    let result = query_tables(&pool, query).await;
    pool.close().await;

    match result {
        Ok(records) => {
            tracing::info!("local database query returned {} results", records.len());
            records
        }
        Err(e) => {
            tracing::error!("error querying local database: {:#}", e);
            Vec::new()
        }
    }
}

async fn query_tables(pool: &SqlitePool, query: &LocalQuery) -> Result<Vec<Record>> {
    let field = normalize_column_name(&query.search_field);
    let mut results = Vec::new();

    for record_type in route_tables(&field) {
        let table = record_type.table();
        let columns = schema::table_columns(pool, table).await?;
        if !columns.contains(&field) {
            tracing::debug!("field '{}' not in table '{}', skipping", field, table);
            continue;
        }

        let (where_sql, params) = build_where(&field, &query.terms);
        let mut sql = format!("SELECT * FROM {} WHERE {}", quote_ident(table), where_sql);
        if query.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }
        tracing::debug!("executing query on {}: {}", table, sql);

        let mut q = sqlx::query(&sql);
        for p in &params {
            q = q.bind(p);
        }
        if let Some(limit) = query.limit {
            q = q.bind(limit as i64);
        }
        let rows = q.fetch_all(pool).await?;

        let source = format!("local_db:{}", table);
        let records = rows.iter().map(row_to_record).collect::<Result<Vec<_>>>()?;
        for mut record in filter::filter_records(records, query.exclude.as_ref(), &field) {
            record.insert(SOURCE_KEY.to_string(), Value::text(source.clone()));
            results.push(record);
        }
    }

    Ok(results)
}

fn row_to_record(row: &SqliteRow) -> Result<Record> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value: Option<String> = row.try_get(i)?;
        record.insert(column.name().to_string(), Value::from(value));
    }
    Ok(record)
}
