use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::models::RecordType;

/// `maude init`: create the store and its tables.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = create_tables(&pool).await;
    pool.close().await;
    result
}

/// Create the ledger and the three record tables. Idempotent.
///
/// Record tables start with only `row_hash`; every other column is added on
/// demand by [`crate::schema::evolve_table`].
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_log (
            file_name TEXT PRIMARY KEY,
            file_hash TEXT NOT NULL,
            record_type TEXT NOT NULL,
            rows_ingested INTEGER NOT NULL,
            ingestion_timestamp INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for record_type in RecordType::ALL {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (row_hash TEXT PRIMARY KEY)",
            record_type.table()
        ))
        .execute(pool)
        .await?;
    }

    tracing::info!("database tables initialized");
    Ok(())
}
