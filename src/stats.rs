//! Store statistics.
//!
//! `maude stats` summarizes what the historical store holds: file size, row
//! counts per record table, and the ingestion ledger.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::ingest;
use crate::local::database_exists;
use crate::models::RecordType;

/// Row count per record table. Empty when there is no store or it cannot be read.
pub async fn table_stats(db_path: &Path) -> BTreeMap<String, i64> {
    if !database_exists(db_path) {
        return BTreeMap::new();
    }

    let pool = match db::connect_path(db_path, false).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("error getting table stats: {:#}", e);
            return BTreeMap::new();
        }
    };

    let mut stats = BTreeMap::new();
    for rt in RecordType::ALL {
        let count: Result<i64, sqlx::Error> =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", rt.table()))
                .fetch_one(&pool)
                .await;
        match count {
            Ok(count) => {
                stats.insert(rt.as_str().to_string(), count);
            }
            Err(e) => {
                tracing::error!("error getting table stats: {}", e);
                stats.clear();
                break;
            }
        }
    }

    pool.close().await;
    stats
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let path = &config.db.path;

    println!("MAUDE Search: Database Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", path.display());

    if !database_exists(path) {
        println!("  Status:      not built (run `maude build`)");
        println!();
        return Ok(());
    }

    let db_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    println!("  Size:        {}", format_bytes(db_size));
    println!();

    let tables = table_stats(path).await;
    let total: i64 = tables.values().sum();
    for rt in RecordType::ALL {
        let count = tables.get(rt.as_str()).copied().unwrap_or(0);
        println!("  {:<12} {:>10} rows", format!("{}:", rt), count);
    }
    println!("  {:<12} {:>10} rows", "total:", total);

    let pool = db::connect_path(path, false).await?;
    let log = ingest::ingestion_log(&pool).await;
    pool.close().await;
    let log = log?;

    if !log.is_empty() {
        println!();
        println!("  Ingested files:");
        println!(
            "  {:<28} {:<8} {:>10}   {}",
            "FILE", "TYPE", "ROWS", "LAST INGESTED"
        );
        println!("  {}", "-".repeat(72));
        for entry in &log {
            println!(
                "  {:<28} {:<8} {:>10}   {}",
                entry.file_name,
                entry.record_type,
                entry.rows_ingested,
                format_ts_relative(entry.timestamp)
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
