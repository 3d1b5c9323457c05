//! Ingestion pipeline orchestration.
//!
//! Coordinates the `maude build` flow: download → discover → classify →
//! hash → parse → evolve schema → append. Builds are resumable and
//! idempotent: a file whose content hash matches its `ingestion_log` entry
//! is skipped, and rows are keyed by a content hash so re-ingesting a
//! changed file only appends rows not already stored.
//!
//! All writes happen sequentially on one connection; only downloads run
//! concurrently.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;
use crate::flatfile;
use crate::hasher;
use crate::migrate;
use crate::models::{IngestionLogEntry, RecordType};
use crate::progress::{BuildProgressEvent, BuildProgressReporter, ProgressMode};
use crate::schema::{self, quote_ident, ROW_HASH};

/// Counters for one batch of files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub processed: u64,
    pub skipped: u64,
    pub errored: u64,
    pub total_rows: u64,
}

/// Options for [`run_build`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub skip_download: bool,
    /// Overrides `[ingest] data_dir`.
    pub data_dir: Option<PathBuf>,
    pub progress: ProgressMode,
}

/// Outcome of [`download_sources`].
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub files: Vec<PathBuf>,
    pub failed: usize,
}

/// Record type of a data file, from its name. Narrative text is checked
/// first since `foitext` and `foidev` names both carry the `foi` prefix.
pub fn classify_file(file_name: &str) -> Option<RecordType> {
    let lower = file_name.to_lowercase();
    if lower.contains("foitext") {
        Some(RecordType::Foitext)
    } else if lower.contains("foidev") {
        Some(RecordType::Foidev)
    } else if lower.contains("device") {
        Some(RecordType::Device)
    } else {
        None
    }
}

/// True when `file_name` is logged with exactly `file_hash`.
pub async fn is_file_ingested(pool: &SqlitePool, file_name: &str, file_hash: &str) -> Result<bool> {
    let stored: Option<String> =
        sqlx::query_scalar("SELECT file_hash FROM ingestion_log WHERE file_name = ?")
            .bind(file_name)
            .fetch_optional(pool)
            .await?;
    Ok(stored.as_deref() == Some(file_hash))
}

/// Insert or replace the ledger entry for a file.
pub async fn log_ingestion(pool: &SqlitePool, entry: &IngestionLogEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingestion_log (file_name, file_hash, record_type, rows_ingested, ingestion_timestamp)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(file_name) DO UPDATE SET
            file_hash = excluded.file_hash,
            record_type = excluded.record_type,
            rows_ingested = excluded.rows_ingested,
            ingestion_timestamp = excluded.ingestion_timestamp
        "#,
    )
    .bind(&entry.file_name)
    .bind(&entry.file_hash)
    .bind(entry.record_type.as_str())
    .bind(entry.rows_ingested)
    .bind(entry.timestamp)
    .execute(pool)
    .await?;
    Ok(())
}

/// Refresh the timestamp of an unchanged file's entry. Nothing else changes.
pub async fn touch_ingestion(pool: &SqlitePool, file_name: &str) -> Result<()> {
    sqlx::query("UPDATE ingestion_log SET ingestion_timestamp = ? WHERE file_name = ?")
        .bind(chrono::Utc::now().timestamp())
        .bind(file_name)
        .execute(pool)
        .await?;
    Ok(())
}

/// Every ledger entry, ordered by file name.
pub async fn ingestion_log(pool: &SqlitePool) -> Result<Vec<IngestionLogEntry>> {
    let rows = sqlx::query(
        "SELECT file_name, file_hash, record_type, rows_ingested, ingestion_timestamp \
         FROM ingestion_log ORDER BY file_name",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let record_type: String = row.try_get("record_type")?;
            Ok::<_, anyhow::Error>(IngestionLogEntry {
                file_name: row.try_get("file_name")?,
                file_hash: row.try_get("file_hash")?,
                record_type: record_type.parse()?,
                rows_ingested: row.try_get("rows_ingested")?,
                timestamp: row.try_get("ingestion_timestamp")?,
            })
        })
        .collect()
}

/// Parse one file and append its new rows to the table for `record_type`.
///
/// Returns the number of rows actually added. Rows whose hash is already
/// stored, and repeats within the file itself, are not counted.
pub async fn ingest_file(pool: &SqlitePool, path: &Path, record_type: RecordType) -> Result<u64> {
    let name = file_name(path);
    tracing::info!("processing {} as {}", name, record_type);

    let Some(parsed) = flatfile::read_data_file(path)? else {
        return Ok(0);
    };
    if parsed.is_empty() {
        tracing::warn!("no data in {}", name);
        return Ok(0);
    }

    let table = record_type.table();
    schema::evolve_table(pool, table, &parsed.columns).await?;

    // Columns the table failed to gain are dropped from the insert.
    let present = schema::table_columns(pool, table).await?;
    let insert_cols: Vec<usize> = parsed
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.as_str() != ROW_HASH && present.contains(c.as_str()))
        .map(|(i, _)| i)
        .collect();

    let stored: Vec<String> =
        sqlx::query_scalar(&format!("SELECT row_hash FROM {}", quote_ident(table)))
            .fetch_all(pool)
            .await?;
    let existing: HashSet<String> = stored.into_iter().collect();

    let fresh: Vec<(String, &Vec<Option<String>>)> = parsed
        .rows
        .iter()
        .map(|row| (hasher::hash_row(row), row))
        .filter(|(hash, _)| !existing.contains(hash))
        .collect();

    if fresh.is_empty() {
        tracing::info!("all rows from {} already exist in database", name);
        return Ok(0);
    }

    let column_list = std::iter::once(quote_ident(ROW_HASH))
        .chain(insert_cols.iter().map(|&i| quote_ident(&parsed.columns[i])))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; insert_cols.len() + 1].join(", ");
    let sql = format!(
        "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
        quote_ident(table),
        column_list,
        placeholders
    );

    let mut tx = pool.begin().await?;
    let mut added = 0u64;
    for (hash, row) in &fresh {
        let mut query = sqlx::query(&sql).bind(hash);
        for &i in &insert_cols {
            query = query.bind(row[i].as_deref());
        }
        added += query.execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;

    tracing::info!("ingested {} new rows from {}", added, name);
    Ok(added)
}

/// Run the per-file state machine over `paths`, in sorted order.
///
/// A file that fails to hash, parse or store is counted as errored and left
/// out of the ledger so the next build retries it. No per-file failure
/// aborts the batch.
pub async fn ingest_files(
    pool: &SqlitePool,
    paths: &[PathBuf],
    reporter: &dyn BuildProgressReporter,
) -> BuildSummary {
    let ordered: BTreeSet<&PathBuf> = paths.iter().collect();
    let total = ordered.len() as u64;
    let mut summary = BuildSummary::default();

    for (i, path) in ordered.into_iter().enumerate() {
        let name = file_name(path);
        reporter.report(BuildProgressEvent::Ingesting {
            file: name.clone(),
            n: i as u64 + 1,
            total,
        });

        let Some(record_type) = classify_file(&name) else {
            tracing::warn!("could not classify file: {}", name);
            summary.skipped += 1;
            continue;
        };

        match process_file(pool, path, &name, record_type).await {
            Ok(FileOutcome::Unchanged) => summary.skipped += 1,
            Ok(FileOutcome::Ingested(rows)) => {
                summary.processed += 1;
                summary.total_rows += rows;
            }
            Err(e) => {
                tracing::error!("error processing {}: {:#}", name, e);
                summary.errored += 1;
            }
        }
    }

    summary
}

enum FileOutcome {
    Unchanged,
    Ingested(u64),
}

async fn process_file(
    pool: &SqlitePool,
    path: &Path,
    name: &str,
    record_type: RecordType,
) -> Result<FileOutcome> {
    let file_hash = hasher::hash_file(path)
        .with_context(|| format!("failed to hash {}", path.display()))?;

    if is_file_ingested(pool, name, &file_hash).await? {
        tracing::info!("file already ingested (no changes): {}", name);
        touch_ingestion(pool, name).await?;
        return Ok(FileOutcome::Unchanged);
    }

    let rows = ingest_file(pool, path, record_type).await?;
    log_ingestion(
        pool,
        &IngestionLogEntry {
            file_name: name.to_string(),
            file_hash,
            record_type,
            rows_ingested: rows as i64,
            timestamp: chrono::Utc::now().timestamp(),
        },
    )
    .await?;
    Ok(FileOutcome::Ingested(rows))
}

/// Data files under `dir` matching the configured include / exclude globs, sorted.
pub fn discover_files(config: &Config, dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        tracing::debug!("data directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let include_set = build_globset(&config.ingest.include_globs)?;
    let exclude_set = build_globset(&config.ingest.exclude_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

/// Download every URL into `[ingest] cache_dir`, a few at a time.
///
/// Failures are logged and counted; they never fail the build.
pub async fn download_sources(
    config: &Config,
    urls: &[String],
    reporter: &dyn BuildProgressReporter,
) -> Result<DownloadReport> {
    let cache_dir = &config.ingest.cache_dir;
    tokio::fs::create_dir_all(cache_dir)
        .await
        .with_context(|| format!("failed to create cache dir {}", cache_dir.display()))?;

    let client = reqwest::Client::new();
    let total = urls.len() as u64;
    let mut results = stream::iter(urls)
        .map(|url| {
            let client = client.clone();
            async move { (url, download_one(&client, url, cache_dir).await) }
        })
        .buffer_unordered(config.ingest.download_concurrency.max(1));

    let mut report = DownloadReport::default();
    let mut done = 0u64;
    while let Some((url, result)) = results.next().await {
        done += 1;
        reporter.report(BuildProgressEvent::Downloading { n: done, total });
        match result {
            Ok(path) => report.files.push(path),
            Err(e) => {
                tracing::error!("failed to download {}: {:#}", url, e);
                report.failed += 1;
            }
        }
    }

    report.files.sort();
    tracing::info!("found {}/{} data files", report.files.len(), total);
    if report.failed > 0 {
        tracing::warn!("failed to download {}/{} data files", report.failed, total);
    }
    Ok(report)
}

async fn download_one(client: &reqwest::Client, url: &str, cache_dir: &Path) -> Result<PathBuf> {
    let name = url
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .with_context(|| format!("no file name in URL {}", url))?;
    let dest = cache_dir.join(name);
    let partial = cache_dir.join(format!("{}.part", name));

    let mut response = client.get(url).send().await?.error_for_status()?;
    let mut out = tokio::fs::File::create(&partial).await?;
    while let Some(chunk) = response.chunk().await? {
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    drop(out);

    tokio::fs::rename(&partial, &dest).await?;
    tracing::debug!("downloaded {} to {}", url, dest.display());
    Ok(dest)
}

/// `maude build`: create the store, fetch sources, ingest everything found.
pub async fn run_build(config: &Config, opts: &BuildOptions) -> Result<()> {
    tracing::info!("starting database build");
    tracing::info!("database path: {}", config.db.path.display());

    let pool = db::connect(config).await?;
    let result = build_with_pool(config, opts, &pool).await;
    pool.close().await;
    result
}

async fn build_with_pool(config: &Config, opts: &BuildOptions, pool: &SqlitePool) -> Result<()> {
    migrate::create_tables(pool).await?;
    let reporter = opts.progress.reporter();

    let mut files = Vec::new();
    let mut failed_downloads = 0;
    if !opts.skip_download && !config.ingest.download_urls.is_empty() {
        let report = download_sources(config, &config.ingest.download_urls, reporter.as_ref()).await?;
        failed_downloads = report.failed;
        files.extend(report.files);
    }

    let data_dir = opts.data_dir.as_ref().unwrap_or(&config.ingest.data_dir);
    for path in discover_files(config, data_dir)? {
        if !files.contains(&path) {
            files.push(path);
        }
    }

    let summary = ingest_files(pool, &files, reporter.as_ref()).await;

    println!("build");
    if failed_downloads > 0 {
        println!("  failed downloads: {}", failed_downloads);
    }
    println!("  files processed: {}", summary.processed);
    println!("  files skipped (already ingested): {}", summary.skipped);
    println!("  files with errors: {}", summary.errored);
    println!("  total rows ingested: {}", summary.total_rows);
    for rt in RecordType::ALL {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", rt.table()))
            .fetch_one(pool)
            .await?;
        println!("  table {}: {} rows", rt, count);
    }
    println!("ok");

    tracing::info!("database build complete");
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
