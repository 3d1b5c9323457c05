use std::fs;
use std::path::{Path, PathBuf};

use maude_search::db;
use maude_search::ingest;
use maude_search::local::{self, LocalQuery};
use maude_search::migrate;
use maude_search::models::{Record, SOURCE_KEY};
use maude_search::progress::NoProgress;
use tempfile::TempDir;

fn groups(g: &[&[&str]]) -> Vec<Vec<String>> {
    g.iter()
        .map(|grp| grp.iter().map(|s| s.to_string()).collect())
        .collect()
}

async fn build_store() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("maude.sqlite3");
    let raw = tmp.path().join("raw");
    fs::create_dir_all(&raw).unwrap();

    fs::write(
        raw.join("foitext2000.txt"),
        [
            "MDR_REPORT_KEY|MDR_TEXT_KEY|TEXT_TYPE_CODE|FOI_TEXT",
            "1|11|D|PATIENT UNDERWENT MRI; STAPES PROSTHESIS MIGRATED",
            "2|12|D|MAGNET ATTRACTED TYMPANOSTOMY TUBE",
            "3|13|D|MRI ARTIFACT OBSERVED NEAR STAPES IMPLANT",
            "4|14|D|UNRELATED BATTERY COMPLAINT",
            "5|15|D|50%_OFF LABEL PRINTED ON MRI COIL, STAPES REVIEWED",
        ]
        .join("\n"),
    )
    .unwrap();
    fs::write(
        raw.join("device2000.txt"),
        [
            "MDR_REPORT_KEY|BRAND_NAME|GENERIC_NAME",
            "1|ACME STAPES|EAR PROSTHESIS",
            "2|OTOTUBE|TYMPANOSTOMY TUBE",
        ]
        .join("\n"),
    )
    .unwrap();

    let pool = db::connect_path(&db_path, true).await.unwrap();
    migrate::create_tables(&pool).await.unwrap();
    let files = vec![raw.join("foitext2000.txt"), raw.join("device2000.txt")];
    ingest::ingest_files(&pool, &files, &NoProgress).await;
    pool.close().await;

    (tmp, db_path)
}

fn query(terms: &[&[&str]], field: &str) -> LocalQuery {
    LocalQuery {
        terms: groups(terms),
        exclude: None,
        search_field: field.to_string(),
        limit: None,
    }
}

fn keys(records: &[Record]) -> Vec<String> {
    let mut keys: Vec<String> = records
        .iter()
        .map(|r| r["mdr_report_key"].to_string())
        .collect();
    keys.sort();
    keys
}

async fn search(db_path: &Path, q: &LocalQuery) -> Vec<Record> {
    local::query_local(db_path, q).await
}

#[tokio::test]
async fn test_and_of_or_groups_over_narrative_text() {
    let (_tmp, db_path) = build_store().await;

    let results = search(&db_path, &query(&[&["mri", "magnet"], &["stapes", "tymp"]], "foi_text")).await;
    assert_eq!(keys(&results), vec!["1", "2", "3", "5"]);
    for record in &results {
        assert_eq!(record[SOURCE_KEY].to_string(), "local_db:foitext");
        assert!(record.contains_key("row_hash"));
    }
}

#[tokio::test]
async fn test_remote_field_name_is_accepted_after_mapping() {
    let (_tmp, db_path) = build_store().await;
    let mapped = maude_search::config::LocalConfig::default().map_field("mdr_text.text");
    assert_eq!(mapped, "foi_text");

    let results = search(&db_path, &query(&[&["battery"]], &mapped)).await;
    assert_eq!(keys(&results), vec!["4"]);
}

#[tokio::test]
async fn test_exclusions_drop_matching_rows() {
    let (_tmp, db_path) = build_store().await;

    let mut q = query(&[&["mri"], &["stapes"]], "foi_text");
    q.exclude = Some(groups(&[&["artifact"]]));
    assert_eq!(keys(&search(&db_path, &q).await), vec!["1", "5"]);

    // A record is dropped only when it matches every exclusion group.
    q.exclude = Some(groups(&[&["artifact"], &["battery"]]));
    assert_eq!(keys(&search(&db_path, &q).await), vec!["1", "3", "5"]);
}

#[tokio::test]
async fn test_like_wildcards_match_literally() {
    let (_tmp, db_path) = build_store().await;

    let results = search(&db_path, &query(&[&["50%_off"]], "foi_text")).await;
    assert_eq!(keys(&results), vec!["5"]);

    let results = search(&db_path, &query(&[&["50_"]], "foi_text")).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_limit_caps_rows() {
    let (_tmp, db_path) = build_store().await;

    let mut q = query(&[&["mri"]], "foi_text");
    q.limit = Some(2);
    assert_eq!(search(&db_path, &q).await.len(), 2);
}

#[tokio::test]
async fn test_device_fields_search_device_tables() {
    let (_tmp, db_path) = build_store().await;

    let results = search(&db_path, &query(&[&["tympanostomy"]], "generic_name")).await;
    assert_eq!(keys(&results), vec!["2"]);
    assert_eq!(results[0][SOURCE_KEY].to_string(), "local_db:device");
}

#[tokio::test]
async fn test_missing_column_yields_nothing() {
    let (_tmp, db_path) = build_store().await;

    let results = search(&db_path, &query(&[&["mri"]], "event_location")).await;
    assert!(results.is_empty());
}
