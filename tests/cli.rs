use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn maude_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("maude");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let raw_dir = root.join("raw");
    fs::create_dir_all(&raw_dir).unwrap();
    fs::write(
        raw_dir.join("foitext2000.txt"),
        "MDR_REPORT_KEY|MDR_TEXT_KEY|TEXT_TYPE_CODE|FOI_TEXT\n\
         1|11|D|PATIENT UNDERWENT MRI AFTER STAPES SURGERY\n\
         2|12|D|MRI ARTIFACT ONLY\n\
         3|13|D|PUMP OCCLUSION ALARM\n",
    )
    .unwrap();
    fs::write(
        raw_dir.join("device2000.txt"),
        "MDR_REPORT_KEY|BRAND_NAME|GENERIC_NAME\n1|ACME|STAPES PROSTHESIS\n",
    )
    .unwrap();
    fs::write(raw_dir.join("README.txt"), "not data").unwrap();

    // Port 9 (discard) is never listening, so remote calls fail fast.
    let config_content = format!(
        r#"[db]
path = "{root}/data/maude.sqlite3"

[api]
base_endpoint = "http://127.0.0.1:9/device/event.json"
limit = 100

[ingest]
data_dir = "{root}/raw"
cache_dir = "{root}/cache"
download_urls = []

[fields]
cache_path = "{root}/data/fields.json"
"#,
        root = root.display()
    );

    let config_path = root.join("maude.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_maude(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = maude_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run maude binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn build(config_path: &Path) -> String {
    let (stdout, stderr, success) = run_maude(config_path, &["build", "--progress", "off"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_maude(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/maude.sqlite3").exists());

    let (_, _, again) = run_maude(&config_path, &["init"]);
    assert!(again, "Second init failed (not idempotent)");
}

#[test]
fn test_build_ingests_local_files() {
    let (_tmp, config_path) = setup_test_env();

    let stdout = build(&config_path);
    assert!(stdout.contains("files processed: 2"), "got: {}", stdout);
    assert!(stdout.contains("total rows ingested: 4"), "got: {}", stdout);
    assert!(stdout.contains("table foitext: 3 rows"), "got: {}", stdout);
    assert!(stdout.contains("table device: 1 rows"), "got: {}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_build_rerun_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    build(&config_path);
    let stdout = build(&config_path);
    assert!(stdout.contains("files processed: 0"), "got: {}", stdout);
    assert!(stdout.contains("files skipped (already ingested): 2"), "got: {}", stdout);
    assert!(stdout.contains("table foitext: 3 rows"), "got: {}", stdout);
}

#[test]
fn test_build_from_alternate_data_dir() {
    let (tmp, config_path) = setup_test_env();
    let other = tmp.path().join("other");
    fs::create_dir_all(&other).unwrap();
    fs::write(
        other.join("foidev1999.txt"),
        "MDR_REPORT_KEY|BRAND_NAME\n9|OLD PUMP\n",
    )
    .unwrap();

    let (stdout, stderr, success) = run_maude(
        &config_path,
        &[
            "build",
            "--skip-download",
            "--data-dir",
            other.to_str().unwrap(),
            "--progress",
            "off",
        ],
    );
    assert!(success, "build failed: stderr={}", stderr);
    assert!(stdout.contains("table foidev: 1 rows"), "got: {}", stdout);
    assert!(stdout.contains("table foitext: 0 rows"), "got: {}", stdout);
}

#[test]
fn test_stats_lists_tables_and_files() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_maude(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("not built"));

    build(&config_path);
    let (stdout, stderr, success) = run_maude(&config_path, &["stats"]);
    assert!(success, "stats failed: stderr={}", stderr);
    assert!(stdout.contains("foitext:"));
    assert!(stdout.contains("foitext2000.txt"));
    assert!(stdout.contains("device2000.txt"));
}

#[test]
fn test_sources_reports_local_status() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_maude(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("openfda"));
    assert!(stdout.contains("NOT BUILT"));

    build(&config_path);
    let (stdout, _, _) = run_maude(&config_path, &["sources"]);
    assert!(stdout.contains("OK (4 rows)"), "got: {}", stdout);
}

#[test]
fn test_local_search_json() {
    let (_tmp, config_path) = setup_test_env();
    build(&config_path);

    let (stdout, stderr, success) = run_maude(
        &config_path,
        &["search", "mri", "--origin", "local", "-o", "json", "-x", "artifact"],
    );
    assert!(success, "search failed: stderr={}", stderr);

    let records: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["mdr_report_key"], "1");
    assert_eq!(records[0]["_source"], "local_db:foitext");
}

#[test]
fn test_local_search_by_remote_field_name() {
    let (_tmp, config_path) = setup_test_env();
    build(&config_path);

    let (stdout, _, success) = run_maude(
        &config_path,
        &[
            "search",
            "stapes",
            "--origin",
            "local",
            "--local-field",
            "device.generic_name",
            "-o",
            "json",
        ],
    );
    assert!(success);
    let records: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["_source"], "local_db:device");
}

#[test]
fn test_output_suffix_overrides_format() {
    let (tmp, config_path) = setup_test_env();
    build(&config_path);
    let out = tmp.path().join("results.csv");

    let (_, stderr, success) = run_maude(
        &config_path,
        &[
            "search",
            "MRI,PUMP",
            "--origin",
            "local",
            "-O",
            out.to_str().unwrap(),
        ],
    );
    assert!(success, "search failed: stderr={}", stderr);

    let csv = fs::read_to_string(&out).unwrap();
    let mut lines = csv.lines();
    let header = lines.next().unwrap();
    assert!(header.contains("foi_text"));
    assert!(header.contains("_source"));
    assert_eq!(lines.count(), 3);
}

#[test]
fn test_remote_search_unreachable_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_maude(
        &config_path,
        &["search", "mri", "--origin", "remote", "--no-validate"],
    );
    assert!(!success);
    assert!(stderr.contains("failed to connect"), "got: {}", stderr);
}

#[test]
fn test_fields_check_suggests_correction() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_maude(&config_path, &["fields", "check", "mdr_text.text"]);
    assert!(success);
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_maude(&config_path, &["fields", "check", "mdr_txt.text"]);
    assert!(!success);
    assert!(stdout.contains("did you mean 'mdr_text.text'"), "got: {}", stdout);
}

#[test]
fn test_search_requires_terms() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_maude(&config_path, &["search"]);
    assert!(!success);
}
