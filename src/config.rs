use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub fields: FieldsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/maude.sqlite3")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_endpoint")]
    pub base_endpoint: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Page cap across all search fields; 0 means follow continuation links until exhausted.
    #[serde(default)]
    pub max_pages: usize,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default = "default_search_fields")]
    pub search_fields: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_endpoint: default_base_endpoint(),
            limit: default_limit(),
            max_pages: 0,
            sort: None,
            search_fields: default_search_fields(),
            timeout_secs: None,
        }
    }
}

fn default_base_endpoint() -> String {
    "https://api.fda.gov/device/event.json".to_string()
}
fn default_limit() -> usize {
    1000
}
fn default_search_fields() -> Vec<String> {
    vec!["mdr_text.text".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_local_field")]
    pub search_field: String,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Remote field path → local column, used when a search field is given
    /// in its remote form.
    #[serde(default = "default_field_map")]
    pub field_map: BTreeMap<String, String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_field: default_local_field(),
            limit: None,
            field_map: default_field_map(),
        }
    }
}

impl LocalConfig {
    /// Local column for a field name given in either remote or local form.
    pub fn map_field(&self, field: &str) -> String {
        self.field_map
            .get(field)
            .cloned()
            .unwrap_or_else(|| field.to_string())
    }
}

fn default_true() -> bool {
    true
}
fn default_local_field() -> String {
    "foi_text".to_string()
}
fn default_field_map() -> BTreeMap<String, String> {
    [
        ("mdr_text.text", "foi_text"),
        ("device.brand_name", "brand_name"),
        ("device.generic_name", "generic_name"),
        ("device.manufacturer_d_name", "manufacturer_d_name"),
        ("device.model_number", "model_number"),
        ("device.device_report_product_code", "device_report_product_code"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_download_urls")]
    pub download_urls: Vec<String>,
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache_dir: default_cache_dir(),
            include_globs: default_include_globs(),
            exclude_globs: default_exclude_globs(),
            download_urls: default_download_urls(),
            download_concurrency: default_download_concurrency(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/raw")
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.zip".to_string(),
        "**/*.txt".to_string(),
        "**/*.csv".to_string(),
    ]
}
fn default_exclude_globs() -> Vec<String> {
    vec!["**/*readme*".to_string(), "**/*README*".to_string()]
}
fn default_download_concurrency() -> usize {
    4
}

const MAUDE_DOWNLOAD_BASE: &str = "https://www.accessdata.fda.gov/MAUDE/ftparea";

/// Historical archives: narrative text and device rows through 2008,
/// plus the pre-2000 device file family.
fn default_download_urls() -> Vec<String> {
    let mut names = vec![
        "foidevthru1997.zip".to_string(),
        "foidev1998.zip".to_string(),
        "foidev1999.zip".to_string(),
    ];
    names.extend((2000..=2008).map(|y| format!("device{}.zip", y)));
    names.push("foitextthru1995.zip".to_string());
    names.extend((1996..=2008).map(|y| format!("foitext{}.zip", y)));
    names
        .into_iter()
        .map(|n| format!("{}/{}", MAUDE_DOWNLOAD_BASE, n))
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FieldsConfig {
    #[serde(default = "default_fields_cache")]
    pub cache_path: PathBuf,
    #[serde(default = "default_expiry_days")]
    pub expiry_days: u64,
    #[serde(default = "default_true")]
    pub validate: bool,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            cache_path: default_fields_cache(),
            expiry_days: default_expiry_days(),
            validate: true,
        }
    }
}

fn default_fields_cache() -> PathBuf {
    PathBuf::from("./data/searchable_fields.json")
}
fn default_expiry_days() -> u64 {
    7
}

impl Config {
    /// All defaults; used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.api.limit == 0 {
        anyhow::bail!("api.limit must be >= 1");
    }

    if config.api.search_fields.is_empty() {
        anyhow::bail!("api.search_fields must name at least one field");
    }

    if !config.api.base_endpoint.starts_with("http://")
        && !config.api.base_endpoint.starts_with("https://")
    {
        anyhow::bail!(
            "api.base_endpoint must be an http(s) URL, got '{}'",
            config.api.base_endpoint
        );
    }

    if config.local.limit == Some(0) {
        anyhow::bail!("local.limit must be >= 1 when set");
    }

    if config.ingest.download_concurrency == 0 {
        anyhow::bail!("ingest.download_concurrency must be >= 1");
    }

    Ok(())
}
