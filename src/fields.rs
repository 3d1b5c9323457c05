//! Searchable-field discovery, caching and validation.
//!
//! The set of fields the endpoint accepts is resolved in order from a local
//! JSON cache (valid for `[fields] expiry_days`), a sample record fetched
//! from the API, or the static [`KNOWN_FIELDS`] list. Unknown fields get a
//! "did you mean" suggestion by edit-distance similarity.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::Config;

const SECONDS_PER_DAY: f64 = 24.0 * 3600.0;
const SUGGESTION_CUTOFF: f64 = 0.6;

/// Searchable fields of the device-event endpoint, used when neither the
/// cache nor the API can supply a list.
pub const KNOWN_FIELDS: &[&str] = &[
    "date_facility_aware",
    "date_manufacturer_received",
    "date_of_event",
    "date_received",
    "date_report",
    "date_report_to_fda",
    "date_report_to_manufacturer",
    "device.baseline_510_k__number",
    "device.baseline_510_k__flag",
    "device.baseline_brand_name",
    "device.baseline_catalog_number",
    "device.baseline_date_ceased_marketing",
    "device.baseline_date_first_marketed",
    "device.baseline_device_family",
    "device.baseline_generic_name",
    "device.baseline_model_number",
    "device.baseline_pma_number",
    "device.baseline_pma_flag",
    "device.baseline_shelf_life_contained",
    "device.baseline_shelf_life_in_months",
    "device.brand_name",
    "device.catalog_number",
    "device.date_received",
    "device.date_removed_flag",
    "device.date_returned_to_manufacturer",
    "device.device_age_text",
    "device.device_availability",
    "device.device_date_of_manufacturer",
    "device.device_event_key",
    "device.device_name",
    "device.device_operator",
    "device.device_report_product_code",
    "device.device_sequence_number",
    "device.expiration_date_of_device",
    "device.generic_name",
    "device.implant_flag",
    "device.lot_number",
    "device.manufacturer_d_address_1",
    "device.manufacturer_d_address_2",
    "device.manufacturer_d_city",
    "device.manufacturer_d_country",
    "device.manufacturer_d_name",
    "device.manufacturer_d_postal_code",
    "device.manufacturer_d_state",
    "device.manufacturer_d_zip_code",
    "device.manufacturer_d_zip_code_ext",
    "device.model_number",
    "device.other_id_number",
    "device.device_sequence_no",
    "event_key",
    "event_location",
    "event_type",
    "health_professional",
    "initial_report_to_fda",
    "manufacturer_city",
    "manufacturer_contact_address_1",
    "manufacturer_contact_address_2",
    "manufacturer_contact_area_code",
    "manufacturer_contact_city",
    "manufacturer_contact_country",
    "manufacturer_contact_exchange",
    "manufacturer_contact_extension",
    "manufacturer_contact_f_name",
    "manufacturer_contact_l_name",
    "manufacturer_contact_pcity",
    "manufacturer_contact_pcountry",
    "manufacturer_contact_phone_number",
    "manufacturer_contact_plocal",
    "manufacturer_contact_postal_code",
    "manufacturer_contact_state",
    "manufacturer_contact_t_name",
    "manufacturer_contact_zip_code",
    "manufacturer_contact_zip_ext",
    "manufacturer_country",
    "manufacturer_g1_address_1",
    "manufacturer_g1_address_2",
    "manufacturer_g1_city",
    "manufacturer_g1_country",
    "manufacturer_g1_name",
    "manufacturer_g1_postal_code",
    "manufacturer_g1_state",
    "manufacturer_g1_zip_code",
    "manufacturer_g1_zip_code_ext",
    "manufacturer_link_flag",
    "manufacturer_name",
    "manufacturer_postal_code",
    "manufacturer_state",
    "manufacturer_zip_code",
    "manufacturer_zip_code_ext",
    "mdr_report_key",
    "mdr_text.mdr_text_key",
    "mdr_text.patient_sequence_number",
    "mdr_text.text",
    "mdr_text.text_type_code",
    "number_devices_in_event",
    "number_patients_in_event",
    "patient.date_received",
    "patient.patient_sequence_number",
    "patient.sequence_number_outcome",
    "patient.sequence_number_treatment",
    "previous_use_code",
    "product_problem_flag",
    "product_problems",
    "remedial_action",
    "removal_correction_number",
    "report_number",
    "report_source_code",
    "report_to_fda",
    "report_to_manufacturer",
    "reporter_occupation_code",
    "reprocessed_and_reused_flag",
    "single_use_flag",
    "source_type",
    "type_of_report",
];

/// Wall-clock source, in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

/// A clock stuck at one instant.
pub struct FixedClock(pub f64);

impl Clock for FixedClock {
    fn now(&self) -> f64 {
        self.0
    }
}

/// Where the cache document lives.
pub trait CacheStorage: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn read(&self) -> io::Result<Option<String>>;
    fn write(&self, contents: &str) -> io::Result<()>;
}

pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CacheStorage for FileStorage {
    fn read(&self) -> io::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, contents: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, contents)
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    contents: Mutex<Option<String>>,
}

impl CacheStorage for MemoryStorage {
    fn read(&self) -> io::Result<Option<String>> {
        let guard = self
            .contents
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "cache lock poisoned"))?;
        Ok(guard.clone())
    }

    fn write(&self, contents: &str) -> io::Result<()> {
        let mut guard = self
            .contents
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "cache lock poisoned"))?;
        *guard = Some(contents.to_string());
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    timestamp: f64,
    fields: Vec<String>,
}

/// Expiring on-disk (or in-memory) cache of the searchable-field list.
pub struct FieldCache<C: Clock, S: CacheStorage> {
    clock: C,
    storage: S,
    expiry_days: u64,
}

impl FieldCache<SystemClock, FileStorage> {
    pub fn from_config(config: &Config) -> Self {
        FieldCache::new(
            SystemClock,
            FileStorage::new(&config.fields.cache_path),
            config.fields.expiry_days,
        )
    }
}

impl<C: Clock, S: CacheStorage> FieldCache<C, S> {
    pub fn new(clock: C, storage: S, expiry_days: u64) -> Self {
        Self {
            clock,
            storage,
            expiry_days,
        }
    }

    /// Cached fields, or `None` when absent, unreadable or expired.
    pub fn load(&self) -> Option<Vec<String>> {
        let raw = match self.storage.read() {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("failed to load field cache: {}", e);
                return None;
            }
        };

        let doc: CacheDocument = match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("failed to load field cache: {}", e);
                return None;
            }
        };

        let age_days = (self.clock.now() - doc.timestamp) / SECONDS_PER_DAY;
        if age_days > self.expiry_days as f64 {
            tracing::info!("field cache expired ({:.1} days old)", age_days);
            return None;
        }

        tracing::debug!("loaded {} fields from cache", doc.fields.len());
        Some(doc.fields)
    }

    /// Store `fields` (sorted) with the current time. Failures are logged.
    pub fn save(&self, fields: &[String]) {
        let mut sorted = fields.to_vec();
        sorted.sort();
        let doc = CacheDocument {
            timestamp: self.clock.now(),
            fields: sorted,
        };
        let written = serde_json::to_string_pretty(&doc)
            .map_err(io::Error::from)
            .and_then(|json| self.storage.write(&json));
        match written {
            Ok(()) => tracing::debug!("saved {} fields to cache", fields.len()),
            Err(e) => tracing::warn!("failed to save field cache: {}", e),
        }
    }
}

/// Every dotted path in a JSON object. Lists are explored through their
/// first element.
pub fn field_paths(value: &serde_json::Value) -> Vec<String> {
    fn walk(value: &serde_json::Value, prefix: &str, out: &mut BTreeSet<String>) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, child) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    if child.is_object() || child.is_array() {
                        walk(child, &path, out);
                    }
                    out.insert(path);
                }
            }
            serde_json::Value::Array(items) => {
                if let Some(first) = items.first() {
                    walk(first, prefix, out);
                }
            }
            _ => {}
        }
    }

    let mut out = BTreeSet::new();
    walk(value, "", &mut out);
    out.into_iter().collect()
}

/// Field paths of one sample record from `endpoint`, or `None` on any failure.
pub async fn fetch_fields_from_api(client: &reqwest::Client, endpoint: &str) -> Option<Vec<String>> {
    let url = format!("{}?limit=1", endpoint);
    let response = client
        .get(&url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .and_then(|r| r.error_for_status());
    let response = match response {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("failed to fetch fields from API: {}", e);
            return None;
        }
    };

    let data: serde_json::Value = match response.json().await {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!("failed to fetch fields from API: {}", e);
            return None;
        }
    };

    let Some(sample) = data
        .get("results")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
    else {
        tracing::warn!("no results in API response");
        return None;
    };

    let fields = field_paths(sample);
    tracing::info!("fetched {} fields from API", fields.len());
    Some(fields)
}

/// Resolve the searchable-field list: cache, then API, then [`KNOWN_FIELDS`].
/// The resolved list is written back to the cache unless it came from there.
pub async fn resolve_fields<C: Clock, S: CacheStorage>(
    cache: &FieldCache<C, S>,
    client: &reqwest::Client,
    endpoint: &str,
    force_refresh: bool,
) -> Vec<String> {
    if !force_refresh {
        if let Some(fields) = cache.load() {
            return fields;
        }
    }

    tracing::info!("fetching searchable fields from API");
    let fields = match fetch_fields_from_api(client, endpoint).await {
        Some(fields) => fields,
        None => {
            tracing::info!("using static list of {} known fields", KNOWN_FIELDS.len());
            known_fields()
        }
    };
    cache.save(&fields);
    fields
}

fn known_fields() -> Vec<String> {
    KNOWN_FIELDS.iter().map(|s| s.to_string()).collect()
}

/// Outcome of validating one field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldCheck {
    Valid,
    Invalid { suggestion: Option<String> },
}

pub struct FieldValidator {
    fields: Vec<String>,
    lookup: HashSet<String>,
}

impl FieldValidator {
    pub fn new(fields: Vec<String>) -> Self {
        let lookup = fields.iter().cloned().collect();
        Self { fields, lookup }
    }

    /// Validator over the static field list.
    pub fn known() -> Self {
        Self::new(known_fields())
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn validate(&self, field: &str) -> FieldCheck {
        if self.lookup.contains(field) {
            return FieldCheck::Valid;
        }
        FieldCheck::Invalid {
            suggestion: self.suggest(field),
        }
    }

    /// Invalid fields mapped to their suggestion. Empty when all are valid.
    pub fn validate_all<S: AsRef<str>>(&self, fields: &[S]) -> BTreeMap<String, Option<String>> {
        fields
            .iter()
            .map(|f| f.as_ref())
            .filter_map(|f| match self.validate(f) {
                FieldCheck::Valid => None,
                FieldCheck::Invalid { suggestion } => Some((f.to_string(), suggestion)),
            })
            .collect()
    }

    /// Closest known field scoring at least the cutoff; ties go to the
    /// earliest field in the list.
    fn suggest(&self, field: &str) -> Option<String> {
        let mut best: Option<(&String, f64)> = None;
        for candidate in &self.fields {
            let score = similarity(field, candidate);
            if score >= SUGGESTION_CUTOFF && best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((candidate, score));
            }
        }
        best.map(|(f, _)| f.clone())
    }
}

/// Similarity in `[0, 1]`: one minus the Levenshtein distance over the
/// longer length.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Resolve the field list the way searches see it.
pub async fn load_validator(config: &Config, force_refresh: bool) -> FieldValidator {
    let cache = FieldCache::from_config(config);
    let client = reqwest::Client::new();
    let fields = resolve_fields(&cache, &client, &config.api.base_endpoint, force_refresh).await;
    FieldValidator::new(fields)
}

/// `maude fields list`
pub async fn run_list(config: &Config) -> Result<()> {
    let validator = load_validator(config, false).await;
    for field in validator.fields() {
        println!("{}", field);
    }
    Ok(())
}

/// `maude fields check`: prints one line per field; false if any is invalid.
pub async fn run_check(config: &Config, fields: &[String]) -> Result<bool> {
    let validator = load_validator(config, false).await;
    let mut all_valid = true;
    for field in fields {
        match validator.validate(field) {
            FieldCheck::Valid => println!("{:<40} ok", field),
            FieldCheck::Invalid { suggestion: Some(s) } => {
                all_valid = false;
                println!("{:<40} invalid (did you mean '{}'?)", field, s);
            }
            FieldCheck::Invalid { suggestion: None } => {
                all_valid = false;
                println!("{:<40} invalid", field);
            }
        }
    }
    Ok(all_valid)
}

/// `maude fields refresh`
pub async fn run_refresh(config: &Config) -> Result<()> {
    let validator = load_validator(config, true).await;
    println!("refreshed field cache: {} fields", validator.fields().len());
    println!("  cache: {}", config.fields.cache_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: f64 = 1_700_000_000.0;

    fn cache_at(now: f64, storage: MemoryStorage) -> FieldCache<FixedClock, MemoryStorage> {
        FieldCache::new(FixedClock(now), storage, 7)
    }

    #[test]
    fn cache_round_trip_and_expiry() {
        let cache = cache_at(NOW, MemoryStorage::default());
        assert!(cache.load().is_none());
        cache.save(&["b".to_string(), "a".to_string()]);
        assert_eq!(cache.load(), Some(vec!["a".to_string(), "b".to_string()]));

        let raw = cache.storage.read().unwrap().unwrap();
        let six_days = cache_at(NOW + 6.0 * SECONDS_PER_DAY, MemoryStorage::default());
        six_days.storage.write(&raw).unwrap();
        assert!(six_days.load().is_some());

        let eight_days = cache_at(NOW + 8.0 * SECONDS_PER_DAY, MemoryStorage::default());
        eight_days.storage.write(&raw).unwrap();
        assert!(eight_days.load().is_none());
    }

    #[test]
    fn corrupt_cache_is_ignored() {
        let cache = cache_at(NOW, MemoryStorage::default());
        cache.storage.write("{not json").unwrap();
        assert!(cache.load().is_none());
    }

    #[test]
    fn file_storage_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested/fields.json"));
        assert!(storage.read().unwrap().is_none());
        storage.write("{}").unwrap();
        assert_eq!(storage.read().unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn paths_descend_into_first_list_element() {
        let sample = json!({
            "report_number": "1",
            "device": [{"brand_name": "X", "openfda": {"device_name": "Y"}}, {"other": 1}],
            "mdr_text": [{"text": "t"}]
        });
        assert_eq!(
            field_paths(&sample),
            vec![
                "device",
                "device.brand_name",
                "device.openfda",
                "device.openfda.device_name",
                "mdr_text",
                "mdr_text.text",
                "report_number",
            ]
        );
    }

    #[tokio::test]
    async fn resolve_prefers_fresh_cache() {
        let cache = cache_at(NOW, MemoryStorage::default());
        cache.save(&["cached.field".to_string()]);
        let client = reqwest::Client::new();
        let fields = resolve_fields(&cache, &client, "http://127.0.0.1:9/event.json", false).await;
        assert_eq!(fields, vec!["cached.field"]);
    }

    #[tokio::test]
    async fn resolve_falls_back_to_known_fields_and_saves() {
        let cache = cache_at(NOW, MemoryStorage::default());
        let client = reqwest::Client::new();
        // Port 9 (discard) refuses connections on loopback.
        let fields = resolve_fields(&cache, &client, "http://127.0.0.1:9/event.json", true).await;
        assert_eq!(fields.len(), KNOWN_FIELDS.len());
        assert_eq!(cache.load().map(|f| f.len()), Some(KNOWN_FIELDS.len()));
    }

    #[test]
    fn validator_suggests_close_fields() {
        let v = FieldValidator::known();
        assert_eq!(v.validate("mdr_text.text"), FieldCheck::Valid);
        assert_eq!(
            v.validate("device.brand_nme"),
            FieldCheck::Invalid {
                suggestion: Some("device.brand_name".into())
            }
        );
        assert_eq!(v.validate("zzzz"), FieldCheck::Invalid { suggestion: None });

        let invalid = v.validate_all(&["report_number", "reportnumber"]);
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid["reportnumber"].as_deref(), Some("report_number"));
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!((similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
        assert!(similarity("mdr_txt.text", "mdr_text.text") >= SUGGESTION_CUTOFF);
    }
}
