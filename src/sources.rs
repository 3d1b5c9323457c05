//! The two record origins behind a common search interface, and the
//! `maude sources` status listing.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

use crate::config::Config;
use crate::errors::FetchError;
use crate::fetch::{FetchRequest, RemoteFetcher};
use crate::local::{self, LocalQuery};
use crate::models::{Record, TermGroups};
use crate::stats;

/// Terms shared by every origin for one search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub terms: TermGroups,
    pub exclude: Option<TermGroups>,
}

/// An origin of search results.
#[async_trait]
pub trait RecordSource: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Record>, FetchError>;
}

/// The openFDA endpoint.
pub struct RemoteSource {
    pub fetcher: RemoteFetcher,
    pub search_fields: Vec<String>,
    pub limit: usize,
    pub max_pages: usize,
    pub sort: Option<String>,
}

impl RemoteSource {
    pub fn request(&self, query: &SearchQuery) -> FetchRequest {
        FetchRequest {
            keywords: query.terms.clone(),
            exclude: query.exclude.clone(),
            search_fields: self.search_fields.clone(),
            limit: self.limit,
            max_pages: self.max_pages,
            sort: self.sort.clone(),
        }
    }
}

#[async_trait]
impl RecordSource for RemoteSource {
    fn name(&self) -> &str {
        "openfda"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Record>, FetchError> {
        self.fetcher.fetch(&self.request(query)).await
    }
}

/// The locally ingested historical store. Never fails.
pub struct LocalStore {
    pub db_path: PathBuf,
    pub search_field: String,
    pub limit: Option<usize>,
}

#[async_trait]
impl RecordSource for LocalStore {
    fn name(&self) -> &str {
        "local_db"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Record>, FetchError> {
        let local_query = LocalQuery {
            terms: query.terms.clone(),
            exclude: query.exclude.clone(),
            search_field: self.search_field.clone(),
            limit: self.limit,
        };
        Ok(local::query_local(&self.db_path, &local_query).await)
    }
}

/// `maude sources`: print each origin and whether it is usable.
pub async fn list_sources(config: &Config) -> Result<()> {
    let endpoint = &config.api.base_endpoint;
    let remote_ok = endpoint.starts_with("http://") || endpoint.starts_with("https://");

    let db_path = &config.db.path;
    let tables = stats::table_stats(db_path).await;
    let (local_status, local_ok) = if !config.local.enabled {
        ("DISABLED".to_string(), false)
    } else if !local::database_exists(db_path) {
        ("NOT BUILT".to_string(), false)
    } else {
        let rows: i64 = tables.values().sum();
        (format!("OK ({} rows)", rows), true)
    };

    println!("{:<10} {:<20} {:<8} LOCATION", "SOURCE", "STATUS", "HEALTHY");
    println!(
        "{:<10} {:<20} {:<8} {}",
        "openfda",
        if remote_ok { "OK" } else { "INVALID URL" },
        remote_ok,
        endpoint
    );
    println!(
        "{:<10} {:<20} {:<8} {}",
        "local_db",
        local_status,
        local_ok,
        db_path.display()
    );

    Ok(())
}
