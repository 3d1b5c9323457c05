//! Federated search: remote endpoint and local store queried concurrently,
//! then merged and rendered.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::errors::FetchError;
use crate::fetch::RemoteFetcher;
use crate::fields;
use crate::format::{self, OutputFormat, RenderOptions};
use crate::local;
use crate::merge::{self, MergeOrder};
use crate::models::{Record, TermGroups};
use crate::sources::{LocalStore, RecordSource, RemoteSource, SearchQuery};

/// Which origins a search consults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Origin {
    #[default]
    All,
    Remote,
    Local,
}

/// One search. Fields left `None` fall back to the config.
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub terms: TermGroups,
    pub exclude: Option<TermGroups>,
    pub search_fields: Option<Vec<String>>,
    pub local_field: Option<String>,
    pub limit: Option<usize>,
    pub max_pages: Option<usize>,
    pub sort: Option<String>,
    pub origin: Origin,
    /// Check remote search fields against the known field list first.
    pub validate: bool,
}

/// Where and how results are written.
#[derive(Debug, Clone)]
pub struct OutputArgs {
    pub format: OutputFormat,
    pub output: Option<PathBuf>,
    pub render: RenderOptions,
}

/// Run a search and return the merged records, remote first.
pub async fn search_records(config: &Config, args: &SearchArgs) -> Result<Vec<Record>> {
    let query = SearchQuery {
        terms: args.terms.clone(),
        exclude: args.exclude.clone().filter(|g| !g.is_empty()),
    };

    let remote = if args.origin != Origin::Local {
        if query.terms.is_empty() {
            bail!("at least one search term group is required for a remote search");
        }
        Some(remote_source(config, args)?)
    } else {
        None
    };

    if let Some(source) = &remote {
        if args.validate && config.fields.validate {
            let validator = fields::load_validator(config, false).await;
            source
                .fetcher
                .preflight(&source.request(&query), &validator)?;
        }
    }

    let local = if args.origin != Origin::Remote
        && config.local.enabled
        && local::database_exists(&config.db.path)
    {
        Some(local_store(config, args))
    } else {
        None
    };

    let (remote_results, local_results) = tokio::join!(
        run_remote(remote.as_ref(), &query),
        run_source(local.as_ref().map(|s| s as &dyn RecordSource), &query),
    );

    let remote_results = remote_results?;
    let local_results = local_results?;
    tracing::info!(
        "{} remote and {} local results",
        remote_results.len(),
        local_results.len()
    );

    Ok(merge::merge_results(
        remote_results,
        local_results,
        MergeOrder::RemoteFirst,
    ))
}

fn remote_source(config: &Config, args: &SearchArgs) -> Result<RemoteSource> {
    let timeout = config.api.timeout_secs.map(Duration::from_secs);
    let fetcher = RemoteFetcher::new(&config.api.base_endpoint, timeout)?;
    Ok(RemoteSource {
        fetcher,
        search_fields: args
            .search_fields
            .clone()
            .unwrap_or_else(|| config.api.search_fields.clone()),
        limit: args.limit.unwrap_or(config.api.limit),
        max_pages: args.max_pages.unwrap_or(config.api.max_pages),
        sort: args.sort.clone().or_else(|| config.api.sort.clone()),
    })
}

fn local_store(config: &Config, args: &SearchArgs) -> LocalStore {
    let field = args
        .local_field
        .clone()
        .unwrap_or_else(|| config.local.search_field.clone());
    LocalStore {
        db_path: config.db.path.clone(),
        search_field: config.local.map_field(&field),
        limit: config.local.limit,
    }
}

/// A "no matches" answer from the endpoint is an empty result, not a failure.
async fn run_remote(source: Option<&RemoteSource>, query: &SearchQuery) -> Result<Vec<Record>, FetchError> {
    match run_source(source.map(|s| s as &dyn RecordSource), query).await {
        Err(FetchError::Api { status: 404, message }) => {
            tracing::info!("no remote matches: {}", message);
            Ok(Vec::new())
        }
        other => other,
    }
}

async fn run_source(source: Option<&dyn RecordSource>, query: &SearchQuery) -> Result<Vec<Record>, FetchError> {
    match source {
        Some(source) => {
            tracing::debug!("searching {}", source.name());
            source.search(query).await
        }
        None => Ok(Vec::new()),
    }
}

/// `maude search`: search, render, and write to stdout or the output file.
pub async fn run_search(config: &Config, args: &SearchArgs, out: &OutputArgs) -> Result<()> {
    let records = search_records(config, args).await?;

    let format = format::resolve_format(out.format, out.output.as_deref());
    let rendered = format::render(&records, format, &out.render);

    match &out.output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!("wrote {} results to {}", records.len(), path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remote_search_needs_terms() {
        let config = Config::minimal();
        let args = SearchArgs {
            origin: Origin::Remote,
            ..SearchArgs::default()
        };
        let err = search_records(&config, &args).await.unwrap_err();
        assert!(err.to_string().contains("search term"));
    }

    #[tokio::test]
    async fn local_only_without_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::minimal();
        config.db.path = dir.path().join("missing.sqlite3");
        let args = SearchArgs {
            terms: vec![vec!["mri".into()]],
            origin: Origin::Local,
            ..SearchArgs::default()
        };
        assert!(search_records(&config, &args).await.unwrap().is_empty());
    }
}
