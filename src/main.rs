//! # MAUDE Search CLI (`maude`)
//!
//! Search FDA medical-device adverse-event reports across the openFDA API
//! and a local store built from the historical MAUDE flat files.
//!
//! ## Usage
//!
//! ```bash
//! maude --config ./maude.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `maude init` | Create the SQLite store and its tables |
//! | `maude build` | Download and ingest the historical flat files |
//! | `maude search <groups>...` | Search remote and local records |
//! | `maude stats` | Show store size, row counts and ingested files |
//! | `maude sources` | Show the remote endpoint and local store status |
//! | `maude fields list\|check\|refresh` | Inspect searchable fields |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest files already on disk, without downloading
//! maude build --skip-download --data-dir ./data/raw
//!
//! # (MRI OR MAGNET) AND (STAPES OR TYMP), dropping reports about artifacts
//! maude search MRI,MAGNET STAPES,TYMP -x artifact -o csv -O results.csv
//!
//! # Historical store only, JSON output
//! maude search "hearing aid" --origin local -o json
//! ```

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use maude_search::config::{self, Config};
use maude_search::format::{OutputFormat, RenderOptions};
use maude_search::ingest::{self, BuildOptions};
use maude_search::progress::ProgressMode;
use maude_search::search::{self, Origin, OutputArgs, SearchArgs};
use maude_search::terms;
use maude_search::{fields, migrate, sources, stats};

/// MAUDE Search: boolean term-group search over FDA device adverse events.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "maude",
    about = "Search FDA MAUDE adverse-event reports (openFDA + local historical store)",
    version,
    long_about = "MAUDE Search queries the openFDA device-event endpoint with AND-of-OR term \
    groups, filters out excluded terms, and merges in matches from a local SQLite store built \
    from the pre-2009 MAUDE flat-file releases."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./maude.toml`. Database, endpoint, local search and
    /// ingestion settings are read from this file.
    #[arg(long, global = true, default_value = "./maude.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` wins when set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the local store.
    ///
    /// Creates the SQLite file with `ingestion_log` and the `device`,
    /// `foitext` and `foidev` tables. Idempotent.
    Init,

    /// Download and ingest the historical MAUDE flat files.
    ///
    /// Files already ingested with identical content are skipped, and rows
    /// already present are never duplicated, so builds can be re-run safely.
    Build {
        /// Only ingest files already on disk.
        #[arg(long)]
        skip_download: bool,

        /// Directory to scan for data files (overrides `[ingest] data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Progress output on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Search adverse-event reports.
    ///
    /// Each positional argument is one group of comma-separated terms. Terms
    /// within a group are OR-ed; groups are AND-ed.
    Search {
        /// Term groups, e.g. `MRI,MAGNET STAPES,TYMP`.
        #[arg(required_unless_present = "terms_json")]
        term_groups: Vec<String>,

        /// Term groups as a JSON array: strings are single terms, arrays are groups.
        #[arg(long, conflicts_with = "term_groups")]
        terms_json: Option<String>,

        /// Exclusion group (comma-separated, repeatable). Records matching
        /// every exclusion group are dropped.
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,

        /// Remote fields to search (comma-separated).
        #[arg(short = 'f', long, value_delimiter = ',')]
        search_fields: Vec<String>,

        /// Local column to search (remote field names are mapped via `[local] field_map`).
        #[arg(long)]
        local_field: Option<String>,

        /// Maximum pages across all search fields (0 = all).
        #[arg(short = 'p', long)]
        max_pages: Option<usize>,

        /// Results per page, and the total result count at which paging stops.
        #[arg(short = 'l', long)]
        limit: Option<usize>,

        /// Sort criteria, e.g. `date_received:desc`.
        #[arg(short = 's', long)]
        sort: Option<String>,

        /// Which origins to search.
        #[arg(long, value_enum, default_value_t = Origin::All)]
        origin: Origin,

        /// Output format. A mismatching `--output` suffix takes precedence.
        #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Org)]
        format: OutputFormat,

        /// Output file (default: stdout).
        #[arg(short = 'O', long)]
        output: Option<PathBuf>,

        /// Field used as the Org heading.
        #[arg(short = 'n', long, default_value = "report_number")]
        name: String,

        /// Comma-separated fields to include in the output.
        #[arg(short = 'F', long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Org heading level.
        #[arg(short = 'L', long, default_value_t = 3)]
        level: usize,

        /// Skip checking search fields against the searchable-field list.
        #[arg(long)]
        no_validate: bool,
    },

    /// Show local store statistics.
    Stats,

    /// Show the remote endpoint and local store status.
    Sources,

    /// Inspect the endpoint's searchable fields.
    Fields {
        #[command(subcommand)]
        action: FieldsAction,
    },
}

#[derive(Subcommand)]
enum FieldsAction {
    /// Print every known searchable field.
    List,
    /// Check field names, suggesting close matches for unknown ones.
    Check {
        #[arg(required = true, value_delimiter = ',')]
        fields: Vec<String>,
    },
    /// Re-fetch the field list from the API and rewrite the cache.
    Refresh,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,maude_search={0},maude={0}", level))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!("no config at {}, using defaults", path.display());
        Ok(Config::minimal())
    }
}

fn compile_search_terms(term_groups: &[String], terms_json: Option<&str>) -> Result<Vec<Vec<String>>> {
    match terms_json {
        Some(json) => {
            let specs: Vec<serde_json::Value> =
                serde_json::from_str(json).context("--terms-json must be a JSON array")?;
            Ok(terms::compile_json_terms(&specs)?)
        }
        None => Ok(term_groups
            .iter()
            .map(|g| terms::parse_cli_group(g))
            .filter(|g| !g.is_empty())
            .collect()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Build {
            skip_download,
            data_dir,
            progress,
        } => {
            let opts = BuildOptions {
                skip_download,
                data_dir,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
            };
            ingest::run_build(&cfg, &opts).await?;
        }
        Commands::Search {
            term_groups,
            terms_json,
            exclude,
            search_fields,
            local_field,
            max_pages,
            limit,
            sort,
            origin,
            format,
            output,
            name,
            fields,
            level,
            no_validate,
        } => {
            let terms = compile_search_terms(&term_groups, terms_json.as_deref())?;
            let exclude: Vec<Vec<String>> = exclude
                .iter()
                .map(|g| terms::parse_cli_group(g))
                .filter(|g| !g.is_empty())
                .collect();

            let args = SearchArgs {
                terms,
                exclude: (!exclude.is_empty()).then_some(exclude),
                search_fields: (!search_fields.is_empty()).then_some(search_fields),
                local_field,
                limit,
                max_pages,
                sort,
                origin,
                validate: !no_validate,
            };
            let out = OutputArgs {
                format,
                output,
                render: RenderOptions {
                    name,
                    fields: (!fields.is_empty()).then_some(fields),
                    level,
                },
            };
            search::run_search(&cfg, &args, &out).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Fields { action } => match action {
            FieldsAction::List => fields::run_list(&cfg).await?,
            FieldsAction::Check { fields: names } => {
                if !fields::run_check(&cfg, &names).await? {
                    bail!("one or more fields are not searchable");
                }
            }
            FieldsAction::Refresh => fields::run_refresh(&cfg).await?,
        },
    }

    Ok(())
}
