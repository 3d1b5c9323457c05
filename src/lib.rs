//! # MAUDE Search
//!
//! Boolean term-group search over FDA MAUDE medical-device adverse-event
//! reports, spanning the live openFDA endpoint (post-2009 data) and a
//! locally ingested store of the historical flat-file releases.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!  term groups ──▶│    terms     │──────────────┬──────────────────┐
//!                 └──────────────┘              ▼                  ▼
//!                                     ┌──────────────────┐  ┌─────────────┐
//!                                     │  fetch (openFDA) │  │   local     │
//!                                     │  pages + filter  │  │  SQL LIKE   │
//!                                     └────────┬─────────┘  └──────┬──────┘
//!                                              └──────┬───────────┘
//!                                                     ▼
//!                                              ┌─────────────┐   ┌──────────┐
//!                                              │    merge    │──▶│  format  │
//!                                              └─────────────┘   └──────────┘
//!
//!  flat files / zips ──▶ classify ──▶ hash ──▶ parse ──▶ evolve schema ──▶ append
//!                        (ingest)    (hasher) (flatfile)   (schema)      (SQLite)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! maude init                                  # create the local store
//! maude build                                 # download + ingest historical files
//! maude search MRI,MAGNET STAPES -x artifact  # (MRI OR MAGNET) AND STAPES, minus artifacts
//! maude stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Records, term groups, record types |
//! | [`errors`] | Typed error taxonomies |
//! | [`terms`] | Term-group compilation and query rendering |
//! | [`filter`] | Exclusion filtering over dotted field paths |
//! | [`fetch`] | Paginated openFDA retrieval |
//! | [`fields`] | Searchable-field cache and validation |
//! | [`hasher`] | File and row content hashing |
//! | [`schema`] | On-demand column addition |
//! | [`flatfile`] | Pipe-delimited / zip reader |
//! | [`ingest`] | Idempotent ingestion pipeline |
//! | [`progress`] | Build progress reporting |
//! | [`local`] | Local store queries |
//! | [`merge`] | Remote + local result merging |
//! | [`sources`] | Record origins behind one trait |
//! | [`search`] | Federated search orchestration |
//! | [`format`] | Org / JSON / CSV / text output |
//! | [`stats`] | Store statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod config;
pub mod db;
pub mod errors;
pub mod fetch;
pub mod fields;
pub mod filter;
pub mod flatfile;
pub mod format;
pub mod hasher;
pub mod ingest;
pub mod local;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod schema;
pub mod search;
pub mod sources;
pub mod stats;
pub mod terms;
