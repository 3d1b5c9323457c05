//! Typed error taxonomies for the places where callers branch on the kind
//! of failure. Everything else flows through `anyhow`.

use thiserror::Error;

/// Invalid term-group input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TermError {
    #[error("invalid keyword type at index {index}: {type_name}")]
    InvalidTermType { index: usize, type_name: String },
    #[error("object of type {type_name} can not be converted to a string")]
    StringConversion { type_name: String },
}

/// Failures of a remote fetch. None of these are retried by the fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request target is not an http(s) URL. Raised before any network call.
    #[error("URL must start with 'http:' or 'https:' but got {0}")]
    InvalidUrl(String),
    #[error("invalid search field: '{field}'{}", suggestion_hint(.suggestion))]
    InvalidSearchField {
        field: String,
        suggestion: Option<String>,
    },
    #[error("API rate limit exceeded{}", reset_hint(.reset))]
    RateLimited { reset: Option<u64> },
    #[error("failed to connect to API: {reason}")]
    Connection { reason: String },
    #[error("API returned error {status}: {message}")]
    Api { status: u16, message: String },
}

impl FetchError {
    /// HTTP-equivalent status for API-level failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::RateLimited { .. } => Some(429),
            FetchError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn reset_hint(reset: &Option<u64>) -> String {
    match reset {
        Some(secs) => format!(". Rate limit resets in {} seconds", secs),
        None => String::new(),
    }
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

/// Failure to read one flat file. Caught per file by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum FlatFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unreadable archive {path}: {source}")]
    Zip {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },
}
