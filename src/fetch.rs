//! Paginated retrieval from the openFDA device-event endpoint.
//!
//! For each search field the fetcher issues the compiled query, filters
//! each page through the exclusion groups, and follows the `Link:
//! <...>; rel="next"` continuation until the result limit or the page cap is
//! reached, or the server stops offering a next page.
//!
//! Every failure is mapped onto [`FetchError`]; nothing is retried here.

use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;

use crate::errors::FetchError;
use crate::fields::{FieldCheck, FieldValidator};
use crate::filter;
use crate::models::{Record, TermGroups};
use crate::terms;

const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
const MAX_ERROR_BODY: usize = 500;

/// One remote search.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub keywords: TermGroups,
    pub exclude: Option<TermGroups>,
    pub search_fields: Vec<String>,
    /// Page size, and the total result count at which paging stops.
    pub limit: usize,
    /// Page cap across all search fields; 0 is unbounded.
    pub max_pages: usize,
    pub sort: Option<String>,
}

/// A decoded result page.
#[derive(Debug)]
struct Page {
    records: Vec<Record>,
    next: Option<String>,
    meta: Option<serde_json::Value>,
}

pub struct RemoteFetcher {
    client: reqwest::Client,
    base_endpoint: String,
}

impl RemoteFetcher {
    /// A fetcher for `base_endpoint`. Without a timeout, requests wait as
    /// long as the server does.
    pub fn new(base_endpoint: impl Into<String>, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| FetchError::Connection {
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            base_endpoint: base_endpoint.into(),
        })
    }

    pub fn base_endpoint(&self) -> &str {
        &self.base_endpoint
    }

    /// Reject search fields the validator does not know, before any request.
    pub fn preflight(&self, request: &FetchRequest, validator: &FieldValidator) -> Result<(), FetchError> {
        for field in &request.search_fields {
            if let FieldCheck::Invalid { suggestion } = validator.validate(field) {
                return Err(FetchError::InvalidSearchField {
                    field: field.clone(),
                    suggestion,
                });
            }
        }
        Ok(())
    }

    /// Fetch every page for every search field, exclusion-filtered.
    ///
    /// The result and page counters are shared by all search fields. Once
    /// either bound is hit, each remaining field still gets its first page.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let query = terms::render_query(&request.keywords);
        let mut results = Vec::new();
        let mut pages = 0usize;

        for field in &request.search_fields {
            let mut next = Some(terms::construct_url(
                &self.base_endpoint,
                field,
                &query,
                request.limit,
                request.sort.as_deref(),
            ));
            let mut last_meta = None;

            while let Some(url) = next.take() {
                if !url.starts_with("http:") && !url.starts_with("https:") {
                    tracing::error!("URL must start with 'http:' or 'https:' but got {}", url);
                    return Err(FetchError::InvalidUrl(url));
                }

                tracing::debug!("sending request to {}", url);
                let page = self.fetch_page(&url).await?;
                results.extend(filter::filter_records(page.records, request.exclude.as_ref(), field));
                pages += 1;
                last_meta = page.meta;

                tracing::debug!(
                    "reports found: {} ({} {})",
                    results.len(),
                    pages,
                    if pages > 1 { "requests" } else { "request" }
                );

                if results.len() >= request.limit
                    || (request.max_pages > 0 && pages >= request.max_pages)
                {
                    tracing::info!("stopping after {} pages for field {}", pages, field);
                    break;
                }

                next = page.next;
                tracing::debug!("next link found? {}", next.is_some());
            }

            if let Some(meta) = last_meta {
                tracing::debug!("query meta for {}: {}", field, meta);
            }
        }

        tracing::info!("{} reports found in {} requests", results.len(), pages);
        Ok(results)
    }

    async fn fetch_page(&self, url: &str) -> Result<Page, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| classify_send_error(url, e))?;
        let status = response.status();
        let headers = response.headers().clone();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let reset = rate_limit_reset(&headers);
            tracing::warn!("rate limited by API (reset: {:?})", reset);
            return Err(FetchError::RateLimited { reset });
        }

        let body = response.text().await.map_err(|e| {
            if status.is_success() {
                FetchError::Api {
                    status: status.as_u16(),
                    message: format!("failed to decode API response: {}", e),
                }
            } else {
                FetchError::Connection {
                    reason: e.to_string(),
                }
            }
        })?;

        if !status.is_success() {
            return Err(FetchError::Api {
                status: status.as_u16(),
                message: extract_error_message(&body),
            });
        }

        let envelope: serde_json::Value = serde_json::from_str(&body).map_err(|e| FetchError::Api {
            status: status.as_u16(),
            message: format!("failed to decode API response: {}", e),
        })?;

        if let Some(error) = envelope.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            let code = error.get("code").and_then(|c| c.as_str());
            return Err(FetchError::Api {
                status: code.and_then(error_code_status).unwrap_or(status.as_u16()),
                message,
            });
        }

        let records = match envelope.get("results") {
            Some(results) => serde_json::from_value::<Vec<Record>>(results.clone()).map_err(|e| {
                FetchError::Api {
                    status: status.as_u16(),
                    message: format!("failed to decode API response: {}", e),
                }
            })?,
            None => Vec::new(),
        };

        let next = headers
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_next_link);

        Ok(Page {
            records,
            next,
            meta: envelope.get("meta").cloned(),
        })
    }
}

fn classify_send_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_builder() {
        FetchError::InvalidUrl(url.to_string())
    } else {
        FetchError::Connection {
            reason: e.to_string(),
        }
    }
}

/// Status implied by an openFDA error code in a 200 envelope.
fn error_code_status(code: &str) -> Option<u16> {
    match code {
        "BAD_REQUEST" => Some(400),
        "NOT_FOUND" => Some(404),
        "SERVER_ERROR" => Some(500),
        _ => None,
    }
}

/// Target of the `rel="next"` entry of a `Link` header.
///
/// A header carrying no `rel` parameters at all is taken to be a bare
/// continuation link and its first `<...>` target is returned.
pub fn parse_next_link(header: &str) -> Option<String> {
    let target = |part: &str| -> Option<String> {
        let start = part.find('<')? + 1;
        let end = part[start..].find('>')? + start;
        Some(part[start..end].trim().to_string())
    };

    for part in header.split(',') {
        let is_next = part.split(';').skip(1).any(|param| {
            let param = param.trim().to_ascii_lowercase();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if is_next {
            return target(part);
        }
    }

    if header.to_ascii_lowercase().contains("rel=") {
        None
    } else {
        target(header)
    }
}

/// Seconds until the rate limit resets, from `X-RateLimit-Reset` or else
/// `Retry-After`.
pub fn rate_limit_reset(headers: &HeaderMap) -> Option<u64> {
    [RATE_LIMIT_RESET, RETRY_AFTER.as_str()]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.trim().parse::<u64>().ok())
}

/// Best-effort message from an error response body: the envelope's
/// `error.message` if present, else the (truncated) body text.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
    }

    let text = body.trim();
    if text.is_empty() {
        return "no error message".to_string();
    }
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
