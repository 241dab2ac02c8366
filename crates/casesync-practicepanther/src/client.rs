use async_trait::async_trait;
use casesync_api::{HealthReport, RateLimitInfo, Result, SyncError};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

use crate::credentials::CredentialProvider;
use crate::paginator::{Page, PageInfo, PageParams, PageSource};

pub const DEFAULT_BASE_URL: &str = "https://app.practicepanther.com/api/v2";

const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    /// Used when a 429 carries no usable `Retry-After`
    pub default_retry_after_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("casesync/", env!("CARGO_PKG_VERSION")).to_string(),
            default_retry_after_secs: 60,
        }
    }
}

/// HTTP client for the PracticePanther REST API
pub struct PracticePantherClient {
    client: reqwest::Client,
    settings: ClientSettings,
    credentials: Arc<dyn CredentialProvider>,
}

impl PracticePantherClient {
    pub fn new(settings: ClientSettings, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            settings,
            credentials,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn url(&self, collection: &str) -> String {
        format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            collection.trim_start_matches('/')
        )
    }

    /// Helper to create better error messages from reqwest errors
    fn format_reqwest_error(e: &reqwest::Error, url: &str, operation: &str) -> String {
        if e.is_timeout() {
            format!(
                "Failed to {} for {}: timeout - request took longer than the configured limit",
                operation, url
            )
        } else if e.is_connect() {
            format!(
                "Failed to {} for {}: connection error - check network connectivity, DNS resolution, and firewall settings. Error: {}",
                operation, url, e
            )
        } else if e.is_request() {
            format!(
                "Failed to {} for {}: request error - invalid URL format or malformed request parameters. Error: {}",
                operation, url, e
            )
        } else if e.is_decode() || e.is_body() {
            format!(
                "Failed to {} for {}: could not read response body. Error: {}",
                operation, url, e
            )
        } else {
            let debug_str = format!("{:?}", e);
            let display_str = e.to_string();
            if display_str.contains("certificate")
                || display_str.contains("TLS")
                || debug_str.contains("certificate")
                || debug_str.contains("TLS")
            {
                format!(
                    "Failed to {} for {}: TLS/certificate error. Error: {}",
                    operation, url, e
                )
            } else if e.is_redirect() {
                format!(
                    "Failed to {} for {}: redirect error - too many redirects or invalid redirect. Error: {}",
                    operation, url, e
                )
            } else {
                format!(
                    "Failed to {} for {}: {}. Debug details: {}",
                    operation, url, display_str, debug_str
                )
            }
        }
    }

    async fn send_get(
        &self,
        collection: &str,
        query: &[(&'static str, String)],
    ) -> Result<reqwest::Response> {
        let url = self.url(collection);
        let token = self.credentials.bearer_token().await?;

        trace!("[PracticePantherClient] GET /{} {:?}", collection, query);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| {
                let message = Self::format_reqwest_error(&e, &url, "send request");
                error!("[PracticePantherClient] {}", message);
                SyncError::Transport(message)
            })?;

        trace!(
            "[PracticePantherClient] GET /{} -> {}",
            collection,
            response.status().as_u16()
        );

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("[PracticePantherClient] Token rejected (401); invalidating credentials");
            self.credentials.invalidate().await;
        }
        Ok(response)
    }

    async fn read_body(response: reqwest::Response, url: &str) -> Result<String> {
        response.text().await.map_err(|e| {
            SyncError::Transport(Self::format_reqwest_error(&e, url, "read response body"))
        })
    }

    /// Fetch a single page. A 429 is reported as `RateLimited`, never retried here.
    pub async fn fetch_page(&self, collection: &str, params: &PageParams) -> Result<Page> {
        let response = self.send_get(collection, &params.query_pairs()).await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = parse_retry_after(response.headers())
                .unwrap_or(self.settings.default_retry_after_secs);
            warn!(
                "[PracticePantherClient] Rate limited on /{} page {}: retry after {}s",
                collection, params.page, retry_after_secs
            );
            return Err(SyncError::RateLimited { retry_after_secs });
        }

        let url = self.url(collection);
        let body = Self::read_body(response, &url).await?;
        if !status.is_success() {
            return Err(SyncError::RemoteApi {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let page = parse_page(&body, params.page)?;
        debug!(
            "[PracticePantherClient] /{} page {}/{}: {} record(s)",
            collection,
            page.info.current_page,
            page.info.total_pages,
            page.records.len()
        );
        Ok(page)
    }

    /// Minimal authenticated call reporting reachability and rate-limit headroom
    pub async fn test_connection(&self) -> HealthReport {
        let started = Instant::now();
        let params = PageParams::new(1, 1);
        let query = vec![
            ("page", params.page.to_string()),
            ("per_page", params.per_page.to_string()),
        ];

        let response = match self.send_get("contacts", &query).await {
            Ok(response) => response,
            Err(e) => {
                return HealthReport {
                    healthy: false,
                    latency_ms: elapsed_ms(started),
                    status_code: None,
                    rate_limit: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let status = response.status();
        let rate_limit = rate_limit_info(response.headers());
        let error = if status.is_success() {
            None
        } else {
            let body = response.text().await.unwrap_or_default();
            Some(format!("HTTP {}: {}", status.as_u16(), truncate_body(&body)))
        };

        HealthReport {
            healthy: status.is_success(),
            latency_ms: elapsed_ms(started),
            status_code: Some(status.as_u16()),
            rate_limit,
            error,
        }
    }
}

#[async_trait]
impl PageSource for PracticePantherClient {
    async fn fetch_page(&self, collection: &str, params: &PageParams) -> Result<Page> {
        PracticePantherClient::fetch_page(self, collection, params).await
    }

    async fn test_connection(&self) -> HealthReport {
        PracticePantherClient::test_connection(self).await
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u64::MAX as u128) as u64
}

/// Keep error bodies short enough for logs and run records
pub fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    }
}

/// `Retry-After` in delta-seconds form
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub fn rate_limit_info(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
    };
    let limit = header("x-ratelimit-limit").and_then(|v| v.parse().ok());
    let remaining = header("x-ratelimit-remaining").and_then(|v| v.parse().ok());
    let reset = header("x-ratelimit-reset");

    if limit.is_none() && remaining.is_none() && reset.is_none() {
        None
    } else {
        Some(RateLimitInfo {
            limit,
            remaining,
            reset,
        })
    }
}

/// Decode `{data: [...], meta: {current_page, total_pages}}`. A bare array or
/// a body without `meta` is a single page.
pub fn parse_page(body: &str, requested_page: u32) -> Result<Page> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        SyncError::InvalidResponse(format!(
            "body is not JSON ({}): {}",
            e,
            truncate_body(body)
        ))
    })?;

    let single_page = PageInfo {
        current_page: requested_page,
        total_pages: requested_page,
    };

    match value {
        Value::Array(records) => Ok(Page {
            records,
            info: single_page,
        }),
        Value::Object(mut object) => {
            let records = match object.remove("data") {
                Some(Value::Array(records)) => records,
                Some(other) => {
                    return Err(SyncError::InvalidResponse(format!(
                        "'data' is not an array: {}",
                        truncate_body(&other.to_string())
                    )));
                }
                None => {
                    return Err(SyncError::InvalidResponse(
                        "response has no 'data' field".to_string(),
                    ));
                }
            };

            let info = match object.get("meta") {
                Some(meta) => {
                    let number = |key: &str| meta.get(key).and_then(Value::as_u64).map(|n| n as u32);
                    PageInfo {
                        current_page: number("current_page").unwrap_or(requested_page),
                        total_pages: number("total_pages").unwrap_or(requested_page),
                    }
                }
                None => single_page,
            };
            Ok(Page { records, info })
        }
        other => Err(SyncError::InvalidResponse(format!(
            "unexpected top-level JSON: {}",
            truncate_body(&other.to_string())
        ))),
    }
}
