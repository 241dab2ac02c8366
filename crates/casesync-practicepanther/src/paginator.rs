//! Drives repeated page fetches against one remote collection
//!
//! The paginator owns the backoff policy: the client reports `RateLimited`
//! and never sleeps itself. Retries stay on the same page and keep every
//! record already accumulated.

use async_trait::async_trait;
use casesync_api::{HealthReport, Result, SyncError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageParams {
    pub page: u32,
    pub per_page: u32,
    pub sort_by: String,
    pub sort_order: String,
    pub include: Vec<String>,
}

impl PageParams {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page,
            per_page,
            sort_by: "updated_at".to_string(),
            sort_order: "desc".to_string(),
            include: Vec::new(),
        }
    }

    pub fn with_include(mut self, include: &[&str]) -> Self {
        self.include = include.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("per_page", self.per_page.to_string()),
            ("sort_by", self.sort_by.clone()),
            ("sort_order", self.sort_order.clone()),
        ];
        if !self.include.is_empty() {
            pairs.push(("include", self.include.join(",")));
        }
        pairs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub current_page: u32,
    pub total_pages: u32,
}

impl PageInfo {
    pub fn has_more(&self) -> bool {
        self.current_page < self.total_pages
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    pub info: PageInfo,
}

/// Anything that can return one page of a collection
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, collection: &str, params: &PageParams) -> Result<Page>;

    async fn test_connection(&self) -> HealthReport;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationSettings {
    pub page_size: u32,
    /// Pause between successful pages; zero disables it
    pub inter_page_delay: Duration,
    /// Consecutive rate-limited retries of one page before giving up
    pub max_rate_limit_retries: u32,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            inter_page_delay: Duration::from_millis(100),
            max_rate_limit_retries: 5,
        }
    }
}

pub struct Paginator<P: PageSource + ?Sized> {
    source: Arc<P>,
    settings: PaginationSettings,
}

impl<P: PageSource + ?Sized> Paginator<P> {
    pub fn new(source: Arc<P>, settings: PaginationSettings) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> &PaginationSettings {
        &self.settings
    }

    pub fn source(&self) -> &Arc<P> {
        &self.source
    }

    /// Fetch every page of `collection`, starting at page 1
    #[tracing::instrument(skip(self, include, cancel))]
    pub async fn fetch_all(
        &self,
        collection: &str,
        page_size: u32,
        include: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        let mut page = 1u32;
        let mut consecutive_limited = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::cancelled(format!(
                    "stopped before {} page {}",
                    collection, page
                )));
            }

            let params = PageParams::new(page, page_size).with_include(include);
            match self.source.fetch_page(collection, &params).await {
                Ok(fetched) => {
                    consecutive_limited = 0;
                    let count = fetched.records.len();
                    records.extend(fetched.records);
                    debug!(
                        "[Paginator] {} page {}/{}: {} record(s), {} total",
                        collection,
                        fetched.info.current_page,
                        fetched.info.total_pages,
                        count,
                        records.len()
                    );

                    if !fetched.info.has_more() {
                        break;
                    }
                    if count == 0 {
                        warn!(
                            "[Paginator] {} page {} was empty but reported more pages; stopping",
                            collection, page
                        );
                        break;
                    }

                    page += 1;
                    if !self.settings.inter_page_delay.is_zero() {
                        sleep_or_cancel(self.settings.inter_page_delay, cancel, collection).await?;
                    }
                }
                Err(SyncError::RateLimited { retry_after_secs }) => {
                    consecutive_limited += 1;
                    if consecutive_limited > self.settings.max_rate_limit_retries {
                        return Err(SyncError::RetriesExhausted {
                            collection: collection.to_string(),
                            page,
                            attempts: consecutive_limited,
                        });
                    }
                    warn!(
                        "[Paginator] {} page {} rate limited, retrying in {}s (retry {}/{})",
                        collection,
                        page,
                        retry_after_secs,
                        consecutive_limited,
                        self.settings.max_rate_limit_retries
                    );
                    sleep_or_cancel(Duration::from_secs(retry_after_secs), cancel, collection)
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "[Paginator] Fetched {} {} record(s) over {} page(s)",
            records.len(),
            collection,
            page
        );
        Ok(records)
    }
}

async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
    collection: &str,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(SyncError::cancelled(format!(
            "interrupted while paging {}",
            collection
        ))),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
