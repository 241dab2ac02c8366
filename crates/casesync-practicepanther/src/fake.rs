//! In-memory `PageSource` for tests
//!
//! Serves fixed collections split into pages and can be scripted to answer
//! particular pages with rate limits or errors. Every request is recorded so
//! tests can assert on the exact paging sequence.

use async_trait::async_trait;
use casesync_api::{HealthReport, Result, SyncError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::paginator::{Page, PageInfo, PageParams, PageSource};

struct RateLimitScript {
    retry_after_secs: u64,
    remaining: u32,
}

#[derive(Default)]
struct FakeState {
    pages: HashMap<String, Vec<Vec<Value>>>,
    rate_limits: HashMap<(String, u32), RateLimitScript>,
    failures: HashMap<(String, u32), SyncError>,
    requests: HashMap<String, Vec<u32>>,
}

#[derive(Default)]
pub struct FakePageSource {
    state: Mutex<FakeState>,
}

impl FakePageSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source with a single collection
    pub fn paged(collection: &str, records: Vec<Value>, page_size: usize) -> Self {
        let source = Self::new();
        source.set_collection(collection, records, page_size);
        source
    }

    /// Replace the contents of `collection`, split into pages of `page_size`
    pub fn set_collection(&self, collection: &str, records: Vec<Value>, page_size: usize) {
        let pages: Vec<Vec<Value>> = if records.is_empty() {
            vec![Vec::new()]
        } else {
            records
                .chunks(page_size.max(1))
                .map(|chunk| chunk.to_vec())
                .collect()
        };
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(collection.to_string(), pages);
    }

    /// Answer the next `times` requests for `page` with `RateLimited`
    pub fn rate_limit_page(&self, collection: &str, page: u32, retry_after_secs: u64, times: u32) {
        self.state.lock().unwrap().rate_limits.insert(
            (collection.to_string(), page),
            RateLimitScript {
                retry_after_secs,
                remaining: times,
            },
        );
    }

    /// Answer every request for `page` with `error`
    pub fn fail_page(&self, collection: &str, page: u32, error: SyncError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((collection.to_string(), page), error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.failures.clear();
        state.rate_limits.clear();
    }

    /// Page numbers requested for `collection`, in order
    pub fn requests(&self, collection: &str) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .requests
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PageSource for FakePageSource {
    async fn fetch_page(&self, collection: &str, params: &PageParams) -> Result<Page> {
        let mut state = self.state.lock().unwrap();
        state
            .requests
            .entry(collection.to_string())
            .or_default()
            .push(params.page);

        let key = (collection.to_string(), params.page);
        if let Some(script) = state.rate_limits.get_mut(&key) {
            if script.remaining > 0 {
                script.remaining -= 1;
                return Err(SyncError::RateLimited {
                    retry_after_secs: script.retry_after_secs,
                });
            }
        }
        if let Some(error) = state.failures.get(&key) {
            return Err(error.clone());
        }

        let pages = state.pages.get(collection).ok_or_else(|| SyncError::RemoteApi {
            status: 404,
            body: format!("unknown collection {}", collection),
        })?;
        let total_pages = pages.len() as u32;
        let records = pages
            .get(params.page.saturating_sub(1) as usize)
            .cloned()
            .unwrap_or_default();

        Ok(Page {
            records,
            info: PageInfo {
                current_page: params.page,
                total_pages,
            },
        })
    }

    async fn test_connection(&self) -> HealthReport {
        HealthReport {
            healthy: true,
            latency_ms: 0,
            status_code: Some(200),
            rate_limit: None,
            error: None,
        }
    }
}
