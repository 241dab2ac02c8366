//! PracticePanther integration for casesync
//!
//! - `client` - PracticePantherClient (HTTP client, one page per call)
//! - `credentials` - bearer token providers
//! - `paginator` - page loop with rate-limit backoff
//! - `models` - API record shapes
//! - `converters` - remote records to local entity fields
//! - `sync_provider` - `SyncSource` implementation used by the orchestrator
//! - `fake` - in-memory page source for tests

pub mod client;
pub mod converters;
pub mod credentials;
#[cfg(any(test, feature = "test-helpers"))]
pub mod fake;
pub mod models;
pub mod paginator;
pub mod sync_provider;

pub use client::{ClientSettings, DEFAULT_BASE_URL, PracticePantherClient};
pub use credentials::{AccessToken, CredentialProvider, RefreshingCredentials, StaticToken, TokenRefresher};
#[cfg(any(test, feature = "test-helpers"))]
pub use fake::FakePageSource;
pub use models::*;
pub use paginator::{Page, PageInfo, PageParams, PageSource, PaginationSettings, Paginator};
pub use sync_provider::{PracticePantherSyncProvider, SOURCE_NAME};
