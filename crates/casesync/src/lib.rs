//! Sync engine: reconciles records from an external case-management system
//! into a local SQLite store and keeps a durable log of every run.

pub mod core;
pub mod storage;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use casesync_api as api;
