//! Test infrastructure shared with other crates via the `test-helpers` feature
//!
//! - `fixtures`: ready-made local field sets
//! - `FakeSource`: scripted in-memory `SyncSource` for orchestrator tests
//! - `TestEngine`: in-memory store, run log and orchestrator wired together

pub mod fake_source;
pub mod fixtures;

pub use fake_source::{FakeRecord, FakeSource};
pub use fixtures::TestEngine;
