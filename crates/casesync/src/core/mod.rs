pub mod orchestrator;
pub mod source;
pub mod status;
pub mod upserter;

#[cfg(test)]
mod orchestrator_tests;

pub use orchestrator::{ABANDONED_RUN_REASON, BatchSizes, SyncOrchestrator, SyncSettings};
pub use source::{RemoteEntity, SyncSource};
pub use status::compute_statistics;
pub use upserter::BatchUpserter;
