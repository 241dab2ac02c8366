pub mod backend;
pub mod entity_store;
pub mod schema;
pub mod sync_run_store;
pub mod types;

#[cfg(test)]
mod sqlite_tests;

pub use backend::*;
pub use entity_store::*;
pub use sync_run_store::*;
pub use types::*;
