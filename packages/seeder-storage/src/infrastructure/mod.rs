//! Infrastructure layer - ProgressStore adapters
//!
//! - `json_file`: one JSON document per batch (default)
//! - `memory`: process-local store for tests
//! - `sqlite`: single-table store (`sqlite` feature)

pub mod json_file;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use json_file::JsonFileProgressStore;
pub use memory::InMemoryProgressStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteProgressStore;
