//! Checkpoint persistence for Tessera
//!
//! `PgCheckpointStore` is the production store. `MemoryCheckpointStore`
//! keeps everything in process and backs tests and dry runs.

pub mod memory;
pub mod migrations;
pub mod pool;
pub mod repositories;

pub use memory::MemoryCheckpointStore;
pub use migrations::run_migrations;
pub use pool::{create_pool, DatabaseConfig};
pub use repositories::*;
