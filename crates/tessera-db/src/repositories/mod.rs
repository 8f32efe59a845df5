//! Repository implementations for PostgreSQL

pub mod checkpoint;

pub use checkpoint::*;
