//! Tessera Core - Domain types and traits for the identity platform

pub mod error;
pub mod identity;
pub mod ids;
pub mod models;
pub mod traits;


pub use error::*;
pub use ids::*;
pub use models::*;
pub use traits::*;
