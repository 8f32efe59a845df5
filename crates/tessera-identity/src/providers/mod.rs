//! Management client implementations

#[cfg(feature = "auth0")]
pub mod auth0;

#[cfg(feature = "native")]
pub mod native;

#[cfg(feature = "cognito")]
pub mod cognito;

mod common;

pub use common::*;
