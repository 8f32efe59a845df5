//! Tessera Identity - management clients for the providers Tessera syncs
//!
//! This crate provides [`ManagementClient`] implementations for:
//! - Auth0 (windowed search only)
//! - The native Tessera IdP (the sync target)
//! - AWS Cognito (optional, `cognito` feature)
//!
//! [`ProviderRegistry`] is the production [`ManagementClientFactory`]. It
//! builds one client per provider configuration and caches it.

pub mod providers;
pub mod registry;

#[cfg(test)]
mod tests;

#[cfg(feature = "auth0")]
pub use providers::auth0::Auth0ManagementClient;

#[cfg(feature = "native")]
pub use providers::native::NativeManagementClient;

#[cfg(feature = "cognito")]
pub use providers::cognito::CognitoManagementClient;

pub use tessera_core::identity::*;

pub use registry::ProviderRegistry;
