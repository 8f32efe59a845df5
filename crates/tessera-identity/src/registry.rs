//! Provider registry - builds and caches management clients
//!
//! Clients hold a cached access token, so one client per provider
//! configuration is kept for the life of the registry. A provider whose
//! configuration changes must be evicted with [`ProviderRegistry::remove`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use tessera_core::{identity::*, IdentityProviderId, Result, TesseraError};

#[cfg(feature = "auth0")]
use crate::providers::auth0::Auth0ManagementClient;

#[cfg(feature = "native")]
use crate::providers::native::NativeManagementClient;

#[cfg(feature = "cognito")]
use crate::providers::cognito::CognitoManagementClient;

/// Production [`ManagementClientFactory`]
pub struct ProviderRegistry {
    clients: RwLock<HashMap<IdentityProviderId, Arc<dyn ManagementClient>>>,
    /// Delay between Auth0 search pages
    page_delay: Duration,
}

impl ProviderRegistry {
    /// Default delay between paged requests to rate-limited APIs
    pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(500);

    pub fn new() -> Self {
        Self::with_page_delay(Self::DEFAULT_PAGE_DELAY)
    }

    pub fn with_page_delay(page_delay: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            page_delay,
        }
    }

    /// Drop the cached client for a provider
    pub async fn remove(&self, provider_id: IdentityProviderId) {
        self.clients.write().await.remove(&provider_id);
    }

    /// Number of cached clients
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    async fn build(&self, config: &IdentityProviderConfig) -> Result<Arc<dyn ManagementClient>> {
        config.validate()?;

        match config.provider_type {
            #[cfg(feature = "auth0")]
            ProviderType::Auth0 => Ok(Arc::new(Auth0ManagementClient::new(
                config,
                self.page_delay,
            )?)),

            #[cfg(feature = "native")]
            ProviderType::Native => Ok(Arc::new(NativeManagementClient::new(config)?)),

            #[cfg(feature = "cognito")]
            ProviderType::Cognito => Ok(Arc::new(CognitoManagementClient::new(config).await?)),

            #[allow(unreachable_patterns)]
            other => Err(TesseraError::config_error(format!(
                "provider type {} is not enabled in this build",
                other
            ))),
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManagementClientFactory for ProviderRegistry {
    #[instrument(skip(self, provider), fields(provider_id = %provider.id, provider_type = %provider.provider_type))]
    async fn management_client(
        &self,
        provider: &IdentityProviderConfig,
    ) -> Result<Arc<dyn ManagementClient>> {
        if let Some(client) = self.clients.read().await.get(&provider.id) {
            debug!("Reusing management client for {}", provider.name);
            return Ok(client.clone());
        }

        info!("Creating management client for {}", provider);
        let client = self.build(provider).await?;

        self.clients
            .write()
            .await
            .entry(provider.id)
            .or_insert_with(|| client.clone());

        Ok(client)
    }
}
