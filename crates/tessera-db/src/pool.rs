//! Checkpoint database pool

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tessera_core::{Result, TesseraError};
use tracing::{info, instrument};

/// Where checkpoints live and how many connections the worker may hold.
///
/// Sync runs are sequential per tenant, so the pool stays small.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// The connection URL with any password masked, for logs
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let Some((userinfo, host)) = rest.rsplit_once('@') else {
            return self.url.clone();
        };
        match userinfo.split_once(':') {
            Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
            None => self.url.clone(),
        }
    }
}

/// Connect to the checkpoint database
#[instrument(skip(config), fields(url = %config.redacted_url()))]
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .test_before_acquire(true)
        .connect(&config.url)
        .await
        .map_err(|e| TesseraError::database_error(format!("Failed to connect: {}", e)))?;

    info!(
        "Checkpoint database ready ({} connections max)",
        config.max_connections
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_url_masks_password() {
        let config = DatabaseConfig::new("postgres://tessera:s3cret@db:5432/tessera");
        assert_eq!(config.redacted_url(), "postgres://tessera:***@db:5432/tessera");
    }

    #[test]
    fn test_redacted_url_without_password() {
        let config = DatabaseConfig::new("postgres://db:5432/tessera");
        assert_eq!(config.redacted_url(), "postgres://db:5432/tessera");
    }
}
