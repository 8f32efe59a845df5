//! Worker configuration

use anyhow::{ensure, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use tessera_core::{identity::TenantProviderSettings, TenantId};
use tessera_db::DatabaseConfig;
use tessera_sync::SyncSettings;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub sync: SyncSection,
    #[serde(default)]
    pub tenants: Vec<TenantProviderSettings>,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    /// Unset keeps checkpoints in memory for the life of the process
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
    #[serde(default = "default_max_sync_duration_hours")]
    pub max_sync_duration_hours: i64,
    #[serde(default = "default_result_cap")]
    pub result_cap: usize,
    #[serde(default = "default_max_window_shrinks")]
    pub max_window_shrinks: u32,
    #[serde(default = "default_min_window_secs")]
    pub min_window_secs: i64,
    #[serde(default)]
    pub epoch: Option<DateTime<Utc>>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_interval_secs() -> u64 {
    300
}

fn default_rate_limit_delay_ms() -> u64 {
    500
}

fn default_max_sync_duration_hours() -> i64 {
    24 * 30
}

fn default_result_cap() -> usize {
    1000
}

fn default_max_window_shrinks() -> u32 {
    32
}

fn default_min_window_secs() -> i64 {
    1
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .set_default("database.max_connections", 5)?
            .set_default("sync.interval_secs", 300)?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // TESSERA__DATABASE__URL, TESSERA__SYNC__INTERVAL_SECS, ...
            .add_source(
                config::Environment::with_prefix("TESSERA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.sync.result_cap > 0, "sync.result_cap must be positive");
        ensure!(
            self.sync.max_sync_duration_hours > 0,
            "sync.max_sync_duration_hours must be positive"
        );
        ensure!(
            self.sync.min_window_secs > 0,
            "sync.min_window_secs must be positive"
        );

        for tenant in &self.tenants {
            tenant.active_provider()?;
            for provider in &tenant.providers {
                provider.validate()?;
            }
        }
        Ok(())
    }

    pub fn tenant(&self, id: TenantId) -> Option<&TenantProviderSettings> {
        self.tenants.iter().find(|t| t.tenant_id == id)
    }

    pub fn database_config(&self) -> Option<DatabaseConfig> {
        self.database.url.as_ref().map(|url| {
            DatabaseConfig::new(url.clone()).with_max_connections(self.database.max_connections)
        })
    }
}

impl SyncSection {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn engine_settings(&self) -> SyncSettings {
        SyncSettings {
            epoch: self.epoch.unwrap_or_else(SyncSettings::default_epoch),
            result_cap: self.result_cap,
            rate_limit_delay: std::time::Duration::from_millis(self.rate_limit_delay_ms),
            max_sync_duration: Duration::hours(self.max_sync_duration_hours),
            max_window_shrinks: self.max_window_shrinks,
            min_window: Duration::seconds(self.min_window_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(json: &str) -> SyncSection {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_empty_sync_section_matches_engine_defaults() {
        let engine = section("{}").engine_settings();
        let defaults = SyncSettings::default();

        assert_eq!(engine.epoch, defaults.epoch);
        assert_eq!(engine.result_cap, defaults.result_cap);
        assert_eq!(engine.rate_limit_delay, defaults.rate_limit_delay);
        assert_eq!(engine.max_sync_duration, defaults.max_sync_duration);
        assert_eq!(engine.max_window_shrinks, defaults.max_window_shrinks);
        assert_eq!(engine.min_window, defaults.min_window);
    }

    #[test]
    fn test_sync_section_overrides() {
        let engine = section(
            r#"{"rate_limit_delay_ms": 0, "max_sync_duration_hours": 6, "epoch": "2020-01-01T00:00:00Z"}"#,
        )
        .engine_settings();

        assert!(engine.rate_limit_delay.is_zero());
        assert_eq!(engine.max_sync_duration, Duration::hours(6));
        assert_eq!(engine.epoch.to_rfc3339(), "2020-01-01T00:00:00+00:00");
    }
}
