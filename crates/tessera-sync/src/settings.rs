//! Engine settings

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Tunables for the sync engine.
///
/// Delays may be set to zero in tests without changing any other behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Resume point when no successful run exists for the active provider
    pub epoch: DateTime<Utc>,
    /// Result count at which a windowed search is assumed to be truncated.
    /// A provider reporting a lower cap of its own takes precedence.
    pub result_cap: usize,
    /// Pause between window-shrink retries and between successive runs
    #[serde(with = "millis")]
    pub rate_limit_delay: std::time::Duration,
    /// Longest window a single windowed run may cover
    #[serde(with = "seconds")]
    pub max_sync_duration: Duration,
    /// Halvings allowed before a capped window fails the run
    pub max_window_shrinks: u32,
    /// Smallest window a shrink may produce
    #[serde(with = "seconds")]
    pub min_window: Duration,
}

impl SyncSettings {
    /// Auth0 went live in 2013, nothing can have been updated before that
    pub fn default_epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2013, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            epoch: Self::default_epoch(),
            result_cap: 1000,
            rate_limit_delay: std::time::Duration::from_millis(500),
            max_sync_duration: Duration::days(30),
            max_window_shrinks: 32,
            min_window: Duration::seconds(1),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        i64::deserialize(deserializer).map(Duration::seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.epoch.to_rfc3339(), "2013-01-01T00:00:00+00:00");
        assert_eq!(settings.result_cap, 1000);
        assert_eq!(settings.max_sync_duration, Duration::days(30));
        assert_eq!(settings.rate_limit_delay.as_millis(), 500);
    }
}
