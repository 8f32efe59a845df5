//! Windowed collection for providers with capped, rate-limited search

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use tessera_core::{
    identity::ManagementClient, CheckpointStore, IdentityProviderId, Result, TesseraError,
};

use crate::settings::SyncSettings;
use crate::strategy::{
    ensure_active, pause, until_cancelled, Batch, Checkpoint, CollectionStrategy,
};

/// Incremental sync over `updated_at` windows.
///
/// Each run resumes where the last successful run stopped. A failed most
/// recent run sends the next run back to the epoch.
pub struct WindowedStrategy {
    settings: SyncSettings,
}

impl WindowedStrategy {
    pub fn new(settings: SyncSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl CollectionStrategy for WindowedStrategy {
    fn name(&self) -> &'static str {
        "windowed"
    }

    fn audits_unchanged(&self) -> bool {
        true
    }

    #[instrument(skip(self, store))]
    async fn resume(
        &self,
        store: &dyn CheckpointStore,
        active_provider_id: IdentityProviderId,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        let since = match store.get_latest_successful_sync_run(active_provider_id).await? {
            Some(run) => run.until,
            None => {
                info!("No usable checkpoint, starting from {}", self.settings.epoch);
                self.settings.epoch
            }
        };

        let mut until = now.max(since);
        if until - since > self.settings.max_sync_duration {
            until = since + self.settings.max_sync_duration;
        }

        Ok(Checkpoint {
            since: Some(since),
            until,
        })
    }

    #[instrument(skip(self, client, cancel), fields(provider_id = %client.provider_id()))]
    async fn fetch(
        &self,
        client: &dyn ManagementClient,
        requested: Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<Batch> {
        let since = requested.since.unwrap_or(self.settings.epoch);
        let mut until = requested.until;
        let mut shrinks = 0;

        // The provider's own cap wins over a looser configured one
        let cap = client
            .result_cap()
            .map_or(self.settings.result_cap, |cap| cap.min(self.settings.result_cap));

        loop {
            ensure_active(cancel)?;

            let users =
                until_cancelled(cancel, client.list_users_updated_during(since, until)).await?;
            if users.len() < cap {
                debug!("Window {} - {} returned {} users", since, until, users.len());
                return Ok(Batch {
                    checkpoint: Checkpoint {
                        since: Some(since),
                        until,
                    },
                    users,
                });
            }

            if shrinks >= self.settings.max_window_shrinks {
                return Err(TesseraError::sync_error(format!(
                    "window starting {} still hit the {} result cap after {} shrinks",
                    since, cap, shrinks
                )));
            }

            let half = (until - since) / 2;
            if half < self.settings.min_window {
                return Err(TesseraError::sync_error(format!(
                    "window starting {} hit the {} result cap and cannot shrink below {}s",
                    since,
                    cap,
                    self.settings.min_window.num_seconds()
                )));
            }

            until -= half;
            shrinks += 1;
            debug!(
                "Result cap reached, shrinking window to {} - {} (shrink {})",
                since, until, shrinks
            );

            pause(self.settings.rate_limit_delay, cancel).await?;
        }
    }
}
