//! Full-snapshot collection for providers that can list every user

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use tessera_core::{identity::ManagementClient, CheckpointStore, IdentityProviderId, Result};

use crate::strategy::{ensure_active, until_cancelled, Batch, Checkpoint, CollectionStrategy};

/// Re-lists every user on every run. Unchanged users are not audited, the
/// trail would otherwise grow by the whole user base each run.
pub struct SnapshotStrategy;

#[async_trait]
impl CollectionStrategy for SnapshotStrategy {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn audits_unchanged(&self) -> bool {
        false
    }

    async fn resume(
        &self,
        _store: &dyn CheckpointStore,
        _active_provider_id: IdentityProviderId,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        Ok(Checkpoint {
            since: None,
            until: now,
        })
    }

    #[instrument(skip(self, client, cancel), fields(provider_id = %client.provider_id()))]
    async fn fetch(
        &self,
        client: &dyn ManagementClient,
        requested: Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<Batch> {
        ensure_active(cancel)?;

        let users = until_cancelled(cancel, client.list_users()).await?;
        debug!("Snapshot listed {} users", users.len());

        Ok(Batch {
            checkpoint: requested,
            users,
        })
    }
}
