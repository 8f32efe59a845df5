//! Collection strategies
//!
//! A strategy decides which window of the active provider a run covers and
//! pulls the candidate users for it. One strategy is picked per run from the
//! active provider's type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use tessera_core::{
    identity::{ManagementClient, ProviderType, UserProfile},
    CheckpointStore, IdentityProviderId, Result, TesseraError,
};

use crate::settings::SyncSettings;
use crate::snapshot::SnapshotStrategy;
use crate::windowed::WindowedStrategy;

/// The span of provider time a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Unset for full-snapshot runs
    pub since: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
}

/// Users pulled for one run, with the window actually covered
#[derive(Debug, Clone)]
pub struct Batch {
    pub checkpoint: Checkpoint,
    pub users: Vec<UserProfile>,
}

#[async_trait]
pub trait CollectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether users already in sync get an audit record
    fn audits_unchanged(&self) -> bool;

    /// The window the next run should request
    async fn resume(
        &self,
        store: &dyn CheckpointStore,
        active_provider_id: IdentityProviderId,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint>;

    /// Pull users for `requested`. The returned checkpoint may be narrower.
    async fn fetch(
        &self,
        client: &dyn ManagementClient,
        requested: Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<Batch>;
}

/// Pick the strategy for an active provider
pub fn strategy_for(
    provider_type: ProviderType,
    settings: &SyncSettings,
) -> Arc<dyn CollectionStrategy> {
    if provider_type.supports_full_listing() {
        Arc::new(SnapshotStrategy)
    } else {
        Arc::new(WindowedStrategy::new(settings.clone()))
    }
}

/// Sleep for `delay` unless cancelled first
pub(crate) async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    if delay.is_zero() {
        return ensure_active(cancel);
    }

    tokio::select! {
        () = cancel.cancelled() => Err(TesseraError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Drive `work` to completion unless cancelled first. Dropping `work` on
/// cancellation abandons any provider request or page delay in flight.
pub(crate) async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        () = cancel.cancelled() => Err(TesseraError::Cancelled),
        result = work => result,
    }
}

pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(TesseraError::Cancelled);
    }
    Ok(())
}
