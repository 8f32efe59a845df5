//! Core traits for the Tessera platform

use crate::{error::Result, ids::*, models::*};
use async_trait::async_trait;

// =============================================================================
// Checkpoint Store
// =============================================================================

/// Persistence for sync runs and their per-user records.
///
/// Runs and records are written once and read many times. The only
/// in-place change to a historical run is the soft delete used by cleanup.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert or overwrite a run
    async fn save_sync_run(&self, run: &SyncRun) -> Result<()>;

    /// Get a live (not soft-deleted) run by ID
    async fn get_sync_run(&self, id: SyncRunId) -> Result<Option<SyncRun>>;

    /// The most recent live user-sync run for the provider, if and only if
    /// it succeeded.
    ///
    /// A failed most-recent run yields `None` so that incremental sync
    /// restarts from the beginning instead of trusting a broken checkpoint.
    async fn get_latest_successful_sync_run(
        &self,
        active_provider_id: IdentityProviderId,
    ) -> Result<Option<SyncRun>>;

    /// List live runs, newest first
    async fn list_sync_runs(
        &self,
        filter: &SyncRunFilter,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<SyncRun>>;

    /// Soft-delete a run
    async fn delete_sync_run(&self, id: SyncRunId) -> Result<()>;

    /// Append a record
    async fn save_sync_record(&self, record: &SyncRecord) -> Result<()>;

    /// List records, optionally scoped to one run, oldest first
    async fn list_sync_records(
        &self,
        sync_run_id: Option<SyncRunId>,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<SyncRecord>>;
}
