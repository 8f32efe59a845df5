//! Sync orchestration
//!
//! Drives collection and reconciliation for one tenant and persists the
//! resulting runs. Callers must not run two syncs for the same tenant at
//! the same time, the checkpoint is not locked here.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use tessera_core::{
    identity::{ManagementClient, ManagementClientFactory, TenantProviderSettings, UserProfile},
    CheckpointStore, IdentityProviderId, Result, SyncRecord, SyncRun, SyncRunType, TesseraError,
};

use crate::reconcile::{ReconcileMode, Reconciler};
use crate::settings::SyncSettings;
use crate::strategy::{ensure_active, pause, strategy_for};

/// Runs persisted by one `sync_all_users` call, oldest first
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub runs: Vec<SyncRun>,
}

impl SyncSummary {
    pub fn total_records(&self) -> u32 {
        self.runs.iter().map(|run| run.total_records).sum()
    }

    pub fn failed_records(&self) -> u32 {
        self.runs.iter().map(|run| run.failed_records).sum()
    }

    pub fn warning_records(&self) -> u32 {
        self.runs.iter().map(|run| run.warning_records).sum()
    }
}

pub struct SyncOrchestrator {
    store: Arc<dyn CheckpointStore>,
    factory: Arc<dyn ManagementClientFactory>,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        factory: Arc<dyn ManagementClientFactory>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            factory,
            settings,
        }
    }

    /// Bring every follower of the tenant in line with the active provider.
    ///
    /// Loops over consecutive runs until one reaches the time the loop
    /// iteration started. Run-level failures are persisted on a failed run
    /// and returned. A cancelled run is not persisted, nor are its records.
    #[instrument(skip_all, fields(tenant_id = %tenant.tenant_id))]
    pub async fn sync_all_users(
        &self,
        tenant: &TenantProviderSettings,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary> {
        ensure_active(cancel)?;

        let active_id = tenant.active_provider_id;
        let follower_ids: Vec<IdentityProviderId> =
            tenant.follower_providers().iter().map(|p| p.id).collect();

        let (source, followers) = match self.connect(tenant).await {
            Ok(clients) => clients,
            Err(TesseraError::Cancelled) => return Err(TesseraError::Cancelled),
            Err(e) => {
                let run = SyncRun::new(
                    tenant.tenant_id,
                    SyncRunType::UserSync,
                    active_id,
                    follower_ids,
                    None,
                    Utc::now(),
                );
                return Err(self.fail_run(run, e).await);
            }
        };

        let strategy = strategy_for(source.provider_type(), &self.settings);
        let mut summary = SyncSummary::default();

        loop {
            let loop_start = Utc::now();
            let requested = strategy
                .resume(self.store.as_ref(), active_id, loop_start)
                .await?;

            let mut run = SyncRun::new(
                tenant.tenant_id,
                SyncRunType::UserSync,
                active_id,
                follower_ids.clone(),
                requested.since,
                requested.until,
            );
            info!(
                "Starting {} sync run {} ({:?} - {})",
                strategy.name(),
                run.id,
                requested.since,
                requested.until
            );

            let batch = match strategy.fetch(source.as_ref(), requested, cancel).await {
                Ok(batch) => batch,
                Err(TesseraError::Cancelled) => return Err(TesseraError::Cancelled),
                Err(e) => return Err(self.fail_run(run, e).await),
            };
            run.since = batch.checkpoint.since;
            run.until = batch.checkpoint.until;

            let reconciler = Reconciler::new(
                &followers,
                ReconcileMode::Sync {
                    audit_unchanged: strategy.audits_unchanged(),
                },
            );
            let records = reconciler.reconcile(&mut run, &batch.users, cancel).await?;

            self.persist(&mut run, &records).await?;
            info!(
                "Finished sync run {}: {} users, {} failed, {} warnings",
                run.id, run.total_records, run.failed_records, run.warning_records
            );

            let caught_up = run.until >= loop_start;
            summary.runs.push(run);
            if caught_up {
                break;
            }

            pause(self.settings.rate_limit_delay, cancel).await?;
        }

        Ok(summary)
    }

    /// Import an explicit set of users into the tenant's active provider.
    ///
    /// Existing users are never modified, they are recorded as duplicates.
    #[instrument(skip_all, fields(tenant_id = %tenant.tenant_id, users = users.len()))]
    pub async fn import_users(
        &self,
        tenant: &TenantProviderSettings,
        users: &[UserProfile],
        cancel: &CancellationToken,
    ) -> Result<SyncRun> {
        ensure_active(cancel)?;

        let mut run = SyncRun::new(
            tenant.tenant_id,
            SyncRunType::AppImportSync,
            tenant.active_provider_id,
            Vec::new(),
            None,
            Utc::now(),
        );

        let target = match self.active_client(tenant).await {
            Ok(client) => client,
            Err(e) => return Err(self.fail_run(run, e).await),
        };
        let targets = [target];

        let reconciler = Reconciler::new(&targets, ReconcileMode::Import);
        let records = reconciler.reconcile(&mut run, users, cancel).await?;

        self.persist(&mut run, &records).await?;
        info!(
            "Finished import run {}: {} users, {} failed, {} duplicates",
            run.id, run.total_records, run.failed_records, run.warning_records
        );

        Ok(run)
    }

    async fn active_client(
        &self,
        tenant: &TenantProviderSettings,
    ) -> Result<Arc<dyn ManagementClient>> {
        let active = tenant.active_provider()?;
        self.factory.management_client(active).await
    }

    /// Build the source client and one client per follower
    async fn connect(
        &self,
        tenant: &TenantProviderSettings,
    ) -> Result<(Arc<dyn ManagementClient>, Vec<Arc<dyn ManagementClient>>)> {
        let active = tenant.active_provider()?;
        let follower_configs = tenant.follower_providers();

        if follower_configs.is_empty() {
            return Err(TesseraError::config_error(format!(
                "no follower providers configured for tenant {}",
                tenant.tenant_id
            )));
        }

        if let Some(unsupported) = follower_configs
            .iter()
            .find(|p| !p.provider_type.supports_sync_target())
        {
            return Err(TesseraError::config_error(format!(
                "follower {} is not a supported sync target",
                unsupported
            )));
        }

        let source = self.factory.management_client(active).await?;

        let mut followers = Vec::with_capacity(follower_configs.len());
        for config in follower_configs {
            followers.push(self.factory.management_client(config).await?);
        }

        Ok((source, followers))
    }

    /// Save a finished run, then its records
    async fn persist(&self, run: &mut SyncRun, records: &[SyncRecord]) -> Result<()> {
        run.updated_at = Utc::now();
        self.store.save_sync_run(run).await?;
        for record in records {
            self.store.save_sync_record(record).await?;
        }
        Ok(())
    }

    /// Persist `run` as failed and hand back the cause
    async fn fail_run(&self, mut run: SyncRun, cause: TesseraError) -> TesseraError {
        error!("Sync run {} failed: {}", run.id, cause);

        run.mark_failed(&cause);
        run.updated_at = Utc::now();
        if let Err(e) = self.store.save_sync_run(&run).await {
            error!("Failed to persist failed sync run {}: {}", run.id, e);
        }

        cause
    }
}
