//! In-memory checkpoint store
//!
//! Mirrors the PostgreSQL semantics for tests and single-process runs.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use tessera_core::{
    CheckpointStore, IdentityProviderId, Result, SyncRecord, SyncRun, SyncRunFilter, SyncRunId,
    SyncRunType, TesseraError,
};

#[derive(Default)]
pub struct MemoryCheckpointStore {
    runs: RwLock<Vec<SyncRun>>,
    records: RwLock<Vec<SyncRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All runs including soft-deleted ones, in insertion order
    pub async fn all_runs(&self) -> Vec<SyncRun> {
        self.runs.read().await.clone()
    }

    /// All records in insertion order
    pub async fn all_records(&self) -> Vec<SyncRecord> {
        self.records.read().await.clone()
    }
}

fn page<T>(items: Vec<T>, offset: u32, limit: u32) -> Vec<T> {
    items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect()
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save_sync_run(&self, run: &SyncRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        let mut run = run.clone();
        run.updated_at = Utc::now();

        match runs.iter_mut().find(|existing| existing.id == run.id) {
            Some(existing) => {
                run.tenant_id = existing.tenant_id;
                run.active_provider_id = existing.active_provider_id;
                run.created_at = existing.created_at;
                *existing = run;
            }
            None => runs.push(run),
        }

        Ok(())
    }

    async fn get_sync_run(&self, id: SyncRunId) -> Result<Option<SyncRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .iter()
            .find(|run| run.id == id && !run.is_deleted())
            .cloned())
    }

    async fn get_latest_successful_sync_run(
        &self,
        active_provider_id: IdentityProviderId,
    ) -> Result<Option<SyncRun>> {
        let runs = self.runs.read().await;
        let latest = runs
            .iter()
            .filter(|run| {
                run.active_provider_id == active_provider_id
                    && run.run_type == SyncRunType::UserSync
                    && !run.is_deleted()
            })
            .max_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        Ok(latest.filter(|run| run.is_successful()).cloned())
    }

    async fn list_sync_runs(
        &self,
        filter: &SyncRunFilter,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<SyncRun>> {
        let runs = self.runs.read().await;
        let mut matching: Vec<SyncRun> = runs
            .iter()
            .filter(|run| !run.is_deleted() && filter.matches(run))
            .cloned()
            .collect();
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(page(matching, offset, limit))
    }

    async fn delete_sync_run(&self, id: SyncRunId) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .iter_mut()
            .find(|run| run.id == id && !run.is_deleted())
            .ok_or_else(|| TesseraError::not_found("sync_run", id.to_string()))?;

        run.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn save_sync_record(&self, record: &SyncRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn list_sync_records(
        &self,
        sync_run_id: Option<SyncRunId>,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<SyncRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<SyncRecord> = records
            .iter()
            .filter(|record| sync_run_id.map_or(true, |id| record.sync_run_id == id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        Ok(page(matching, offset, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tessera_core::{SyncAction, TenantId};

    fn run_for(provider: IdentityProviderId, age_minutes: i64) -> SyncRun {
        let now = Utc::now();
        let mut run = SyncRun::new(
            TenantId::new(),
            SyncRunType::UserSync,
            provider,
            vec![IdentityProviderId::new()],
            Some(now - Duration::hours(1)),
            now,
        );
        run.created_at = now - Duration::minutes(age_minutes);
        run
    }

    #[tokio::test]
    async fn test_latest_successful_run() {
        let store = MemoryCheckpointStore::new();
        let provider = IdentityProviderId::new();

        assert!(store
            .get_latest_successful_sync_run(provider)
            .await
            .unwrap()
            .is_none());

        let older = run_for(provider, 10);
        let newer = run_for(provider, 5);
        store.save_sync_run(&older).await.unwrap();
        store.save_sync_run(&newer).await.unwrap();
        store
            .save_sync_run(&run_for(IdentityProviderId::new(), 0))
            .await
            .unwrap();

        let latest = store
            .get_latest_successful_sync_run(provider)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, newer.id);
    }

    #[tokio::test]
    async fn test_failed_latest_run_resets_checkpoint() {
        let store = MemoryCheckpointStore::new();
        let provider = IdentityProviderId::new();

        store.save_sync_run(&run_for(provider, 10)).await.unwrap();
        let mut failed = run_for(provider, 1);
        failed.mark_failed("provider unreachable");
        store.save_sync_run(&failed).await.unwrap();

        assert!(store
            .get_latest_successful_sync_run(provider)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_import_runs_are_not_checkpoints() {
        let store = MemoryCheckpointStore::new();
        let provider = IdentityProviderId::new();
        let sync = run_for(provider, 10);
        store.save_sync_run(&sync).await.unwrap();

        let mut import = run_for(provider, 1);
        import.run_type = SyncRunType::AppImportSync;
        store.save_sync_run(&import).await.unwrap();

        let latest = store
            .get_latest_successful_sync_run(provider)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, sync.id);
    }

    #[tokio::test]
    async fn test_save_overwrites_counters() {
        let store = MemoryCheckpointStore::new();
        let mut run = run_for(IdentityProviderId::new(), 0);
        store.save_sync_run(&run).await.unwrap();

        run.total_records = 7;
        run.failed_records = 2;
        store.save_sync_run(&run).await.unwrap();

        let stored = store.get_sync_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.total_records, 7);
        assert_eq!(stored.failed_records, 2);
        assert_eq!(store.all_runs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_run() {
        let store = MemoryCheckpointStore::new();
        let provider = IdentityProviderId::new();
        let run = run_for(provider, 0);
        store.save_sync_run(&run).await.unwrap();

        store.delete_sync_run(run.id).await.unwrap();

        assert!(store.get_sync_run(run.id).await.unwrap().is_none());
        assert!(store
            .get_latest_successful_sync_run(provider)
            .await
            .unwrap()
            .is_none());
        assert!(store.all_runs().await[0].is_deleted());

        let err = store.delete_sync_run(run.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_runs_newest_first_with_paging() {
        let store = MemoryCheckpointStore::new();
        let provider = IdentityProviderId::new();
        let runs: Vec<_> = (0..5).map(|i| run_for(provider, 50 - i * 10)).collect();
        for run in &runs {
            store.save_sync_run(run).await.unwrap();
        }

        let filter = SyncRunFilter {
            active_provider_id: Some(provider),
            ..Default::default()
        };
        let first_page = store.list_sync_runs(&filter, 0, 2).await.unwrap();
        assert_eq!(first_page[0].id, runs[4].id);
        assert_eq!(first_page[1].id, runs[3].id);

        let last_page = store.list_sync_runs(&filter, 4, 2).await.unwrap();
        assert_eq!(last_page.len(), 1);
        assert_eq!(last_page[0].id, runs[0].id);
    }

    #[tokio::test]
    async fn test_records_scoped_to_run() {
        let store = MemoryCheckpointStore::new();
        let run_a = SyncRunId::new();
        let run_b = SyncRunId::new();

        store
            .save_sync_record(&SyncRecord::success(run_a, "a@example.com", SyncAction::Created))
            .await
            .unwrap();
        store
            .save_sync_record(&SyncRecord::failure(run_b, "b@example.com", "boom"))
            .await
            .unwrap();

        let scoped = store.list_sync_records(Some(run_b), 0, 10).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].action, SyncAction::Failed);

        let all = store.list_sync_records(None, 0, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
