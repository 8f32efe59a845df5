//! Checkpoint store backed by PostgreSQL

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use tessera_core::{
    CheckpointStore, IdentityProviderId, Result, SyncRecord, SyncRecordId, SyncRun,
    SyncRunFilter, SyncRunId, SyncRunType, TenantId, TesseraError,
};

const SYNC_RUN_COLUMNS: &str = "id, tenant_id, run_type, active_provider_id, follower_provider_ids, \
     since, until, total_records, failed_records, warning_records, error, \
     created_at, updated_at, deleted_at";

const SYNC_RECORD_COLUMNS: &str = "id, sync_run_id, object_id, follower_provider_id, user_id, \
     action, error, warning, created_at";

/// PostgreSQL implementation of CheckpointStore
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn db_err(e: sqlx::Error) -> TesseraError {
        TesseraError::database_error(e.to_string())
    }

    fn counter(row: &PgRow, column: &str) -> Result<u32> {
        let value: i64 = row.try_get(column).map_err(Self::db_err)?;
        u32::try_from(value).map_err(|_| {
            TesseraError::database_error(format!("{} out of range: {}", column, value))
        })
    }

    /// Parse row into SyncRun
    fn row_to_sync_run(row: &PgRow) -> Result<SyncRun> {
        let run_type: String = row.try_get("run_type").map_err(Self::db_err)?;
        let follower_ids: Vec<Uuid> = row.try_get("follower_provider_ids").map_err(Self::db_err)?;

        Ok(SyncRun {
            id: SyncRunId::from_uuid(row.try_get("id").map_err(Self::db_err)?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(Self::db_err)?),
            run_type: run_type.parse().map_err(TesseraError::database_error)?,
            active_provider_id: IdentityProviderId::from_uuid(
                row.try_get("active_provider_id").map_err(Self::db_err)?,
            ),
            follower_provider_ids: follower_ids
                .into_iter()
                .map(IdentityProviderId::from_uuid)
                .collect(),
            since: row.try_get("since").map_err(Self::db_err)?,
            until: row.try_get("until").map_err(Self::db_err)?,
            total_records: Self::counter(row, "total_records")?,
            failed_records: Self::counter(row, "failed_records")?,
            warning_records: Self::counter(row, "warning_records")?,
            error: row.try_get("error").map_err(Self::db_err)?,
            created_at: row.try_get("created_at").map_err(Self::db_err)?,
            updated_at: row.try_get("updated_at").map_err(Self::db_err)?,
            deleted_at: row.try_get("deleted_at").map_err(Self::db_err)?,
        })
    }

    /// Parse row into SyncRecord
    fn row_to_sync_record(row: &PgRow) -> Result<SyncRecord> {
        let action: String = row.try_get("action").map_err(Self::db_err)?;

        Ok(SyncRecord {
            id: SyncRecordId::from_uuid(row.try_get("id").map_err(Self::db_err)?),
            sync_run_id: SyncRunId::from_uuid(row.try_get("sync_run_id").map_err(Self::db_err)?),
            object_id: row.try_get("object_id").map_err(Self::db_err)?,
            follower_provider_id: row
                .try_get::<Option<Uuid>, _>("follower_provider_id")
                .map_err(Self::db_err)?
                .map(IdentityProviderId::from_uuid),
            user_id: row.try_get("user_id").map_err(Self::db_err)?,
            action: action.parse().map_err(TesseraError::database_error)?,
            error: row.try_get("error").map_err(Self::db_err)?,
            warning: row.try_get("warning").map_err(Self::db_err)?,
            created_at: row.try_get("created_at").map_err(Self::db_err)?,
        })
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    #[instrument(skip(self, run), fields(run_id = %run.id))]
    async fn save_sync_run(&self, run: &SyncRun) -> Result<()> {
        let follower_ids: Vec<Uuid> = run
            .follower_provider_ids
            .iter()
            .map(|id| *id.as_uuid())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                id, tenant_id, run_type, active_provider_id, follower_provider_ids,
                since, until, total_records, failed_records, warning_records, error,
                created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), $13)
            ON CONFLICT (id) DO UPDATE SET
                run_type = EXCLUDED.run_type,
                follower_provider_ids = EXCLUDED.follower_provider_ids,
                since = EXCLUDED.since,
                until = EXCLUDED.until,
                total_records = EXCLUDED.total_records,
                failed_records = EXCLUDED.failed_records,
                warning_records = EXCLUDED.warning_records,
                error = EXCLUDED.error,
                updated_at = NOW(),
                deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.tenant_id.as_uuid())
        .bind(run.run_type.as_str())
        .bind(run.active_provider_id.as_uuid())
        .bind(&follower_ids)
        .bind(run.since)
        .bind(run.until)
        .bind(i64::from(run.total_records))
        .bind(i64::from(run.failed_records))
        .bind(i64::from(run.warning_records))
        .bind(&run.error)
        .bind(run.created_at)
        .bind(run.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(Self::db_err)?;

        debug!("Saved sync run {}", run.id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_sync_run(&self, id: SyncRunId) -> Result<Option<SyncRun>> {
        let query = format!(
            "SELECT {} FROM sync_runs WHERE id = $1 AND deleted_at IS NULL",
            SYNC_RUN_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::db_err)?;

        row.as_ref().map(Self::row_to_sync_run).transpose()
    }

    #[instrument(skip(self))]
    async fn get_latest_successful_sync_run(
        &self,
        active_provider_id: IdentityProviderId,
    ) -> Result<Option<SyncRun>> {
        let query = format!(
            "SELECT {} FROM sync_runs \
             WHERE active_provider_id = $1 AND run_type = $2 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC LIMIT 1",
            SYNC_RUN_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(active_provider_id.as_uuid())
            .bind(SyncRunType::UserSync.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::db_err)?;

        let latest = row.as_ref().map(Self::row_to_sync_run).transpose()?;
        Ok(latest.filter(SyncRun::is_successful))
    }

    #[instrument(skip(self, filter))]
    async fn list_sync_runs(
        &self,
        filter: &SyncRunFilter,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<SyncRun>> {
        let query = format!(
            "SELECT {} FROM sync_runs \
             WHERE deleted_at IS NULL \
               AND ($1::uuid IS NULL OR tenant_id = $1) \
               AND ($2::uuid IS NULL OR active_provider_id = $2) \
               AND ($3::text IS NULL OR run_type = $3) \
               AND (NOT $4 OR error IS NOT NULL) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $5 OFFSET $6",
            SYNC_RUN_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(filter.tenant_id.map(|id| *id.as_uuid()))
            .bind(filter.active_provider_id.map(|id| *id.as_uuid()))
            .bind(filter.run_type.map(|t| t.as_str()))
            .bind(filter.failed_only)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(Self::db_err)?;

        rows.iter().map(Self::row_to_sync_run).collect()
    }

    #[instrument(skip(self))]
    async fn delete_sync_run(&self, id: SyncRunId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sync_runs SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(Self::db_err)?;

        if result.rows_affected() == 0 {
            return Err(TesseraError::not_found("sync_run", id.to_string()));
        }

        Ok(())
    }

    #[instrument(skip(self, record), fields(record_id = %record.id))]
    async fn save_sync_record(&self, record: &SyncRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_records (
                id, sync_run_id, object_id, follower_provider_id, user_id,
                action, error, warning, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.sync_run_id.as_uuid())
        .bind(&record.object_id)
        .bind(record.follower_provider_id.map(|id| *id.as_uuid()))
        .bind(&record.user_id)
        .bind(record.action.as_str())
        .bind(&record.error)
        .bind(&record.warning)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(Self::db_err)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_sync_records(
        &self,
        sync_run_id: Option<SyncRunId>,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<SyncRecord>> {
        let query = format!(
            "SELECT {} FROM sync_records \
             WHERE ($1::uuid IS NULL OR sync_run_id = $1) \
             ORDER BY created_at ASC, id ASC \
             LIMIT $2 OFFSET $3",
            SYNC_RECORD_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(sync_run_id.map(|id| *id.as_uuid()))
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(Self::db_err)?;

        rows.iter().map(Self::row_to_sync_record).collect()
    }
}
