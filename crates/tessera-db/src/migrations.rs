//! Schema migrations for the checkpoint tables

use sqlx::PgPool;
use tessera_core::{Result, TesseraError};
use tracing::{debug, info};

/// Statements applied in order. Each is idempotent so the whole list can be
/// replayed on every start.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "create_sync_runs",
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL,
            run_type TEXT NOT NULL,
            active_provider_id UUID NOT NULL,
            follower_provider_ids UUID[] NOT NULL DEFAULT '{}',
            since TIMESTAMPTZ,
            until TIMESTAMPTZ NOT NULL,
            total_records BIGINT NOT NULL DEFAULT 0,
            failed_records BIGINT NOT NULL DEFAULT 0,
            warning_records BIGINT NOT NULL DEFAULT 0,
            error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            deleted_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "index_sync_runs_provider",
        r#"
        CREATE INDEX IF NOT EXISTS idx_sync_runs_provider_created
            ON sync_runs (active_provider_id, created_at DESC)
            WHERE deleted_at IS NULL
        "#,
    ),
    (
        "create_sync_records",
        r#"
        CREATE TABLE IF NOT EXISTS sync_records (
            id UUID PRIMARY KEY,
            sync_run_id UUID NOT NULL,
            object_id TEXT NOT NULL,
            follower_provider_id UUID,
            user_id TEXT,
            action TEXT NOT NULL,
            error TEXT,
            warning TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "index_sync_records_run",
        r#"
        CREATE INDEX IF NOT EXISTS idx_sync_records_run
            ON sync_records (sync_run_id, created_at)
        "#,
    ),
];

/// Apply all migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running checkpoint schema migrations");

    for (name, statement) in MIGRATIONS {
        debug!("Applying migration {}", name);
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| {
                TesseraError::database_error(format!("Migration {} failed: {}", name, e))
            })?;
    }

    info!("Applied {} migrations", MIGRATIONS.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_names_are_unique() {
        let mut names: Vec<_> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MIGRATIONS.len());
    }

    #[test]
    fn test_migrations_are_replayable() {
        for (name, statement) in MIGRATIONS {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "migration {} is not idempotent",
                name
            );
        }
    }
}
