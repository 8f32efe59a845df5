//! Tessera sync worker

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::Settings;
use tessera_core::{
    identity::UserProfile, CheckpointStore, SyncRunFilter, SyncRunId, TenantId, TesseraError,
};
use tessera_db::{create_pool, run_migrations, MemoryCheckpointStore, PgCheckpointStore};
use tessera_identity::ProviderRegistry;
use tessera_sync::SyncOrchestrator;

/// Keeps follower identity providers in sync with each tenant's active provider.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync every configured tenant once
    Run {
        /// Only sync this tenant
        #[arg(long)]
        tenant: Option<TenantId>,
    },
    /// Sync every configured tenant on an interval until interrupted
    Serve {
        /// Seconds between passes, overrides `sync.interval_secs`
        #[arg(long)]
        interval: Option<u64>,
    },
    /// List sync runs, newest first
    Runs {
        #[arg(long)]
        tenant: Option<TenantId>,
        /// Only show failed runs
        #[arg(long)]
        failed: bool,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// List sync records, oldest first
    Records {
        /// Only show records of this run
        #[arg(long)]
        run: Option<SyncRunId>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// Import users from a JSON file into a tenant's active provider
    Import {
        #[arg(long)]
        tenant: TenantId,
        /// JSON array of user profiles
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let args = Args::parse();
    let settings = Settings::load().context("Failed to load configuration")?;

    info!("Starting Tessera sync worker v{}", env!("CARGO_PKG_VERSION"));

    let store = connect_store(&settings).await?;
    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        Arc::new(ProviderRegistry::new()),
        settings.sync.engine_settings(),
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match args.command {
        Command::Run { tenant } => {
            let failed = sync_tenants(&orchestrator, &settings, tenant, &cancel).await?;
            if failed > 0 {
                bail!("{} tenant(s) failed to sync", failed);
            }
        }
        Command::Serve { interval } => {
            let interval = interval
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| settings.sync.interval());
            serve(&orchestrator, &settings, interval, &cancel).await?;
        }
        Command::Runs {
            tenant,
            failed,
            offset,
            limit,
        } => {
            let filter = SyncRunFilter {
                tenant_id: tenant,
                failed_only: failed,
                ..SyncRunFilter::default()
            };
            for run in store.list_sync_runs(&filter, offset, limit).await? {
                println!(
                    "{}  {}  {}  {} .. {}  total={} failed={} warnings={}  {}",
                    run.id,
                    run.tenant_id,
                    run.run_type,
                    run.since
                        .map(|since| since.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    run.until.to_rfc3339(),
                    run.total_records,
                    run.failed_records,
                    run.warning_records,
                    run.error.as_deref().unwrap_or("ok"),
                );
            }
        }
        Command::Records { run, offset, limit } => {
            for record in store.list_sync_records(run, offset, limit).await? {
                println!(
                    "{}  {}  {}  {}  {}",
                    record.sync_run_id,
                    record.object_id,
                    record.action.as_str(),
                    record.user_id.as_deref().unwrap_or("-"),
                    record
                        .error
                        .as_deref()
                        .or(record.warning.as_deref())
                        .unwrap_or(""),
                );
            }
        }
        Command::Import { tenant, file } => {
            let tenant = settings
                .tenant(tenant)
                .with_context(|| format!("Tenant {} is not configured", tenant))?;
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let users: Vec<UserProfile> =
                serde_json::from_str(&raw).context("Failed to parse user profiles")?;

            let run = orchestrator.import_users(tenant, &users, &cancel).await?;
            info!(
                "Import run {} finished: {} users, {} failed, {} duplicates",
                run.id, run.total_records, run.failed_records, run.warning_records
            );
        }
    }

    cancel.cancel();
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tessera=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

async fn connect_store(settings: &Settings) -> Result<Arc<dyn CheckpointStore>> {
    let Some(db_config) = settings.database_config() else {
        warn!("No database configured, checkpoints are kept in memory only");
        return Ok(Arc::new(MemoryCheckpointStore::new()));
    };

    info!("Connecting to PostgreSQL...");
    let pool = create_pool(&db_config)
        .await
        .context("Failed to connect to PostgreSQL")?;
    run_migrations(&pool)
        .await
        .context("Failed to migrate checkpoint schema")?;

    Ok(Arc::new(PgCheckpointStore::new(pool)))
}

/// One pass over the configured tenants, returning how many failed.
///
/// Tenants are synced one after another so no two runs share a checkpoint.
async fn sync_tenants(
    orchestrator: &SyncOrchestrator,
    settings: &Settings,
    only: Option<TenantId>,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut failed = 0;

    for tenant in &settings.tenants {
        if only.is_some_and(|id| id != tenant.tenant_id) {
            continue;
        }

        match orchestrator.sync_all_users(tenant, cancel).await {
            Ok(summary) => info!(
                "Tenant {} synced in {} run(s): {} users, {} failed, {} warnings",
                tenant.tenant_id,
                summary.runs.len(),
                summary.total_records(),
                summary.failed_records(),
                summary.warning_records()
            ),
            Err(TesseraError::Cancelled) => {
                info!("Cancellation requested. Stopping sync.");
                break;
            }
            Err(e) => {
                error!("Sync failed for tenant {}: {}", tenant.tenant_id, e);
                failed += 1;
            }
        }
    }

    Ok(failed)
}

/// Periodic sync loop
async fn serve(
    orchestrator: &SyncOrchestrator,
    settings: &Settings,
    interval: std::time::Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("Syncing {} tenant(s) every {:?}", settings.tenants.len(), interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let failed = sync_tenants(orchestrator, settings, None, cancel).await?;
                if failed > 0 {
                    warn!("{} tenant(s) failed to sync this pass", failed);
                }
            },
            () = cancel.cancelled() => {
                info!("Cancellation requested. Stopping sync loop.");
                break;
            }
        }
    }

    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .inspect_err(|e| error!("failed to install Ctrl+C handler: {e}"))
            .ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = signal::unix::signal(signal::unix::SignalKind::terminate())
            .inspect_err(|e| error!("failed to install signal handler: {e}"))
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    token.cancel();
}
