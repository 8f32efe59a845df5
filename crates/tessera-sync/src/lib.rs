//! Tessera Sync - Keeps follower identity providers in step with the active one

pub mod orchestrator;
pub mod reconcile;
pub mod settings;
pub mod snapshot;
pub mod strategy;
pub mod windowed;


pub use orchestrator::{SyncOrchestrator, SyncSummary};
pub use reconcile::{ReconcileMode, Reconciler, PLACEHOLDER_PASSWORD};
pub use settings::SyncSettings;
pub use snapshot::SnapshotStrategy;
pub use strategy::{strategy_for, Batch, Checkpoint, CollectionStrategy};
pub use windowed::WindowedStrategy;
