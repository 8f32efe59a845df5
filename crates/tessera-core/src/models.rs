//! Sync checkpoint models
//!
//! A [`SyncRun`] covers one execution window of the sync engine and carries
//! aggregate counters. A [`SyncRecord`] is the append-only audit entry for
//! one user within one run.

use crate::ids::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Sync Runs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunType {
    /// Active provider to followers
    UserSync,
    /// Explicit user batch imported into the active provider
    AppImportSync,
}

impl SyncRunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserSync => "user_sync",
            Self::AppImportSync => "app_import_sync",
        }
    }
}

impl fmt::Display for SyncRunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncRunType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user_sync" => Ok(Self::UserSync),
            "app_import_sync" => Ok(Self::AppImportSync),
            other => Err(format!("unknown sync run type '{}'", other)),
        }
    }
}

/// One execution of a sync batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncRunId,
    pub tenant_id: TenantId,
    pub run_type: SyncRunType,
    pub active_provider_id: IdentityProviderId,
    pub follower_provider_ids: Vec<IdentityProviderId>,
    /// Start of the covered window; unused by full-snapshot runs
    pub since: Option<DateTime<Utc>>,
    /// End of the covered window, or the run time for full-snapshot runs
    pub until: DateTime<Utc>,
    pub total_records: u32,
    pub failed_records: u32,
    pub warning_records: u32,
    /// Run-level failure cause. A run with an error is never a resume point.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncRun {
    pub fn new(
        tenant_id: TenantId,
        run_type: SyncRunType,
        active_provider_id: IdentityProviderId,
        follower_provider_ids: Vec<IdentityProviderId>,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SyncRunId::new(),
            tenant_id,
            run_type,
            active_provider_id,
            follower_provider_ids,
            since,
            until,
            total_records: 0,
            failed_records: 0,
            warning_records: 0,
            error: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Record a run-level failure
    pub fn mark_failed(&mut self, cause: impl fmt::Display) {
        self.error = Some(cause.to_string());
    }
}

/// Filter for listing sync runs
#[derive(Debug, Clone, Default)]
pub struct SyncRunFilter {
    pub tenant_id: Option<TenantId>,
    pub active_provider_id: Option<IdentityProviderId>,
    pub run_type: Option<SyncRunType>,
    pub failed_only: bool,
}

impl SyncRunFilter {
    pub fn matches(&self, run: &SyncRun) -> bool {
        self.tenant_id.map_or(true, |id| run.tenant_id == id)
            && self
                .active_provider_id
                .map_or(true, |id| run.active_provider_id == id)
            && self.run_type.map_or(true, |t| run.run_type == t)
            && (!self.failed_only || !run.is_successful())
    }
}

// =============================================================================
// Sync Records
// =============================================================================

/// What happened to one user on one follower
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    Unchanged,
    /// Left untouched on purpose (e.g., a duplicate during import)
    Skipped,
    Failed,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SyncAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "unchanged" => Ok(Self::Unchanged),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync action '{}'", other)),
        }
    }
}

/// Audit outcome for one user within one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: SyncRecordId,
    pub sync_run_id: SyncRunId,
    /// External correlation key, the email address for user sync
    pub object_id: String,
    /// Follower this outcome concerns, when there is one
    pub follower_provider_id: Option<IdentityProviderId>,
    /// Provider-local user ID on the follower, when known
    pub user_id: Option<String>,
    pub action: SyncAction,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SyncRecord {
    fn new(sync_run_id: SyncRunId, object_id: impl Into<String>, action: SyncAction) -> Self {
        Self {
            id: SyncRecordId::new(),
            sync_run_id,
            object_id: object_id.into(),
            follower_provider_id: None,
            user_id: None,
            action,
            error: None,
            warning: None,
            created_at: Utc::now(),
        }
    }

    pub fn success(sync_run_id: SyncRunId, object_id: impl Into<String>, action: SyncAction) -> Self {
        Self::new(sync_run_id, object_id, action)
    }

    pub fn failure(
        sync_run_id: SyncRunId,
        object_id: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        let mut record = Self::new(sync_run_id, object_id, SyncAction::Failed);
        record.error = Some(error.to_string());
        record
    }

    pub fn warning(
        sync_run_id: SyncRunId,
        object_id: impl Into<String>,
        action: SyncAction,
        warning: impl Into<String>,
    ) -> Self {
        let mut record = Self::new(sync_run_id, object_id, action);
        record.warning = Some(warning.into());
        record
    }

    pub fn with_follower(mut self, follower_provider_id: IdentityProviderId) -> Self {
        self.follower_provider_id = Some(follower_provider_id);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
