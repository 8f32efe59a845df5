//! Reconciliation of source users against target providers

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use tessera_core::{
    identity::{AuthnType, ManagementClient, UserAuthn, UserProfile},
    Result, SyncAction, SyncRecord, SyncRun, TesseraError,
};

use crate::strategy::ensure_active;

/// Password set on users created from a password authn. The real password
/// never leaves the source provider, users reset it on first login.
pub const PLACEHOLDER_PASSWORD: &str = "Tessera-Sync-Placeholder-1!";

const AMBIGUOUS_EMAIL_MATCH: &str = "got multiple users for one email";
const AMBIGUOUS_OIDC_MATCH: &str = "got multiple users for one user's OIDC identities";
const NO_CHANGES: &str = "already synced, no changes";
const DUPLICATE_USER: &str = "duplicate user";

/// How matches on a target are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Keep followers in step with the active provider. The active provider
    /// always wins on profile fields.
    Sync { audit_unchanged: bool },
    /// Create missing users only. Existing users are left untouched.
    Import,
}

/// Outcome of reconciling one user against one target
enum Outcome {
    Created(String),
    Updated(String),
    Unchanged(String),
    Duplicate(String),
}

pub struct Reconciler<'a> {
    targets: &'a [Arc<dyn ManagementClient>],
    mode: ReconcileMode,
}

impl<'a> Reconciler<'a> {
    pub fn new(targets: &'a [Arc<dyn ManagementClient>], mode: ReconcileMode) -> Self {
        Self { targets, mode }
    }

    /// Reconcile `users` in order, updating the run counters and returning
    /// one record per (user, target) outcome.
    ///
    /// Nothing is persisted here: the caller saves the run before its
    /// records, so a cancelled run leaves no records behind. Per-user
    /// failures end up in records, only cancellation is returned.
    #[instrument(skip_all, fields(run_id = %run.id, users = users.len()))]
    pub async fn reconcile(
        &self,
        run: &mut SyncRun,
        users: &[UserProfile],
        cancel: &CancellationToken,
    ) -> Result<Vec<SyncRecord>> {
        let mut records = Vec::new();

        for user in users {
            ensure_active(cancel)?;

            let object_id = user.object_id();
            run.total_records += 1;
            run.failed_records += 1;
            let mut failed = false;

            for target in self.targets {
                ensure_active(cancel)?;

                let target_id = target.provider_id();
                let record = match self.reconcile_user(target.as_ref(), user).await {
                    Ok(outcome) => match self.record_for(run, &object_id, outcome) {
                        Some(record) => record,
                        None => continue,
                    },
                    Err(TesseraError::Cancelled) => return Err(TesseraError::Cancelled),
                    Err(e) => {
                        warn!(
                            "Failed to sync user {} to provider {}: {}",
                            object_id, target_id, e
                        );
                        failed = true;
                        SyncRecord::failure(run.id, &object_id, &e)
                    }
                };

                records.push(record.with_follower(target_id));
            }

            if !failed {
                run.failed_records -= 1;
            }
        }

        Ok(records)
    }

    /// Turn an outcome into a record, or `None` when it is not audited
    fn record_for(&self, run: &mut SyncRun, object_id: &str, outcome: Outcome) -> Option<SyncRecord> {
        let record = match outcome {
            Outcome::Created(user_id) => {
                SyncRecord::success(run.id, object_id, SyncAction::Created).with_user_id(user_id)
            }
            Outcome::Updated(user_id) => {
                SyncRecord::success(run.id, object_id, SyncAction::Updated).with_user_id(user_id)
            }
            Outcome::Unchanged(user_id) => {
                if !matches!(self.mode, ReconcileMode::Sync { audit_unchanged: true }) {
                    return None;
                }
                run.warning_records += 1;
                SyncRecord::warning(run.id, object_id, SyncAction::Unchanged, NO_CHANGES)
                    .with_user_id(user_id)
            }
            Outcome::Duplicate(user_id) => {
                run.warning_records += 1;
                SyncRecord::warning(run.id, object_id, SyncAction::Skipped, DUPLICATE_USER)
                    .with_user_id(user_id)
            }
        };
        Some(record)
    }

    async fn reconcile_user(
        &self,
        target: &dyn ManagementClient,
        user: &UserProfile,
    ) -> Result<Outcome> {
        let mut matches = find_matches(target, user).await?;

        if matches.len() > 1 {
            let reason = if user.email.is_empty() {
                AMBIGUOUS_OIDC_MATCH
            } else {
                AMBIGUOUS_EMAIL_MATCH
            };
            return Err(TesseraError::sync_error(reason));
        }

        let Some(existing) = matches.pop() else {
            let user_id = create_user(target, user).await?;
            return Ok(Outcome::Created(user_id));
        };

        if self.mode == ReconcileMode::Import {
            return Ok(Outcome::Duplicate(existing.id));
        }

        let changed = user.changed_fields(&existing);
        if changed.is_empty() {
            return Ok(Outcome::Unchanged(existing.id));
        }

        debug!(
            "Updating {} on {}: {}",
            existing.id,
            target.provider_id(),
            changed.join(", ")
        );
        target.update_user(&existing.id, user).await?;
        Ok(Outcome::Updated(existing.id))
    }
}

/// Correlate `user` with the target's users: by email when present, else by
/// each OIDC identity.
async fn find_matches(target: &dyn ManagementClient, user: &UserProfile) -> Result<Vec<UserProfile>> {
    if !user.email.is_empty() {
        return target.list_users_for_email(&user.email, AuthnType::All).await;
    }

    let mut matches: Vec<UserProfile> = Vec::new();
    for (provider, issuer_url, subject) in user.oidc_authns() {
        if let Some(found) = target
            .get_user_for_oidc(provider, issuer_url, subject, &user.email)
            .await?
        {
            if !matches.iter().any(|m| m.id == found.id) {
                matches.push(found);
            }
        }
    }
    Ok(matches)
}

/// Create from the first authn, then attach the rest in order
async fn create_user(target: &dyn ManagementClient, user: &UserProfile) -> Result<String> {
    let (first, rest) = user
        .authns
        .split_first()
        .ok_or_else(|| TesseraError::invalid_input("user has no authns"))?;

    let user_id = match first {
        UserAuthn::Password { username } => {
            target
                .create_user_with_password(username, PLACEHOLDER_PASSWORD, user)
                .await?
        }
        UserAuthn::Oidc {
            provider,
            issuer_url,
            subject,
        } => {
            target
                .create_user_with_oidc(*provider, issuer_url, subject, user)
                .await?
        }
    };

    for authn in rest {
        match authn {
            UserAuthn::Password { username } => {
                target
                    .add_password_authn_to_user(&user_id, username, PLACEHOLDER_PASSWORD)
                    .await?
            }
            UserAuthn::Oidc {
                provider,
                issuer_url,
                subject,
            } => {
                target
                    .add_oidc_authn_to_user(&user_id, *provider, issuer_url, subject)
                    .await?
            }
        }
    }

    debug!("Created {} on {}", user_id, target.provider_id());
    Ok(user_id)
}
