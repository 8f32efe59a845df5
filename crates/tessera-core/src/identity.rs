//! Identity provider abstractions for cross-provider user sync
//!
//! Every backend IdP the platform can front (Auth0, Cognito, the native
//! Tessera IdP) is reached through a [`ManagementClient`]. Sync logic is
//! written only against that trait, so the engine never knows which wire
//! protocol a provider speaks.

use crate::{
    error::{Result, TesseraError},
    ids::{IdentityProviderId, TenantId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Provider Types and Configuration
// =============================================================================

/// Supported identity provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Auth0 tenant, reached through the Management API v2
    Auth0,
    /// AWS Cognito user pool
    Cognito,
    /// The platform's own IdP
    Native,
}

impl ProviderType {
    /// Whether users may be written to a provider of this type by the sync engine
    pub fn supports_sync_target(&self) -> bool {
        matches!(self, Self::Native)
    }

    /// Whether the provider can list every user in a single pass.
    ///
    /// Providers that cannot (Auth0 caps search results) are synced
    /// incrementally over time windows instead.
    pub fn supports_full_listing(&self) -> bool {
        matches!(self, Self::Cognito | Self::Native)
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth0 => write!(f, "auth0"),
            Self::Cognito => write!(f, "cognito"),
            Self::Native => write!(f, "native"),
        }
    }
}

/// Identity provider configuration for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProviderConfig {
    pub id: IdentityProviderId,
    pub name: String,
    pub provider_type: ProviderType,
    /// Provider-specific connection details
    pub config: ProviderConfigDetails,
}

impl IdentityProviderConfig {
    /// Check that the connection details match the declared provider type
    pub fn validate(&self) -> Result<()> {
        let matches = matches!(
            (&self.provider_type, &self.config),
            (ProviderType::Auth0, ProviderConfigDetails::Auth0(_))
                | (ProviderType::Cognito, ProviderConfigDetails::Cognito(_))
                | (ProviderType::Native, ProviderConfigDetails::Native(_))
        );

        if !matches {
            return Err(TesseraError::config_error(format!(
                "provider '{}' is declared as {} but carries {} configuration",
                self.name,
                self.provider_type,
                self.config.kind()
            )));
        }

        Ok(())
    }
}

impl fmt::Display for IdentityProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.provider_type, self.id)
    }
}

/// Provider-specific configuration details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfigDetails {
    Auth0(Auth0Config),
    Cognito(CognitoConfig),
    Native(NativeConfig),
}

impl ProviderConfigDetails {
    fn kind(&self) -> &'static str {
        match self {
            Self::Auth0(_) => "auth0",
            Self::Cognito(_) => "cognito",
            Self::Native(_) => "native",
        }
    }
}

/// Auth0 Management API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth0Config {
    /// Auth0 domain (e.g., "tenant.auth0.com")
    pub domain: String,
    /// Machine-to-machine client ID for the Management API
    pub client_id: String,
    /// Client secret
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// Management API audience, defaults to `https://{domain}/api/v2/`
    #[serde(default)]
    pub audience: Option<String>,
    /// Database connection used for username/password users
    #[serde(default = "default_auth0_connection")]
    pub connection: String,
}

fn default_auth0_connection() -> String {
    "Username-Password-Authentication".to_string()
}

/// AWS Cognito user pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitoConfig {
    /// AWS Region
    pub region: String,
    /// User pool ID
    pub user_pool_id: String,
    /// Explicit credentials, otherwise the default provider chain is used
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<String>,
}

/// Native Tessera IdP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeConfig {
    /// Base URL of the tenant's IdP (e.g., "https://acme.tessera.dev")
    pub base_url: String,
    /// Client ID used for the client-credentials grant
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
}

/// The set of providers configured for one tenant.
///
/// Exactly one provider is active (authoritative for logins); every other
/// provider is a follower that the sync engine keeps up to date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantProviderSettings {
    pub tenant_id: TenantId,
    pub providers: Vec<IdentityProviderConfig>,
    pub active_provider_id: IdentityProviderId,
}

impl TenantProviderSettings {
    /// Look up a provider by ID
    pub fn provider(&self, id: IdentityProviderId) -> Option<&IdentityProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// The provider currently authoritative for logins
    pub fn active_provider(&self) -> Result<&IdentityProviderConfig> {
        self.provider(self.active_provider_id).ok_or_else(|| {
            TesseraError::config_error(format!(
                "active provider {} is not configured for tenant {}",
                self.active_provider_id, self.tenant_id
            ))
        })
    }

    /// Every configured provider other than the active one, in configuration order
    pub fn follower_providers(&self) -> Vec<&IdentityProviderConfig> {
        self.providers
            .iter()
            .filter(|p| p.id != self.active_provider_id)
            .collect()
    }
}

// =============================================================================
// User Profiles
// =============================================================================

/// Authentication type filter for email lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthnType {
    All,
    Password,
    Oidc,
}

impl AuthnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Password => "password",
            Self::Oidc => "oidc",
        }
    }
}

/// Social/OIDC providers a user can authenticate with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OidcProviderType {
    Google,
    Facebook,
    LinkedIn,
    Microsoft,
    Custom,
}

impl fmt::Display for OidcProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Google => write!(f, "google"),
            Self::Facebook => write!(f, "facebook"),
            Self::LinkedIn => write!(f, "linked_in"),
            Self::Microsoft => write!(f, "microsoft"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// One authentication method attached to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "authn_type", rename_all = "snake_case")]
pub enum UserAuthn {
    /// Username + password. The password itself never leaves the source provider.
    Password { username: String },
    /// Federated login through an OIDC provider
    Oidc {
        provider: OidcProviderType,
        issuer_url: String,
        subject: String,
    },
}

impl UserAuthn {
    pub fn authn_type(&self) -> AuthnType {
        match self {
            Self::Password { .. } => AuthnType::Password,
            Self::Oidc { .. } => AuthnType::Oidc,
        }
    }
}

/// MFA channel registered for a user (informational only, never synced)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaChannel {
    pub channel_type: String,
    pub target: String,
    #[serde(default)]
    pub primary: bool,
}

/// Canonical user shape exchanged between providers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Provider-local opaque identifier
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub picture: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Ordered: the first entry creates the user, the rest are attached after
    #[serde(default)]
    pub authns: Vec<UserAuthn>,
    #[serde(default)]
    pub mfa_channels: Vec<MfaChannel>,
}

impl UserProfile {
    /// The identifier used to correlate this user across providers in audit records
    pub fn object_id(&self) -> String {
        if !self.email.is_empty() {
            return self.email.clone();
        }

        for authn in &self.authns {
            match authn {
                UserAuthn::Password { username } => return username.clone(),
                UserAuthn::Oidc {
                    issuer_url,
                    subject,
                    ..
                } => return format!("{}#{}", issuer_url, subject),
            }
        }

        self.id.clone()
    }

    /// Profile fields that differ from `other`, compared in a fixed order
    pub fn changed_fields(&self, other: &UserProfile) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.email != other.email {
            changed.push("email");
        }
        if self.name != other.name {
            changed.push("name");
        }
        if self.picture != other.picture {
            changed.push("picture");
        }
        if self.nickname != other.nickname {
            changed.push("nickname");
        }
        changed
    }

    /// OIDC identities attached to this user
    pub fn oidc_authns(&self) -> impl Iterator<Item = (OidcProviderType, &str, &str)> {
        self.authns.iter().filter_map(|authn| match authn {
            UserAuthn::Oidc {
                provider,
                issuer_url,
                subject,
            } => Some((*provider, issuer_url.as_str(), subject.as_str())),
            UserAuthn::Password { .. } => None,
        })
    }
}

// =============================================================================
// Management Client Traits
// =============================================================================

/// Capability surface every identity-provider backend implements.
///
/// Implementations must be safe to call again after a failure: the sync
/// engine never retries a call itself, a failed call only fails the one
/// user being processed.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Get the provider configuration ID
    fn provider_id(&self) -> IdentityProviderId;

    /// Get the provider type
    fn provider_type(&self) -> ProviderType;

    /// Most users a windowed search can return before results are silently
    /// truncated. `None` when searches are never truncated.
    fn result_cap(&self) -> Option<usize> {
        None
    }

    /// Users created or updated within `[since, until]`
    async fn list_users_updated_during(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UserProfile>>;

    /// Every user in the provider (where supported)
    async fn list_users(&self) -> Result<Vec<UserProfile>>;

    /// Users with the given email. Email is unique per password account but
    /// social logins may yield several users.
    async fn list_users_for_email(
        &self,
        email: &str,
        authn_type: AuthnType,
    ) -> Result<Vec<UserProfile>>;

    /// Look up a user by OIDC identity. `email_hint` is ignored by most providers.
    async fn get_user_for_oidc(
        &self,
        provider: OidcProviderType,
        issuer_url: &str,
        subject: &str,
        email_hint: &str,
    ) -> Result<Option<UserProfile>>;

    /// Create a username/password user, returning the provider-local user ID
    async fn create_user_with_password(
        &self,
        username: &str,
        password: &str,
        profile: &UserProfile,
    ) -> Result<String>;

    /// Create a user whose first authentication method is an OIDC identity
    async fn create_user_with_oidc(
        &self,
        provider: OidcProviderType,
        issuer_url: &str,
        subject: &str,
        profile: &UserProfile,
    ) -> Result<String>;

    /// Attach username/password authentication to an existing user
    async fn add_password_authn_to_user(
        &self,
        user_id: &str,
        username: &str,
        password: &str,
    ) -> Result<()>;

    /// Attach an OIDC identity to an existing user
    async fn add_oidc_authn_to_user(
        &self,
        user_id: &str,
        provider: OidcProviderType,
        issuer_url: &str,
        subject: &str,
    ) -> Result<()>;

    /// Overwrite a user's profile fields
    async fn update_user(&self, user_id: &str, profile: &UserProfile) -> Result<()>;
}

/// Builds management clients from provider configuration
#[async_trait]
pub trait ManagementClientFactory: Send + Sync {
    async fn management_client(
        &self,
        provider: &IdentityProviderConfig,
    ) -> Result<Arc<dyn ManagementClient>>;
}
