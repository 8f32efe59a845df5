//! Auth0 Management API client
//!
//! Auth0 caps user search at 1000 results (20 pages of 50) and rate limits
//! the Management API, so it can only be read incrementally through
//! `updated_at` windows. It cannot list every user in one pass.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use tessera_core::{identity::*, IdentityProviderId, Result, TesseraError};

use super::common::*;

/// Users returned per search page (the Management API maximum)
pub const PAGE_SIZE: usize = 50;
/// Search pages reachable before Auth0 stops paginating
pub const MAX_PAGES: usize = 20;
/// Most users a single windowed search can return
pub const RESULT_CAP: usize = PAGE_SIZE * MAX_PAGES;

const GOOGLE_CONNECTION: &str = "google-oauth2";
const FACEBOOK_CONNECTION: &str = "facebook";
const LINKEDIN_CONNECTION: &str = "linkedin";
const WINDOWS_LIVE_CONNECTION: &str = "windowslive";

/// Auth0 management client
pub struct Auth0ManagementClient {
    config: Auth0Config,
    provider_id: IdentityProviderId,
    name: String,
    base_url: String,
    http_client: HttpClient,
    tokens: TokenCache,
    page_delay: Duration,
}

impl Auth0ManagementClient {
    /// Create a new client. `page_delay` is slept between search pages.
    pub fn new(provider_config: &IdentityProviderConfig, page_delay: Duration) -> Result<Self> {
        let config = match &provider_config.config {
            ProviderConfigDetails::Auth0(c) => c.clone(),
            _ => {
                return Err(TesseraError::invalid_input(
                    "Expected Auth0 configuration",
                ))
            }
        };

        let http_client = HttpClient::new(&provider_config.name, 3, 1000)?;
        let base_url = if config.domain.starts_with("http://") || config.domain.starts_with("https://") {
            config.domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", config.domain.trim_end_matches('/'))
        };

        Ok(Self {
            config,
            provider_id: provider_config.id,
            name: provider_config.name.clone(),
            base_url,
            http_client,
            tokens: TokenCache::new(),
            page_delay,
        })
    }

    fn audience(&self) -> String {
        self.config
            .audience
            .clone()
            .unwrap_or_else(|| format!("https://{}/api/v2/", self.config.domain))
    }

    fn error(&self, message: impl Into<String>) -> TesseraError {
        TesseraError::provider_error(&self.name, message)
    }

    /// Management API access token, cached until expiry
    async fn management_token(&self) -> Result<String> {
        self.tokens
            .get_or_fetch(|| async {
                let url = format!("{}/oauth/token", self.base_url);
                let body = serde_json::json!({
                    "client_id": self.config.client_id,
                    "client_secret": self.config.client_secret,
                    "audience": self.audience(),
                    "grant_type": "client_credentials",
                });

                debug!("Requesting Auth0 management token");
                let response = self
                    .http_client
                    .execute_with_retry(self.http_client.inner().post(&url).json(&body))
                    .await?;
                self.http_client.json(response).await
            })
            .await
    }

    /// Authenticated GET against the Management API
    async fn api_get<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> Result<T> {
        let token = self.management_token().await?;
        let url = format!("{}{}", self.base_url, endpoint);

        debug!("GET {}", endpoint);
        let response = self
            .http_client
            .execute_with_retry(self.http_client.inner().get(&url).bearer_auth(&token))
            .await?;
        self.http_client.json(response).await
    }

    fn user_path(user_id: &str) -> String {
        format!("/api/v2/users/{}", urlencoding::encode(user_id))
    }

    async fn search_users(&self, query: &str, page: usize) -> Result<Vec<Auth0User>> {
        let endpoint = format!(
            "/api/v2/users?q={}&per_page={}&page={}&search_engine=v3",
            urlencoding::encode(query),
            PAGE_SIZE,
            page
        );
        self.api_get(&endpoint).await
    }

    async fn patch_user<B: Serialize + Sync>(&self, user_id: &str, body: &B) -> Result<()> {
        let token = self.management_token().await?;
        let url = format!("{}{}", self.base_url, Self::user_path(user_id));

        self.http_client
            .execute_with_retry(
                self.http_client
                    .inner()
                    .patch(&url)
                    .bearer_auth(&token)
                    .json(body),
            )
            .await?;
        Ok(())
    }

    /// Convert an Auth0 user to the canonical profile
    fn to_profile(&self, user: Auth0User) -> UserProfile {
        let mut authns = Vec::new();
        for identity in &user.identities {
            if !identity.is_social {
                let username = user
                    .username
                    .clone()
                    .filter(|u| !u.is_empty())
                    .unwrap_or_else(|| user.email.clone());
                authns.push(UserAuthn::Password { username });
                continue;
            }

            match social_provider(&identity.provider) {
                Some((provider, issuer_url)) => authns.push(UserAuthn::Oidc {
                    provider,
                    issuer_url: issuer_url.to_string(),
                    subject: identity.user_id.clone(),
                }),
                None => debug!(
                    "Ignoring unsupported social connection '{}' on {}",
                    identity.provider, user.user_id
                ),
            }
        }

        let mfa_channels = user
            .multifactor
            .iter()
            .map(|factor| MfaChannel {
                channel_type: factor.clone(),
                target: user.email.clone(),
                primary: false,
            })
            .collect();

        UserProfile {
            updated_at: user
                .updated_at
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc)),
            id: user.user_id,
            email: user.email,
            email_verified: user.email_verified,
            name: user.name,
            nickname: user.nickname,
            picture: user.picture,
            authns,
            mfa_channels,
        }
    }
}

/// Map an Auth0 social connection to an OIDC provider and its issuer
fn social_provider(connection: &str) -> Option<(OidcProviderType, &'static str)> {
    match connection {
        GOOGLE_CONNECTION => Some((OidcProviderType::Google, "https://accounts.google.com")),
        FACEBOOK_CONNECTION => Some((OidcProviderType::Facebook, "https://www.facebook.com")),
        LINKEDIN_CONNECTION => Some((OidcProviderType::LinkedIn, "https://www.linkedin.com")),
        WINDOWS_LIVE_CONNECTION => Some((
            OidcProviderType::Microsoft,
            "https://login.microsoftonline.com/common/v2.0",
        )),
        _ => None,
    }
}

fn social_connection(provider: OidcProviderType) -> Option<&'static str> {
    match provider {
        OidcProviderType::Google => Some(GOOGLE_CONNECTION),
        OidcProviderType::Facebook => Some(FACEBOOK_CONNECTION),
        OidcProviderType::LinkedIn => Some(LINKEDIN_CONNECTION),
        OidcProviderType::Microsoft => Some(WINDOWS_LIVE_CONNECTION),
        OidcProviderType::Custom => None,
    }
}

/// Escape a value for use inside a quoted Lucene term
fn quoted_term(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '"' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl ManagementClient for Auth0ManagementClient {
    fn provider_id(&self) -> IdentityProviderId {
        self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Auth0
    }

    fn result_cap(&self) -> Option<usize> {
        Some(RESULT_CAP)
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn list_users_updated_during(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UserProfile>> {
        // Auth0 search has no range comparison on updated_at, only inclusive ranges
        let query = format!("updated_at:[\"{}\" TO \"{}\"]", rfc3339(since), rfc3339(until));
        let mut users = Vec::new();

        for page in 0..MAX_PAGES {
            if page > 0 {
                tokio::time::sleep(self.page_delay).await;
            }

            let batch = self.search_users(&query, page).await?;
            let full_page = batch.len() == PAGE_SIZE;
            users.extend(batch.into_iter().map(|u| self.to_profile(u)));

            if !full_page {
                break;
            }
        }

        debug!("Fetched {} Auth0 users updated during window", users.len());
        Ok(users)
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>> {
        Err(self.error(
            "listing every user is not supported, use windowed search instead",
        ))
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn list_users_for_email(
        &self,
        email: &str,
        authn_type: AuthnType,
    ) -> Result<Vec<UserProfile>> {
        let endpoint = format!("/api/v2/users-by-email?email={}", urlencoding::encode(email));
        let users: Vec<Auth0User> = self.api_get(&endpoint).await?;

        Ok(users
            .into_iter()
            .filter(|user| {
                user.identities.iter().any(|identity| match authn_type {
                    AuthnType::All => true,
                    AuthnType::Password => !identity.is_social,
                    AuthnType::Oidc => identity.is_social,
                })
            })
            .map(|user| self.to_profile(user))
            .collect())
    }

    #[instrument(skip(self, _email_hint), fields(provider_id = %self.provider_id))]
    async fn get_user_for_oidc(
        &self,
        provider: OidcProviderType,
        _issuer_url: &str,
        subject: &str,
        _email_hint: &str,
    ) -> Result<Option<UserProfile>> {
        let Some(connection) = social_connection(provider) else {
            return Ok(None);
        };

        let query = format!(
            "identities.user_id:\"{}\" AND identities.provider:\"{}\"",
            quoted_term(subject),
            connection
        );
        let mut users = self.search_users(&query, 0).await?;

        match users.len() {
            0 => Ok(None),
            1 => Ok(users.pop().map(|u| self.to_profile(u))),
            n => Err(self.error(format!(
                "got {} users for {} subject {}",
                n, provider, subject
            ))),
        }
    }

    #[instrument(skip(self, password, profile), fields(provider_id = %self.provider_id))]
    async fn create_user_with_password(
        &self,
        username: &str,
        password: &str,
        profile: &UserProfile,
    ) -> Result<String> {
        if profile.email != username {
            return Err(self.error(format!(
                "username '{}' must match the profile email '{}'",
                username, profile.email
            )));
        }

        let request = CreateUserRequest {
            connection: &self.config.connection,
            email: &profile.email,
            email_verified: profile.email_verified,
            password,
            name: &profile.name,
            nickname: &profile.nickname,
            picture: &profile.picture,
        };

        let token = self.management_token().await?;
        let url = format!("{}/api/v2/users", self.base_url);
        let response = self
            .http_client
            .execute_with_retry(
                self.http_client
                    .inner()
                    .post(&url)
                    .bearer_auth(&token)
                    .json(&request),
            )
            .await?;

        let created: Auth0User = self.http_client.json(response).await?;
        Ok(created.user_id)
    }

    async fn create_user_with_oidc(
        &self,
        provider: OidcProviderType,
        _issuer_url: &str,
        _subject: &str,
        _profile: &UserProfile,
    ) -> Result<String> {
        Err(self.error(format!(
            "{} users are created by Auth0 at first login and cannot be provisioned",
            provider
        )))
    }

    #[instrument(skip(self, password), fields(provider_id = %self.provider_id))]
    async fn add_password_authn_to_user(
        &self,
        user_id: &str,
        _username: &str,
        password: &str,
    ) -> Result<()> {
        let body = serde_json::json!({
            "connection": self.config.connection,
            "password": password,
        });
        self.patch_user(user_id, &body).await
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn add_oidc_authn_to_user(
        &self,
        user_id: &str,
        provider: OidcProviderType,
        _issuer_url: &str,
        subject: &str,
    ) -> Result<()> {
        let connection = social_connection(provider)
            .ok_or_else(|| self.error(format!("cannot link {} identities", provider)))?;

        let token = self.management_token().await?;
        let url = format!("{}{}/identities", self.base_url, Self::user_path(user_id));
        let body = serde_json::json!({
            "provider": connection,
            "user_id": subject,
        });

        self.http_client
            .execute_with_retry(
                self.http_client
                    .inner()
                    .post(&url)
                    .bearer_auth(&token)
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, profile), fields(provider_id = %self.provider_id))]
    async fn update_user(&self, user_id: &str, profile: &UserProfile) -> Result<()> {
        let request = UpdateUserRequest {
            email: &profile.email,
            name: &profile.name,
            nickname: &profile.nickname,
            picture: &profile.picture,
        };
        self.patch_user(user_id, &request).await
    }
}

// =============================================================================
// Auth0 API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Auth0User {
    user_id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    picture: String,
    /// ISO 8601 string rather than epoch seconds
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    identities: Vec<Auth0Identity>,
    #[serde(default)]
    multifactor: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Auth0Identity {
    provider: String,
    user_id: String,
    #[serde(rename = "isSocial", default)]
    is_social: bool,
}

#[derive(Debug, Serialize)]
struct CreateUserRequest<'a> {
    connection: &'a str,
    email: &'a str,
    email_verified: bool,
    password: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    nickname: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    picture: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateUserRequest<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    nickname: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    picture: &'a str,
}
