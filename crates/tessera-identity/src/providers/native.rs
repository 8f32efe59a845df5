//! Native Tessera IdP management client
//!
//! Talks to the tenant IdP's `/authn` management API with a
//! client-credentials bearer token. This is the only provider type the sync
//! engine writes to.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use tessera_core::{identity::*, IdentityProviderId, Result, TesseraError};

use super::common::*;

/// Users requested per listing page
pub const PAGE_SIZE: usize = 100;

/// Native IdP management client
pub struct NativeManagementClient {
    config: NativeConfig,
    provider_id: IdentityProviderId,
    name: String,
    http_client: HttpClient,
    tokens: TokenCache,
}

impl NativeManagementClient {
    pub fn new(provider_config: &IdentityProviderConfig) -> Result<Self> {
        let config = match &provider_config.config {
            ProviderConfigDetails::Native(c) => c.clone(),
            _ => {
                return Err(TesseraError::invalid_input(
                    "Expected native IdP configuration",
                ))
            }
        };

        Ok(Self {
            http_client: HttpClient::new(&provider_config.name, 3, 500)?,
            provider_id: provider_config.id,
            name: provider_config.name.clone(),
            tokens: TokenCache::new(),
            config,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    fn error(&self, message: impl Into<String>) -> TesseraError {
        TesseraError::provider_error(&self.name, message)
    }

    async fn access_token(&self) -> Result<String> {
        self.tokens
            .get_or_fetch(|| async {
                let params = [
                    ("grant_type", "client_credentials"),
                    ("client_id", self.config.client_id.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                ];

                debug!("Requesting native IdP access token");
                let response = self
                    .http_client
                    .execute_with_retry(
                        self.http_client
                            .inner()
                            .post(self.url("/oidc/token"))
                            .form(&params),
                    )
                    .await?;
                self.http_client.json(response).await
            })
            .await
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> Result<T> {
        let token = self.access_token().await?;
        debug!("GET {}", endpoint);

        let response = self
            .http_client
            .execute_with_retry(self.http_client.inner().get(self.url(endpoint)).bearer_auth(&token))
            .await?;
        self.http_client.json(response).await
    }

    async fn send_json<B: Serialize + Sync>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        debug!("{} {}", method, endpoint);

        self.http_client
            .execute_with_retry(
                self.http_client
                    .inner()
                    .request(method, self.url(endpoint))
                    .bearer_auth(&token)
                    .json(body),
            )
            .await
    }

    /// Follow `starting_after` cursors until the listing is exhausted
    async fn list_paginated(&self, filter: &str) -> Result<Vec<UserProfile>> {
        let mut users = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut endpoint = format!("/authn/users?limit={}{}", PAGE_SIZE, filter);
            if let Some(after) = &cursor {
                endpoint.push_str(&format!("&starting_after={}", urlencoding::encode(after)));
            }

            let page: ListUsersResponse = self.get(&endpoint).await?;
            let has_next = page.has_next;
            let next = page.next.clone();
            users.extend(page.data.into_iter().map(NativeUser::into_profile));

            match next {
                Some(next) if has_next => cursor = Some(next),
                _ => break,
            }
        }

        Ok(users)
    }
}

#[async_trait]
impl ManagementClient for NativeManagementClient {
    fn provider_id(&self) -> IdentityProviderId {
        self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Native
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn list_users_updated_during(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UserProfile>> {
        let filter = format!(
            "&updated_since={}&updated_until={}",
            since.timestamp(),
            until.timestamp()
        );
        self.list_paginated(&filter).await
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn list_users(&self) -> Result<Vec<UserProfile>> {
        let users = self.list_paginated("").await?;
        debug!("Listed {} native IdP users", users.len());
        Ok(users)
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn list_users_for_email(
        &self,
        email: &str,
        authn_type: AuthnType,
    ) -> Result<Vec<UserProfile>> {
        let endpoint = format!(
            "/authn/users?email={}&authn_type={}",
            urlencoding::encode(email),
            authn_type.as_str()
        );
        let page: ListUsersResponse = self.get(&endpoint).await?;
        Ok(page.data.into_iter().map(NativeUser::into_profile).collect())
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn get_user_for_oidc(
        &self,
        provider: OidcProviderType,
        issuer_url: &str,
        subject: &str,
        email_hint: &str,
    ) -> Result<Option<UserProfile>> {
        let token = self.access_token().await?;
        let endpoint = format!(
            "/authn/oidcusers?provider={}&issuer_url={}&subject={}&email={}",
            provider,
            urlencoding::encode(issuer_url),
            urlencoding::encode(subject),
            urlencoding::encode(email_hint)
        );

        let response = self
            .http_client
            .send(self.http_client.inner().get(self.url(&endpoint)).bearer_auth(&token))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let user: NativeUser = self.http_client.json(response).await?;
                Ok(Some(user.into_profile()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(self.error(format!("HTTP {} - {}", status, body)))
            }
        }
    }

    #[instrument(skip(self, password, profile), fields(provider_id = %self.provider_id))]
    async fn create_user_with_password(
        &self,
        username: &str,
        password: &str,
        profile: &UserProfile,
    ) -> Result<String> {
        let request = CreateUserRequest {
            profile: ProfileFields::from(profile),
            authn: AuthnRequest::Password { username, password },
        };

        let response = self
            .send_json(reqwest::Method::POST, "/authn/users", &request)
            .await?;
        let created: CreatedUser = self.http_client.json(response).await?;
        Ok(created.id)
    }

    #[instrument(skip(self, profile), fields(provider_id = %self.provider_id))]
    async fn create_user_with_oidc(
        &self,
        provider: OidcProviderType,
        issuer_url: &str,
        subject: &str,
        profile: &UserProfile,
    ) -> Result<String> {
        let request = CreateUserRequest {
            profile: ProfileFields::from(profile),
            authn: AuthnRequest::Oidc {
                provider,
                issuer_url,
                subject,
            },
        };

        let response = self
            .send_json(reqwest::Method::POST, "/authn/users", &request)
            .await?;
        let created: CreatedUser = self.http_client.json(response).await?;
        Ok(created.id)
    }

    #[instrument(skip(self, password), fields(provider_id = %self.provider_id))]
    async fn add_password_authn_to_user(
        &self,
        user_id: &str,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let endpoint = format!("/authn/users/{}/authns", urlencoding::encode(user_id));
        self.send_json(
            reqwest::Method::POST,
            &endpoint,
            &AuthnRequest::Password { username, password },
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn add_oidc_authn_to_user(
        &self,
        user_id: &str,
        provider: OidcProviderType,
        issuer_url: &str,
        subject: &str,
    ) -> Result<()> {
        let endpoint = format!("/authn/users/{}/authns", urlencoding::encode(user_id));
        self.send_json(
            reqwest::Method::POST,
            &endpoint,
            &AuthnRequest::Oidc {
                provider,
                issuer_url,
                subject,
            },
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, profile), fields(provider_id = %self.provider_id))]
    async fn update_user(&self, user_id: &str, profile: &UserProfile) -> Result<()> {
        let endpoint = format!("/authn/users/{}", urlencoding::encode(user_id));
        let request = UpdateUserRequest {
            profile: ProfileFields::from(profile),
        };
        self.send_json(reqwest::Method::PUT, &endpoint, &request)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Native API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ListUsersResponse {
    data: Vec<NativeUser>,
    #[serde(default)]
    has_next: bool,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NativeUser {
    id: String,
    /// Seconds since the Unix epoch
    #[serde(default)]
    updated_at: i64,
    #[serde(default)]
    profile: ProfileRecord,
    #[serde(default)]
    authns: Vec<UserAuthn>,
    #[serde(default)]
    mfa_channels: Vec<MfaChannel>,
}

impl NativeUser {
    fn into_profile(self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.profile.email,
            email_verified: self.profile.email_verified,
            name: self.profile.name,
            nickname: self.profile.nickname,
            picture: self.profile.picture,
            updated_at: Utc.timestamp_opt(self.updated_at, 0).single(),
            authns: self.authns,
            mfa_channels: self.mfa_channels,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProfileRecord {
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    name: String,
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    picture: String,
}

#[derive(Debug, Serialize)]
struct ProfileFields<'a> {
    email: &'a str,
    email_verified: bool,
    name: &'a str,
    nickname: &'a str,
    picture: &'a str,
}

impl<'a> From<&'a UserProfile> for ProfileFields<'a> {
    fn from(profile: &'a UserProfile) -> Self {
        Self {
            email: &profile.email,
            email_verified: profile.email_verified,
            name: &profile.name,
            nickname: &profile.nickname,
            picture: &profile.picture,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "authn_type", rename_all = "snake_case")]
enum AuthnRequest<'a> {
    Password {
        username: &'a str,
        password: &'a str,
    },
    Oidc {
        provider: OidcProviderType,
        issuer_url: &'a str,
        subject: &'a str,
    },
}

#[derive(Debug, Serialize)]
struct CreateUserRequest<'a> {
    profile: ProfileFields<'a>,
    authn: AuthnRequest<'a>,
}

#[derive(Debug, Serialize)]
struct UpdateUserRequest<'a> {
    profile: ProfileFields<'a>,
}

#[derive(Debug, Deserialize)]
struct CreatedUser {
    id: String,
}
