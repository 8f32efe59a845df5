//! AWS Cognito user pool management client
//!
//! Cognito lists every user through a paginated `ListUsers` call, so it is
//! read with the full-snapshot strategy. Federated identities are packed as
//! a JSON string inside the `identities` attribute.

use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::types::{
    AttributeType, MessageActionType, ProviderUserIdentifierType, UserType,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use tessera_core::{identity::*, IdentityProviderId, Result, TesseraError};

const MICROSOFT_ISSUER_URL: &str = "https://login.microsoftonline.com/common/v2.0";

/// Cognito management client
pub struct CognitoManagementClient {
    client: aws_sdk_cognitoidentityprovider::Client,
    config: CognitoConfig,
    provider_id: IdentityProviderId,
    name: String,
}

impl CognitoManagementClient {
    pub async fn new(provider_config: &IdentityProviderConfig) -> Result<Self> {
        let config = match &provider_config.config {
            ProviderConfigDetails::Cognito(c) => c.clone(),
            _ => {
                return Err(TesseraError::invalid_input(
                    "Expected Cognito configuration",
                ))
            }
        };

        let mut aws_builder =
            aws_config::from_env().region(aws_config::Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let creds = aws_sdk_cognitoidentityprovider::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "tessera-cognito-explicit",
            );
            aws_builder = aws_builder.credentials_provider(creds);
        }

        let sdk_config = aws_builder.load().await;
        info!(
            region = %config.region,
            user_pool_id = %config.user_pool_id,
            "Cognito management client initialized"
        );

        Ok(Self {
            client: aws_sdk_cognitoidentityprovider::Client::new(&sdk_config),
            config,
            provider_id: provider_config.id,
            name: provider_config.name.clone(),
        })
    }

    fn error(&self, message: impl Into<String>) -> TesseraError {
        TesseraError::provider_error(&self.name, message)
    }

    fn attribute(&self, name: &str, value: &str) -> Result<AttributeType> {
        AttributeType::builder()
            .name(name)
            .value(value)
            .build()
            .map_err(|e| self.error(format!("invalid attribute {}: {}", name, e)))
    }

    /// One `ListUsers` call per page, optionally filtered
    async fn list_filtered(&self, filter: Option<String>) -> Result<Vec<UserProfile>> {
        let mut profiles = Vec::new();
        let mut pagination_token: Option<String> = None;

        loop {
            let res = self
                .client
                .list_users()
                .user_pool_id(&self.config.user_pool_id)
                .set_filter(filter.clone())
                .set_pagination_token(pagination_token.take())
                .send()
                .await
                .map_err(|e| self.error(format!("ListUsers failed: {}", e)))?;

            for user in res.users() {
                profiles.push(self.to_profile(user)?);
            }

            match res.pagination_token() {
                Some(token) => pagination_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(profiles)
    }

    fn to_profile(&self, user: &UserType) -> Result<UserProfile> {
        let mut profile = UserProfile {
            id: user.username().unwrap_or_default().to_string(),
            updated_at: user
                .user_last_modified_date()
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos())),
            ..Default::default()
        };

        for attr in user.attributes() {
            let value = attr.value().unwrap_or_default();
            match attr.name() {
                "email" => profile.email = value.to_string(),
                "email_verified" => profile.email_verified = value == "true",
                "name" => profile.name = value.to_string(),
                "nickname" => profile.nickname = value.to_string(),
                "picture" => profile.picture = value.to_string(),
                "identities" => {
                    let identities: Vec<CognitoIdentity> = serde_json::from_str(value)
                        .map_err(|e| self.error(format!("invalid identities attribute: {}", e)))?;
                    for identity in identities {
                        if identity.provider_type == "OIDC" && identity.provider_name == "Microsoft" {
                            profile.authns.push(UserAuthn::Oidc {
                                provider: OidcProviderType::Microsoft,
                                issuer_url: MICROSOFT_ISSUER_URL.to_string(),
                                subject: identity.user_id,
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        // Cognito always keeps a username/password identity unless the user is federated
        if profile.authns.is_empty() {
            profile.authns.push(UserAuthn::Password {
                username: profile.id.clone(),
            });
        }

        Ok(profile)
    }

    async fn set_password(&self, username: &str, password: &str) -> Result<()> {
        self.client
            .admin_set_user_password()
            .user_pool_id(&self.config.user_pool_id)
            .username(username)
            .password(password)
            .permanent(true)
            .send()
            .await
            .map_err(|e| self.error(format!("AdminSetUserPassword failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ManagementClient for CognitoManagementClient {
    fn provider_id(&self) -> IdentityProviderId {
        self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Cognito
    }

    async fn list_users_updated_during(
        &self,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> Result<Vec<UserProfile>> {
        Err(self.error("ListUsers cannot filter by modification time"))
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn list_users(&self) -> Result<Vec<UserProfile>> {
        let users = self.list_filtered(None).await?;
        debug!("Listed {} Cognito users", users.len());
        Ok(users)
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn list_users_for_email(
        &self,
        email: &str,
        authn_type: AuthnType,
    ) -> Result<Vec<UserProfile>> {
        let users = self
            .list_filtered(Some(format!("email = \"{}\"", email)))
            .await?;

        Ok(users
            .into_iter()
            .filter(|user| {
                authn_type == AuthnType::All
                    || user.authns.iter().any(|a| a.authn_type() == authn_type)
            })
            .collect())
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn get_user_for_oidc(
        &self,
        provider: OidcProviderType,
        _issuer_url: &str,
        subject: &str,
        email_hint: &str,
    ) -> Result<Option<UserProfile>> {
        let mut users = self
            .list_filtered(Some(format!("sub = \"{}\"", subject)))
            .await?;

        if users.is_empty() && !email_hint.is_empty() {
            // Federated subjects are not searchable, fall back to the email
            users = self.list_users_for_email(email_hint, AuthnType::Oidc).await?;
        }

        match users.len() {
            0 => Ok(None),
            1 => Ok(users.pop()),
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
        let res = self
            .client
            .admin_create_user()
            .user_pool_id(&self.config.user_pool_id)
            .username(username)
            .user_attributes(self.attribute("email", &profile.email)?)
            .message_action(MessageActionType::Suppress)
            .send()
            .await
            .map_err(|e| self.error(format!("AdminCreateUser failed: {}", e)))?;

        self.set_password(username, password).await?;

        Ok(res
            .user()
            .and_then(|u| u.username())
            .unwrap_or(username)
            .to_string())
    }

    async fn create_user_with_oidc(
        &self,
        provider: OidcProviderType,
        _issuer_url: &str,
        _subject: &str,
        _profile: &UserProfile,
    ) -> Result<String> {
        Err(self.error(format!(
            "{} users are created by Cognito at first federated login",
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
        self.set_password(user_id, password).await
    }

    #[instrument(skip(self), fields(provider_id = %self.provider_id))]
    async fn add_oidc_authn_to_user(
        &self,
        user_id: &str,
        provider: OidcProviderType,
        _issuer_url: &str,
        subject: &str,
    ) -> Result<()> {
        let provider_name = match provider {
            OidcProviderType::Microsoft => "Microsoft",
            other => return Err(self.error(format!("cannot link {} identities", other))),
        };

        let destination = ProviderUserIdentifierType::builder()
            .provider_name("Cognito")
            .provider_attribute_value(user_id)
            .build();
        let source = ProviderUserIdentifierType::builder()
            .provider_name(provider_name)
            .provider_attribute_name("Cognito_Subject")
            .provider_attribute_value(subject)
            .build();

        self.client
            .admin_link_provider_for_user()
            .user_pool_id(&self.config.user_pool_id)
            .destination_user(destination)
            .source_user(source)
            .send()
            .await
            .map_err(|e| self.error(format!("AdminLinkProviderForUser failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self, profile), fields(provider_id = %self.provider_id))]
    async fn update_user(&self, user_id: &str, profile: &UserProfile) -> Result<()> {
        let mut request = self
            .client
            .admin_update_user_attributes()
            .user_pool_id(&self.config.user_pool_id)
            .username(user_id)
            .user_attributes(self.attribute("email", &profile.email)?);

        for (name, value) in [
            ("name", &profile.name),
            ("nickname", &profile.nickname),
            ("picture", &profile.picture),
        ] {
            if !value.is_empty() {
                request = request.user_attributes(self.attribute(name, value)?);
            }
        }

        request
            .send()
            .await
            .map_err(|e| self.error(format!("AdminUpdateUserAttributes failed: {}", e)))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CognitoIdentity {
    user_id: String,
    provider_name: String,
    provider_type: String,
}
