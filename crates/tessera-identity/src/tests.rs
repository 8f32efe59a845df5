//! Unit tests for tessera-identity

use serde_json::{json, Value};
use tessera_core::identity::*;
use tessera_core::IdentityProviderId;

fn auth0_config(domain: &str) -> IdentityProviderConfig {
    IdentityProviderConfig {
        id: IdentityProviderId::new(),
        name: "Auth0".to_string(),
        provider_type: ProviderType::Auth0,
        config: ProviderConfigDetails::Auth0(Auth0Config {
            domain: domain.to_string(),
            client_id: "m2m-client".to_string(),
            client_secret: "m2m-secret".to_string(),
            audience: Some("https://acme.auth0.com/api/v2/".to_string()),
            connection: "Username-Password-Authentication".to_string(),
        }),
    }
}

fn native_config(base_url: &str) -> IdentityProviderConfig {
    IdentityProviderConfig {
        id: IdentityProviderId::new(),
        name: "Tessera".to_string(),
        provider_type: ProviderType::Native,
        config: ProviderConfigDetails::Native(NativeConfig {
            base_url: base_url.to_string(),
            client_id: "sync-worker".to_string(),
            client_secret: "sync-secret".to_string(),
        }),
    }
}

// =============================================================================
// Auth0 Client Tests
// =============================================================================

#[cfg(all(test, feature = "auth0"))]
mod auth0_tests {
    use super::*;
    use crate::providers::auth0::{Auth0ManagementClient, PAGE_SIZE, RESULT_CAP};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn database_user(n: usize) -> Value {
        json!({
            "user_id": format!("auth0|{}", n),
            "email": format!("user{}@example.com", n),
            "email_verified": true,
            "name": format!("User {}", n),
            "updated_at": "2024-01-01T12:00:00.000Z",
            "identities": [
                { "provider": "auth0", "user_id": n.to_string(), "isSocial": false }
            ]
        })
    }

    async fn server_with_token() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_partial_json(json!({
                "client_id": "m2m-client",
                "grant_type": "client_credentials"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "mgmt-token",
                "expires_in": 86400,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    fn client(server: &MockServer) -> Auth0ManagementClient {
        Auth0ManagementClient::new(&auth0_config(&server.uri()), Duration::ZERO).unwrap()
    }

    #[tokio::test]
    async fn test_windowed_listing_follows_pages() {
        let server = server_with_token().await;
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        let first: Vec<Value> = (0..PAGE_SIZE).map(database_user).collect();
        let second: Vec<Value> = (PAGE_SIZE..PAGE_SIZE + 3).map(database_user).collect();

        Mock::given(method("GET"))
            .and(path("/api/v2/users"))
            .and(query_param(
                "q",
                "updated_at:[\"2024-01-01T00:00:00Z\" TO \"2024-01-02T00:00:00Z\"]",
            ))
            .and(query_param("page", "0"))
            .and(header("authorization", "Bearer mgmt-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/users"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(second))
            .mount(&server)
            .await;

        let users = client(&server)
            .list_users_updated_during(since, until)
            .await
            .unwrap();

        assert_eq!(users.len(), PAGE_SIZE + 3);
        assert_eq!(users[0].email, "user0@example.com");
        assert_eq!(
            users[0].authns,
            vec![UserAuthn::Password {
                username: "user0@example.com".to_string()
            }]
        );
        assert!(users[0].updated_at.is_some());
    }

    #[tokio::test]
    async fn test_windowed_listing_stops_at_result_cap() {
        let server = server_with_token().await;
        let full_page: Vec<Value> = (0..PAGE_SIZE).map(database_user).collect();

        Mock::given(method("GET"))
            .and(path("/api/v2/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(full_page))
            .expect(20)
            .mount(&server)
            .await;

        let users = client(&server)
            .list_users_updated_during(Utc::now() - chrono::Duration::days(30), Utc::now())
            .await
            .unwrap();
        assert_eq!(users.len(), RESULT_CAP);
    }

    #[tokio::test]
    async fn test_full_listing_is_unsupported() {
        let server = MockServer::start().await;
        let err = client(&server).list_users().await.unwrap_err();
        assert!(err.to_string().starts_with("Provider error (Auth0)"));
    }

    #[tokio::test]
    async fn test_reports_search_result_cap() {
        let server = MockServer::start().await;
        assert_eq!(client(&server).result_cap(), Some(RESULT_CAP));
    }

    #[tokio::test]
    async fn test_oidc_lookup_escapes_subject() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/users"))
            .and(query_param(
                "q",
                r#"identities.user_id:"10\"9\\x" AND identities.provider:"google-oauth2""#,
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let found = client(&server)
            .get_user_for_oidc(
                OidcProviderType::Google,
                "https://accounts.google.com",
                r#"10"9\x"#,
                "",
            )
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_email_lookup_filters_by_authn_type() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/users-by-email"))
            .and(query_param("email", "ada@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "user_id": "auth0|1",
                    "email": "ada@example.com",
                    "identities": [{ "provider": "auth0", "user_id": "1", "isSocial": false }]
                },
                {
                    "user_id": "google-oauth2|109",
                    "email": "ada@example.com",
                    "identities": [{ "provider": "google-oauth2", "user_id": "109", "isSocial": true }]
                }
            ])))
            .mount(&server)
            .await;

        let client = client(&server);
        let all = client
            .list_users_for_email("ada@example.com", AuthnType::All)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            all[1].authns,
            vec![UserAuthn::Oidc {
                provider: OidcProviderType::Google,
                issuer_url: "https://accounts.google.com".to_string(),
                subject: "109".to_string(),
            }]
        );

        let passwords = client
            .list_users_for_email("ada@example.com", AuthnType::Password)
            .await
            .unwrap();
        assert_eq!(passwords.len(), 1);
        assert_eq!(passwords[0].id, "auth0|1");
    }

    #[tokio::test]
    async fn test_create_user_with_password() {
        let server = server_with_token().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/users"))
            .and(body_partial_json(json!({
                "connection": "Username-Password-Authentication",
                "email": "ada@example.com",
                "name": "Ada"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "user_id": "auth0|new",
                "email": "ada@example.com"
            })))
            .mount(&server)
            .await;

        let profile = UserProfile {
            email: "ada@example.com".to_string(),
            name: "Ada".to_string(),
            ..Default::default()
        };
        let id = client(&server)
            .create_user_with_password("ada@example.com", "placeholder", &profile)
            .await
            .unwrap();
        assert_eq!(id, "auth0|new");
    }

    #[tokio::test]
    async fn test_create_rejects_username_other_than_email() {
        let server = MockServer::start().await;
        let profile = UserProfile {
            email: "ada@example.com".to_string(),
            ..Default::default()
        };
        let result = client(&server)
            .create_user_with_password("ada", "placeholder", &profile)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_user_patches_encoded_path() {
        let server = server_with_token().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v2/users/auth0%7C1"))
            .and(body_partial_json(json!({ "name": "Ada King" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let profile = UserProfile {
            email: "ada@example.com".to_string(),
            name: "Ada King".to_string(),
            ..Default::default()
        };
        client(&server).update_user("auth0|1", &profile).await.unwrap();
    }
}

// =============================================================================
// Native IdP Client Tests
// =============================================================================

#[cfg(all(test, feature = "native"))]
mod native_tests {
    use super::*;
    use crate::providers::native::NativeManagementClient;
    use wiremock::matchers::{
        body_partial_json, header, method, path, query_param, query_param_is_missing,
    };
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn native_user(id: &str, email: &str) -> Value {
        json!({
            "id": id,
            "updated_at": 1_700_000_000,
            "profile": { "email": email, "email_verified": true, "name": "Native User" },
            "authns": [{ "authn_type": "password", "username": email }]
        })
    }

    async fn server_with_token() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oidc/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "native-token",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        server
    }

    fn client(server: &MockServer) -> NativeManagementClient {
        NativeManagementClient::new(&native_config(&server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_list_users_follows_cursor() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/authn/users"))
            .and(query_param_is_missing("starting_after"))
            .and(header("authorization", "Bearer native-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [native_user("u1", "a@example.com")],
                "has_next": true,
                "next": "u1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/authn/users"))
            .and(query_param("starting_after", "u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [native_user("u2", "b@example.com")],
                "has_next": false
            })))
            .mount(&server)
            .await;

        let users = client(&server).list_users().await.unwrap();
        let emails: Vec<_> = users.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, vec!["a@example.com", "b@example.com"]);
        assert!(users[0].email_verified);
        assert_eq!(users[0].updated_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_email_lookup_passes_authn_filter() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/authn/users"))
            .and(query_param("email", "a@example.com"))
            .and(query_param("authn_type", "all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [native_user("u1", "a@example.com"), native_user("u9", "a@example.com")]
            })))
            .mount(&server)
            .await;

        let users = client(&server)
            .list_users_for_email("a@example.com", AuthnType::All)
            .await
            .unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn test_oidc_lookup_not_found_is_none() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/authn/oidcusers"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let user = client(&server)
            .get_user_for_oidc(
                OidcProviderType::Google,
                "https://accounts.google.com",
                "109",
                "",
            )
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn test_oidc_lookup_found() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/authn/oidcusers"))
            .and(query_param("provider", "google"))
            .and(query_param("subject", "109"))
            .respond_with(ResponseTemplate::new(200).set_body_json(native_user("u1", "a@example.com")))
            .mount(&server)
            .await;

        let user = client(&server)
            .get_user_for_oidc(
                OidcProviderType::Google,
                "https://accounts.google.com",
                "109",
                "a@example.com",
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, "u1");
    }

    #[tokio::test]
    async fn test_create_and_attach() {
        let server = server_with_token().await;
        Mock::given(method("POST"))
            .and(path("/authn/users"))
            .and(body_partial_json(json!({
                "profile": { "email": "a@example.com" },
                "authn": { "authn_type": "password", "username": "a@example.com" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "u-new" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/authn/users/u-new/authns"))
            .and(body_partial_json(json!({
                "authn_type": "oidc",
                "provider": "google",
                "subject": "109"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let profile = UserProfile {
            email: "a@example.com".to_string(),
            ..Default::default()
        };
        let id = client
            .create_user_with_password("a@example.com", "placeholder", &profile)
            .await
            .unwrap();
        assert_eq!(id, "u-new");

        client
            .add_oidc_authn_to_user(
                &id,
                OidcProviderType::Google,
                "https://accounts.google.com",
                "109",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_failure_names_provider() {
        let server = server_with_token().await;
        Mock::given(method("PUT"))
            .and(path("/authn/users/u1"))
            .respond_with(ResponseTemplate::new(400).set_body_string("email is invalid"))
            .mount(&server)
            .await;

        let err = client(&server)
            .update_user("u1", &UserProfile::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Provider error (Tessera): HTTP 400 Bad Request - email is invalid"
        );
    }
}

// =============================================================================
// Provider Registry Tests
// =============================================================================

#[cfg(all(test, feature = "native"))]
mod registry_tests {
    use super::*;
    use crate::registry::ProviderRegistry;
    use std::sync::Arc;
    use tessera_core::TesseraError;

    #[tokio::test]
    async fn test_registry_caches_clients() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty().await);

        let config = native_config("https://acme.tessera.test");
        let first = registry.management_client(&config).await.unwrap();
        let second = registry.management_client(&config).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.provider_id(), config.id);
        assert_eq!(first.provider_type(), ProviderType::Native);
        assert_eq!(registry.len().await, 1);

        registry.remove(config.id).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_registry_rejects_mismatched_config() {
        let registry = ProviderRegistry::new();
        let mut config = native_config("https://acme.tessera.test");
        config.provider_type = ProviderType::Auth0;

        let result = registry.management_client(&config).await;
        assert!(matches!(result, Err(TesseraError::ConfigError { .. })));
    }

    #[cfg(not(feature = "cognito"))]
    #[tokio::test]
    async fn test_registry_rejects_disabled_provider_type() {
        let registry = ProviderRegistry::new();
        let config = IdentityProviderConfig {
            id: IdentityProviderId::new(),
            name: "Cognito".to_string(),
            provider_type: ProviderType::Cognito,
            config: ProviderConfigDetails::Cognito(CognitoConfig {
                region: "us-east-1".to_string(),
                user_pool_id: "us-east-1_abc".to_string(),
                access_key_id: None,
                secret_access_key: None,
            }),
        };

        let result = registry.management_client(&config).await;
        assert!(matches!(result, Err(TesseraError::ConfigError { .. })));
    }
}
