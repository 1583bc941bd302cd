//! PKCE sign-in and sign-out against a mock identity server, with the
//! session persisted to an encrypted file between runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use classdesk_core::auth::FileSessionRepository;
use classdesk_core::oidc::{pkce, IdentityConfig};
use classdesk_core::{AuthError, AuthService, IdentityClient, SessionStore};
use mockito::{Matcher, Server, ServerGuard};
use reqwest::Client;

const REDIRECT_URI: &str = "classdesk://auth/callback";

fn identity(server: &ServerGuard) -> IdentityClient {
    IdentityClient::with_client(
        Client::new(),
        IdentityConfig {
            issuer_url: server.url(),
            client_id: "classdesk-mobile".to_string(),
            redirect_uri: REDIRECT_URI.to_string(),
            scopes: vec!["openid".to_string(), "profile".to_string(), "offline_access".to_string()],
        },
    )
}

/// Key derivation is slow in unoptimised builds; keep the timeout generous
const HYDRATION_TIMEOUT: Duration = Duration::from_secs(30);

async fn open_store(dir: &std::path::Path) -> SessionStore {
    let store = SessionStore::new(Arc::new(FileSessionRepository::encrypted(dir, "correct horse")));
    store.hydrate(HYDRATION_TIMEOUT).await;
    store
}

#[tokio::test]
async fn test_login_persists_and_logout_revokes() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut server = Server::new_async().await;

    let store = open_store(dir.path()).await;
    assert!(store.is_hydrated());
    assert!(!store.is_authenticated());

    let auth = AuthService::new(store.clone(), identity(&server));
    let url = auth.begin_login().await.expect("begin_login failed");
    let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
    let state = params["state"].clone();
    let challenge = params["code_challenge"].clone();

    let token = server
        .mock("POST", "/connect/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "auth-code-1".into()),
            Matcher::UrlEncoded("redirect_uri".into(), REDIRECT_URI.into()),
            Matcher::UrlEncoded("client_id".into(), "classdesk-mobile".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "tokA", "refresh_token": "refA", "expires_in": 3600}"#)
        .expect(1)
        .create_async()
        .await;
    let userinfo = server
        .mock("GET", "/connect/userinfo")
        .match_header("authorization", "Bearer tokA")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"sub": "u-1", "name": "Ada Admin", "email": "ada@school.test", "role": "admin"}"#)
        .expect(1)
        .create_async()
        .await;

    auth.complete_login(&format!("{}?code=auth-code-1&state={}", REDIRECT_URI, state))
        .await
        .expect("complete_login failed");
    token.assert_async().await;
    userinfo.assert_async().await;

    assert_eq!(store.access_token().as_deref(), Some("tokA"));
    assert_eq!(store.refresh_token().as_deref(), Some("refA"));
    let user = store.user().expect("user not set");
    assert!(user.is_admin());
    assert_eq!(user.subject.as_deref(), Some("u-1"));
    // base64url(SHA-256) without padding
    assert_eq!(challenge.len(), 43);

    // A second run sees the same session
    let restarted = open_store(dir.path()).await;
    assert!(restarted.is_authenticated());
    assert_eq!(restarted.user(), store.user());
    let raw = std::fs::read_to_string(dir.path().join("session.json")).expect("session file missing");
    assert!(!raw.contains("refA"));

    let revoke = server
        .mock("POST", "/connect/revocation")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("token".into(), "refA".into()),
            Matcher::UrlEncoded("token_type_hint".into(), "refresh_token".into()),
        ]))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    auth.logout().await;
    revoke.assert_async().await;
    assert!(!store.is_authenticated());
    assert!(!open_store(dir.path()).await.is_authenticated());
}

#[tokio::test]
async fn test_logout_clears_session_when_revocation_fails() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut server = Server::new_async().await;
    let _revoke = server
        .mock("POST", "/connect/revocation")
        .with_status(503)
        .create_async()
        .await;

    let store = open_store(dir.path()).await;
    store.set_auth("tokA", "refA", None).await.expect("set_auth failed");

    let auth = AuthService::new(store.clone(), identity(&server));
    auth.logout().await;
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn test_callback_with_wrong_state_is_rejected() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut server = Server::new_async().await;
    let token = server.mock("POST", "/connect/token").expect(0).create_async().await;

    let store = open_store(dir.path()).await;
    let auth = AuthService::new(store.clone(), identity(&server));
    auth.begin_login().await.expect("begin_login failed");

    let result = auth
        .complete_login(&format!("{}?code=auth-code-1&state=forged", REDIRECT_URI))
        .await;
    assert!(matches!(result, Err(AuthError::StateMismatch)));
    token.assert_async().await;
    assert!(!store.is_authenticated());

    // The pending login was consumed
    let state = pkce::generate_state();
    let result = auth
        .complete_login(&format!("{}?code=auth-code-1&state={}", REDIRECT_URI, state))
        .await;
    assert!(matches!(result, Err(AuthError::NoPendingLogin)));
}

#[tokio::test]
async fn test_userinfo_failure_still_signs_in() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", "/connect/token")
        .with_status(200)
        .with_body(r#"{"access_token": "tokA", "refresh_token": "refA"}"#)
        .create_async()
        .await;
    let _userinfo = server
        .mock("GET", "/connect/userinfo")
        .with_status(500)
        .create_async()
        .await;

    let store = open_store(dir.path()).await;
    let auth = AuthService::new(store.clone(), identity(&server));
    let url = auth.begin_login().await.expect("begin_login failed");
    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("no state in URL");

    auth.complete_login(&format!("{}?code=c&state={}", REDIRECT_URI, state))
        .await
        .expect("complete_login failed");
    assert!(store.is_authenticated());
    assert_eq!(store.user().map(|u| u.display_name().to_string()).as_deref(), Some("Unknown user"));
}

#[tokio::test]
async fn test_token_without_refresh_token_is_rejected() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", "/connect/token")
        .with_status(200)
        .with_body(r#"{"access_token": "tokA"}"#)
        .create_async()
        .await;

    let store = open_store(dir.path()).await;
    let auth = AuthService::new(store.clone(), identity(&server));
    let url = auth.begin_login().await.expect("begin_login failed");
    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("no state in URL");

    let result = auth.complete_login(&format!("{}?code=c&state={}", REDIRECT_URI, state)).await;
    assert!(matches!(result, Err(AuthError::InvalidTokenResponse(_))));
    assert!(!store.is_authenticated());
}
