//! Client for the identity server's `/connect/*` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Url};
use tracing::{debug, error, info};

use super::pkce;
use super::types::{AuthorizationCallback, OAuthErrorBody, TokenResponse};
use crate::auth::AuthError;
use crate::models::UserProfile;

const AUTHORIZE_PATH: &str = "/connect/authorize";
const TOKEN_PATH: &str = "/connect/token";
const REVOCATION_PATH: &str = "/connect/revocation";
const USERINFO_PATH: &str = "/connect/userinfo";

/// HTTP timeout for identity server calls.
/// Token calls sit on the retry path of every API request, so fail fast.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// The single capability the request gateway needs from the identity
/// provider: trade a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError>;
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Base URL of the identity server, without trailing slash
    pub issuer_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl TokenTypeHint {
    fn as_str(&self) -> &'static str {
        match self {
            TokenTypeHint::AccessToken => "access_token",
            TokenTypeHint::RefreshToken => "refresh_token",
        }
    }
}

/// A prepared authorization redirect.
///
/// `state` and `code_verifier` must be kept until the callback arrives.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub code_verifier: String,
}

/// Identity server client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct IdentityClient {
    client: Client,
    config: IdentityConfig,
}

impl IdentityClient {
    pub fn new(config: IdentityConfig) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Share an existing connection pool
    pub fn with_client(client: Client, mut config: IdentityConfig) -> Self {
        config.issuer_url = config.issuer_url.trim_end_matches('/').to_string();
        Self { client, config }
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.issuer_url, path)
    }

    /// Build the PKCE authorization URL the user is sent to.
    pub fn authorization_request(&self) -> Result<AuthorizationRequest, AuthError> {
        let code_verifier = pkce::generate_verifier();
        let state = pkce::generate_state();
        let challenge = pkce::compute_challenge(&code_verifier);
        let scope = self.config.scopes.join(" ");

        let url = Url::parse_with_params(
            &self.endpoint(AUTHORIZE_PATH),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| AuthError::InvalidRedirect(format!("bad identity server URL: {}", e)))?;

        Ok(AuthorizationRequest {
            url,
            state,
            code_verifier,
        })
    }

    /// Extract the code (or the provider's error) from a redirect URI.
    pub fn parse_callback(&self, redirect: &str) -> Result<AuthorizationCallback, AuthError> {
        let url = Url::parse(redirect).map_err(|e| AuthError::InvalidRedirect(e.to_string()))?;

        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut error_description = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => error_description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            let detail = match error_description {
                Some(description) => format!("{}: {}", error, description),
                None => error,
            };
            return Err(AuthError::AuthorizationDenied(detail));
        }

        match code {
            Some(code) if !code.is_empty() => Ok(AuthorizationCallback { code, state }),
            _ => Err(AuthError::InvalidRedirect("redirect carries no authorization code".to_string())),
        }
    }

    /// Exchange an authorization code for tokens (`authorization_code` grant)
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenResponse, AuthError> {
        debug!("Exchanging authorization code");
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        let response = self
            .client
            .post(self.endpoint(TOKEN_PATH))
            .header(header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let tokens = Self::token_response(response).await?;
        info!(rotating = tokens.refresh_token.is_some(), "Authorization code exchanged");
        Ok(tokens)
    }

    /// Trade a refresh token for a new access token (`refresh_token` grant)
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        debug!("Refreshing access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        let response = self
            .client
            .post(self.endpoint(TOKEN_PATH))
            .header(header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        Self::token_response(response).await
    }

    /// Revoke a token at the identity server
    pub async fn revoke(&self, token: &str, hint: TokenTypeHint) -> Result<(), AuthError> {
        let form = [
            ("token", token),
            ("token_type_hint", hint.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        let response = self
            .client
            .post(self.endpoint(REVOCATION_PATH))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::rejected(status, &body));
        }
        debug!(hint = hint.as_str(), "Token revoked");
        Ok(())
    }

    /// Fetch the signed-in user's profile claims
    pub async fn user_info(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let response = self
            .client
            .get(self.endpoint(USERINFO_PATH))
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::rejected(status, &body));
        }
        response
            .json()
            .await
            .map_err(|e| AuthError::InvalidTokenResponse(format!("userinfo: {}", e)))
    }

    async fn token_response(response: reqwest::Response) -> Result<TokenResponse, AuthError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(oauth) = serde_json::from_str::<OAuthErrorBody>(&body) {
                error!(
                    status = %status,
                    error = %oauth.error,
                    description = oauth.error_description.as_deref().unwrap_or(""),
                    "Token endpoint rejected the request"
                );
            } else {
                error!(status = %status, "Token endpoint rejected the request");
            }
            return Err(AuthError::rejected(status, &body));
        }

        let tokens: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::InvalidTokenResponse(e.to_string()))?;
        if tokens.access_token.is_empty() {
            return Err(AuthError::InvalidTokenResponse(
                "response does not contain an access_token".to_string(),
            ));
        }
        Ok(tokens)
    }
}

#[async_trait]
impl TokenRefresher for IdentityClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        self.refresh_access_token(refresh_token).await
    }
}
