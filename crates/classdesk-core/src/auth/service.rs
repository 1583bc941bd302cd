use reqwest::Url;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{AuthError, SessionStore};
use crate::models::UserProfile;
use crate::oidc::{IdentityClient, TokenTypeHint};

/// Verifier and state of the login attempt awaiting its callback
struct PendingLogin {
    state: String,
    code_verifier: String,
}

/// Interactive sign-in and sign-out on top of the session store.
pub struct AuthService {
    store: SessionStore,
    identity: IdentityClient,
    pending: Mutex<Option<PendingLogin>>,
}

impl AuthService {
    pub fn new(store: SessionStore, identity: IdentityClient) -> Self {
        Self {
            store,
            identity,
            pending: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Start a PKCE login and return the URL to open in the browser.
    /// A new call abandons any login still waiting for its callback.
    pub async fn begin_login(&self) -> Result<Url, AuthError> {
        let request = self.identity.authorization_request()?;
        *self.pending.lock().await = Some(PendingLogin {
            state: request.state,
            code_verifier: request.code_verifier,
        });
        Ok(request.url)
    }

    /// Finish the login from the redirect URI the browser was sent to.
    pub async fn complete_login(&self, redirect: &str) -> Result<(), AuthError> {
        let callback = self.identity.parse_callback(redirect)?;
        let pending = self.pending.lock().await.take().ok_or(AuthError::NoPendingLogin)?;
        if callback.state.as_deref() != Some(pending.state.as_str()) {
            warn!("Authorization callback state does not match the pending login");
            return Err(AuthError::StateMismatch);
        }

        let tokens = self
            .identity
            .exchange_code(&callback.code, &pending.code_verifier)
            .await?;
        let refresh_token = tokens.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            AuthError::InvalidTokenResponse("no refresh_token issued; is offline_access granted?".to_string())
        })?;

        // A profile lookup failure should not cost the user their login
        let user = match self.identity.user_info(&tokens.access_token).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Failed to fetch user info");
                UserProfile::default()
            }
        };

        info!(user = user.display_name(), "Signed in");
        self.store.set_auth(tokens.access_token, refresh_token, Some(user)).await
    }

    /// Revoke the refresh token (best effort) and clear the session.
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.store.refresh_token() {
            if let Err(e) = self.identity.revoke(&refresh_token, TokenTypeHint::RefreshToken).await {
                warn!(error = %e, "Failed to revoke refresh token");
            }
        }
        self.store.clear_auth().await;
        info!("Signed out");
    }
}
