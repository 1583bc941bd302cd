use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ApiError, ApiRequest, ApiResponse, RequestExecutor};
use crate::auth::SessionStore;
use crate::oidc::TokenRefresher;

/// Executor decorator that authenticates requests from the session store
/// and recovers from an expired access token.
///
/// Per request: attach the current access token, send, and on a 401 refresh
/// the token once and reissue the original request once with the new token.
/// Whatever the reissued request returns goes back to the caller. If the
/// session cannot be refreshed it is cleared and the original 401 is
/// returned unchanged.
///
/// Refreshes are single-flight: requests failing together wait for the one
/// in progress and reuse its outcome instead of each calling the token
/// endpoint.
pub struct WithReauth<E, R> {
    inner: E,
    refresher: R,
    store: SessionStore,
    refresh_guard: Mutex<()>,
}

impl<E, R> WithReauth<E, R>
where
    E: RequestExecutor,
    R: TokenRefresher,
{
    pub fn new(inner: E, refresher: R, store: SessionStore) -> Self {
        Self {
            inner,
            refresher,
            store,
            refresh_guard: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Obtain a token to retry with after a 401 on a request sent during
    /// session `seen_generation`. `None` means the session is gone.
    async fn reauthenticate(&self, seen_generation: u64) -> Option<String> {
        let _guard = self.refresh_guard.lock().await;

        let snapshot = self.store.snapshot();
        if snapshot.generation != seen_generation {
            // Someone refreshed or signed out while this request was in flight
            debug!(
                seen_generation,
                generation = snapshot.generation,
                authenticated = snapshot.is_authenticated(),
                "Session replaced concurrently, skipping refresh"
            );
            return snapshot.session.access_token;
        }

        let Some(refresh_token) = snapshot.session.refresh_token else {
            warn!("Unauthorized without a refresh token, clearing session");
            self.store.clear_auth().await;
            return None;
        };

        let tokens = match self.refresher.refresh(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.store.clear_auth().await;
                return None;
            }
        };

        // Servers that do not rotate refresh tokens omit the field
        let rotated = tokens.refresh_token.as_deref().is_some_and(|t| !t.is_empty());
        let next_refresh = tokens
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or(refresh_token);

        let access_token = tokens.access_token;
        match self
            .store
            .set_tokens_if_current(seen_generation, access_token.clone(), next_refresh)
            .await
        {
            Ok(true) => {
                info!(rotated, "Access token refreshed");
                Some(access_token)
            }
            Ok(false) => {
                // Signed out or signed in again while the refresh was running
                debug!("Session replaced during refresh, discarding refreshed tokens");
                None
            }
            Err(e) => {
                warn!(error = %e, "Refreshed tokens unusable, clearing session");
                self.store.clear_auth().await;
                None
            }
        }
    }
}

#[async_trait]
impl<E, R> RequestExecutor for WithReauth<E, R>
where
    E: RequestExecutor,
    R: TokenRefresher,
{
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        // Read at dispatch time so a token refreshed by another request is used
        let (token, generation) = self.store.bearer();
        let authenticated = request.clone().with_bearer(token);

        let response = self.inner.execute(&authenticated).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        debug!(method = %request.method, path = %request.path, "Request unauthorized");
        match self.reauthenticate(generation).await {
            Some(token) => {
                debug!(method = %request.method, path = %request.path, "Retrying request with refreshed token");
                let retry = request.clone().with_bearer(Some(token));
                self.inner.execute(&retry).await
            }
            None => Ok(response),
        }
    }
}
