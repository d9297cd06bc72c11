use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::auth::{AuthState, LoginRequest};
use crate::services::api_client::ApiClient;
use crate::services::local_state_service::LocalStateService;
use crate::utils::redact::mask_email;

/// Admin login and session upkeep. The token only ever lives encrypted in
/// local state.
pub struct AuthService {
    client: ApiClient,
    state: Arc<LocalStateService>,
}

impl AuthService {
    pub fn new(client: ApiClient, state: Arc<LocalStateService>) -> Self {
        Self { client, state }
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<AuthState> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(AppError::validation("email and password are required"));
        }

        let response = self
            .client
            .login(&LoginRequest {
                email: email.clone(),
                password: password.to_string(),
            })
            .await?;

        if response.token.trim().is_empty() {
            return Err(AppError::unauthenticated());
        }
        let token = response.token;
        self.state
            .run_blocking(move |state| state.save_admin_token(&token))
            .await?;
        info!(target: "app::auth", email = %mask_email(&email), "admin signed in");

        self.check_session().await
    }

    /// Validates the stored token. A rejected or unreadable token is cleared.
    pub async fn check_session(&self) -> AppResult<AuthState> {
        let Some(token) = self.state.run_blocking(|state| state.admin_token()).await? else {
            return Ok(AuthState::LoggedOut);
        };

        match self.client.session(&token).await {
            Ok(session) => Ok(AuthState::LoggedIn { session }),
            Err(err) if err.is_auth_failure() => {
                warn!(target: "app::auth", "stored admin session rejected, signing out");
                self.clear_token().await?;
                Ok(AuthState::LoggedOut)
            }
            Err(err) => Err(err),
        }
    }

    pub fn logout(&self) -> AppResult<AuthState> {
        self.state.clear_admin_token()?;
        info!(target: "app::auth", "admin signed out");
        Ok(AuthState::LoggedOut)
    }

    /// Runs an admin call with the stored token. Auth failures clear the token
    /// and surface as `Unauthenticated`.
    pub async fn authorized<T, F, Fut>(&self, call: F) -> AppResult<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let token = self
            .state
            .run_blocking(|state| state.admin_token())
            .await?
            .ok_or_else(AppError::unauthenticated)?;
        match call(token).await {
            Err(err) if err.is_auth_failure() => {
                warn!(target: "app::auth", error = %err, "admin call rejected, clearing token");
                self.clear_token().await?;
                Err(AppError::unauthenticated())
            }
            other => other,
        }
    }

    async fn clear_token(&self) -> AppResult<()> {
        self.state.run_blocking(|state| state.clear_admin_token()).await
    }
}
