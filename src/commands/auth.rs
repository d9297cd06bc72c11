use crate::models::auth::{AuthState, LoginRequest};

use super::{run_blocking, AppState, CommandError, CommandResult};

pub async fn auth_login(state: &AppState, credentials: LoginRequest) -> CommandResult<AuthState> {
    state
        .auth()
        .login(&credentials.email, &credentials.password)
        .await
        .map_err(CommandError::from)
}

/// Never errors on a rejected session; that is reported as logged out.
pub async fn auth_session(state: &AppState) -> CommandResult<AuthState> {
    state.auth().check_session().await.map_err(CommandError::from)
}

pub async fn auth_logout(state: &AppState) -> CommandResult<AuthState> {
    let auth = state.auth();
    run_blocking(move || auth.logout()).await
}
