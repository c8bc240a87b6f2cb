use axum::{extract::State, http::StatusCode};

use crate::{error::ServerError, AppState};

/// Forget the configured account's credential.
pub async fn logout(State(state): State<AppState>) -> Result<StatusCode, ServerError> {
    if let Some(account_id) = state.config.account_id()? {
        state.oauth.clear_session(&account_id)?;
    }
    Ok(StatusCode::NO_CONTENT)
}
