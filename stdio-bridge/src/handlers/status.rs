use axum::{extract::State, Json};

use crate::{error::ServerError, models::StatusResponse, AppState};

pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ServerError> {
    let account_id = state.config.account_id()?;
    let record = match &account_id {
        Some(account_id) => state.oauth.credential(account_id)?,
        None => None,
    };

    Ok(Json(StatusResponse {
        connected: record.as_ref().is_some_and(|r| r.authenticated),
        account_id: account_id.map(|id| id.to_string()),
        expires_at: record.map(|r| r.tokens.expires_at.timestamp()),
        last_phase: state.oauth.last_phase(),
        active_sessions: state.bridge.session_count(),
    }))
}
