use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::{error::ServerError, AppState};
use stdio_bridge_auth::AuthRequest;

/// 302 to the provider's authorization page.
pub async fn login(State(state): State<AppState>) -> Result<Response, ServerError> {
    let config = &state.config;
    let start = state.oauth.start_auth(AuthRequest {
        account_id: config.oauth.account_id.clone(),
        client_id: config.oauth.client_id.clone(),
        redirect_uri: config.redirect_uri(),
        scope: config.oauth.scope.clone(),
    })?;

    tracing::info!("Redirecting to provider for authorization");

    Ok((StatusCode::FOUND, [(header::LOCATION, start.url)]).into_response())
}
