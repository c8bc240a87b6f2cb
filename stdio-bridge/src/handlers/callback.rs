use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::{error::ServerError, AppState};
use stdio_bridge_auth::CallbackInput;

pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackInput>,
) -> Result<Response, ServerError> {
    tracing::info!(
        has_code = params.code.is_some(),
        has_error = params.error.is_some(),
        "OAuth callback received"
    );

    let record = state.oauth.handle_callback(params).await?;

    tracing::info!(account_id = %record.account_id, "Account connected");

    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, state.config.connected_url())],
    )
        .into_response())
}
