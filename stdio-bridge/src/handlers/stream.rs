use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;

use crate::{bridge::BridgeEvent, error::ServerError, models::SubmitParams, AppState};

/// Open a session and stream its worker's output as SSE.
///
/// Dropping the response closes the event channel, which tears the worker
/// down.
pub async fn open_stream(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let env = state.worker_environment().await?;
    let opened = state.bridge.open_session(env)?;
    let session_id = opened.session_id;
    let mut events = opened.events;

    tracing::info!(session_id = %session_id, "Stream opened");

    let stream = async_stream::stream! {
        while let Some(event) = events.recv().await {
            yield Ok(sse_event(&event));
        }
        tracing::debug!(session_id = %session_id, "Stream ended");
    };

    let keep_alive = KeepAlive::new().interval(Duration::from_secs(
        state.config.bridge.keep_alive_seconds.max(1),
    ));

    Ok(Sse::new(stream).keep_alive(keep_alive))
}

fn sse_event(event: &BridgeEvent) -> Event {
    Event::default().event(event.name()).data(event.data())
}

/// Forward the raw request body to a session's worker.
pub async fn submit_message(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
    body: String,
) -> Result<(StatusCode, &'static str), ServerError> {
    let session_id = params
        .session_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServerError::BadRequest("missing sessionId query parameter".to_string()))?;

    tracing::debug!(session_id = %session_id, bytes = body.len(), "Message received");
    state.bridge.submit_input(&session_id, body)?;

    Ok((StatusCode::ACCEPTED, "Accepted"))
}
