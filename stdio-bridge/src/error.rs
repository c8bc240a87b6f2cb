use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::bridge::BridgeError;
use stdio_bridge_auth::AuthError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Auth(err) => match err {
                AuthError::CsrfMismatch
                | AuthError::AttemptNotFound
                | AuthError::InvalidCallback(_)
                | AuthError::AuthorizationDenied { .. }
                | AuthError::InvalidAccountId(_) => StatusCode::BAD_REQUEST,
                AuthError::TokenExchange { .. } | AuthError::Refresh { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                AuthError::NotAuthenticated(_) => StatusCode::UNAUTHORIZED,
                AuthError::Config(_)
                | AuthError::Storage(_)
                | AuthError::Json(_)
                | AuthError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Bridge(err) => match err {
                BridgeError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                BridgeError::Spawn { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Auth(err) => err.code(),
            ServerError::Bridge(BridgeError::SessionNotFound(_)) => "session_not_found",
            ServerError::Bridge(BridgeError::Spawn { .. }) => "spawn_error",
            ServerError::BadRequest(_) => "bad_request",
            ServerError::Configuration(_) => "config_error",
        }
    }

    pub fn remediation(&self) -> &'static str {
        match self {
            ServerError::Auth(err) => err.remediation(),
            ServerError::Bridge(BridgeError::SessionNotFound(_)) => {
                "Open a new stream with GET /stream and post to the endpoint it announces."
            }
            ServerError::Bridge(_) => {
                "Check the worker command, arguments and working directory in the bridge configuration."
            }
            ServerError::BadRequest(_) => "Fix the request and try again.",
            ServerError::Configuration(_) => {
                "Fix the bridge configuration and restart."
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::warn!(code = self.code(), error = %self, "Request rejected");
        }

        let body = Json(json!({
            "error": self.code(),
            "description": self.to_string(),
            "remediation": self.remediation(),
        }));

        (status, body).into_response()
    }
}

impl From<config::ConfigError> for ServerError {
    fn from(err: config::ConfigError) -> Self {
        ServerError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_documented_statuses() {
        let cases = [
            (AuthError::CsrfMismatch, StatusCode::BAD_REQUEST),
            (AuthError::AttemptNotFound, StatusCode::BAD_REQUEST),
            (
                AuthError::TokenExchange {
                    code: "invalid_grant".to_string(),
                    description: None,
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                AuthError::Config("missing".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AuthError::Storage("disk full".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status(), status);
        }
    }

    #[test]
    fn session_not_found_is_404() {
        let err = ServerError::from(BridgeError::SessionNotFound("x".to_string()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "session_not_found");
    }
}
