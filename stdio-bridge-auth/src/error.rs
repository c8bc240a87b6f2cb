use thiserror::Error;

use crate::common::AccountId;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid account id: {0}")]
    InvalidAccountId(String),

    #[error("State parameter does not match any pending authorization attempt (unknown or expired)")]
    CsrfMismatch,

    #[error("Authorization attempt was already used")]
    AttemptNotFound,

    #[error("Invalid authorization callback: {0}")]
    InvalidCallback(String),

    #[error("Authorization denied by provider: {error}{}", describe(.description))]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Token exchange failed: {code}{}", describe(.description))]
    TokenExchange {
        code: String,
        description: Option<String>,
    },

    #[error("Token refresh failed: {code}{}", describe(.description))]
    Refresh {
        code: String,
        description: Option<String>,
    },

    #[error("No credential on file for account {0}")]
    NotAuthenticated(AccountId),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({})", d))
        .unwrap_or_default()
}

impl AuthError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Config(_) => "config_error",
            AuthError::InvalidAccountId(_) => "invalid_account_id",
            AuthError::CsrfMismatch => "csrf_mismatch",
            AuthError::AttemptNotFound => "attempt_not_found",
            AuthError::InvalidCallback(_) => "invalid_callback",
            AuthError::AuthorizationDenied { .. } => "authorization_denied",
            AuthError::TokenExchange { .. } => "token_exchange_error",
            AuthError::Refresh { .. } => "refresh_error",
            AuthError::NotAuthenticated(_) => "not_authenticated",
            AuthError::Storage(_) => "storage_error",
            AuthError::Json(_) => "serialization_error",
            AuthError::Io(_) => "io_error",
        }
    }

    /// What the operator should do next.
    pub fn remediation(&self) -> &'static str {
        match self {
            AuthError::Config(_) | AuthError::InvalidAccountId(_) => {
                "Set the account id and client id in the bridge configuration and restart."
            }
            AuthError::CsrfMismatch | AuthError::AttemptNotFound | AuthError::InvalidCallback(_) => {
                "Start a new authorization from /login; each login link can be used once."
            }
            AuthError::AuthorizationDenied { .. } => {
                "Approve the requested scope at the provider, or check the integration's allowed scopes, then retry /login."
            }
            AuthError::TokenExchange { .. } => {
                "Verify the client id, client authentication mode and redirect URI registered with the provider, then retry /login."
            }
            AuthError::Refresh { .. } => {
                "The stored refresh token was rejected; re-authorize through /login."
            }
            AuthError::NotAuthenticated(_) => "Authorize the bridge by visiting /login.",
            AuthError::Storage(_) | AuthError::Json(_) | AuthError::Io(_) => {
                "Check that the credential directory exists and is writable by the bridge."
            }
        }
    }
}
