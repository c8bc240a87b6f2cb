mod oauth_client;

pub use oauth_client::{ClientAuth, OAuthExchanger};

use async_trait::async_trait;
use std::fmt;

use crate::common::AccountId;

/// Authorization-code grant with PKCE
#[derive(Clone)]
pub struct CodeExchange {
    pub account_id: AccountId,
    pub client_id: String,
    pub code: String,
    pub redirect_uri: String,
    pub code_verifier: String,
}

/// Refresh-token grant
#[derive(Clone)]
pub struct RefreshGrant {
    pub account_id: AccountId,
    pub client_id: String,
    pub refresh_token: String,
}

/// Token endpoint response, before it is turned into a credential.
#[derive(Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

/// Rejection from the token endpoint, or a transport failure reaching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// OAuth error code such as `invalid_grant`, or a local code for
    /// transport failures.
    pub code: String,
    pub description: Option<String>,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, description: Option<String>) -> Self {
        Self {
            code: code.into(),
            description,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.code, description),
            None => f.write_str(&self.code),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Calls the authorization server's token endpoint.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange_code(&self, request: CodeExchange) -> Result<IssuedTokens, ProviderError>;

    async fn refresh(&self, request: RefreshGrant) -> Result<IssuedTokens, ProviderError>;
}

impl fmt::Debug for CodeExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeExchange")
            .field("account_id", &self.account_id)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for RefreshGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshGrant")
            .field("account_id", &self.account_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedTokens")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}
