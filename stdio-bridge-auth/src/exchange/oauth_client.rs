use async_trait::async_trait;
use oauth2::{
    basic::{BasicClient, BasicErrorResponse, BasicTokenResponse, BasicTokenType},
    AuthType, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpRequest,
    HttpResponse, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, TokenResponse,
    TokenUrl,
};
use std::time::Duration;

use super::{CodeExchange, IssuedTokens, ProviderError, RefreshGrant, TokenExchanger};
use crate::common::AccountId;
use crate::endpoints::ProviderEndpoints;
use crate::error::AuthError;

type TokenClient = BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// How the bridge authenticates itself at the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientAuth {
    /// PKCE only; `client_id` travels in the form body.
    Public,
    /// Confidential client; HTTP Basic with the client secret.
    Basic { client_secret: String },
}

impl std::fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientAuth::Public => f.write_str("Public"),
            ClientAuth::Basic { .. } => f.write_str("Basic"),
        }
    }
}

// Adapts oauth2's request type onto reqwest
async fn execute(client: reqwest::Client, request: HttpRequest) -> Result<HttpResponse, reqwest::Error> {
    let mut builder = client
        .request(request.method().clone(), request.uri().to_string())
        .body(request.body().clone());

    for (name, value) in request.headers() {
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    let mut http_response = HttpResponse::new(body);
    *http_response.status_mut() = status;
    *http_response.headers_mut() = headers;

    Ok(http_response)
}

pub struct OAuthExchanger {
    endpoints: ProviderEndpoints,
    client_auth: ClientAuth,
    http: reqwest::Client,
}

impl OAuthExchanger {
    pub fn new(
        endpoints: ProviderEndpoints,
        client_auth: ClientAuth,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        endpoints.validate()?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoints,
            client_auth,
            http,
        })
    }

    fn client(&self, client_id: &str, account_id: &AccountId) -> Result<TokenClient, ProviderError> {
        let token_url = self
            .endpoints
            .token_url(account_id)
            .map_err(|e| ProviderError::new("invalid_endpoint", Some(e.to_string())))?;
        let token_url = TokenUrl::new(token_url.to_string())
            .map_err(|e| ProviderError::new("invalid_endpoint", Some(e.to_string())))?;

        let client = BasicClient::new(ClientId::new(client_id.to_string()))
            .set_token_uri(token_url)
            .set_auth_type(AuthType::RequestBody);

        Ok(match &self.client_auth {
            ClientAuth::Public => client,
            ClientAuth::Basic { client_secret } => client
                .set_client_secret(ClientSecret::new(client_secret.clone()))
                .set_auth_type(AuthType::BasicAuth),
        })
    }
}

#[async_trait]
impl TokenExchanger for OAuthExchanger {
    async fn exchange_code(&self, request: CodeExchange) -> Result<IssuedTokens, ProviderError> {
        let redirect_url = RedirectUrl::new(request.redirect_uri.clone()).map_err(|e| {
            ProviderError::new("invalid_request", Some(format!("Invalid redirect URI: {}", e)))
        })?;

        let http = self.http.clone();
        let send = move |req: HttpRequest| execute(http.clone(), req);

        let token = self
            .client(&request.client_id, &request.account_id)?
            .set_redirect_uri(redirect_url)
            .exchange_code(AuthorizationCode::new(request.code))
            .set_pkce_verifier(PkceCodeVerifier::new(request.code_verifier))
            .request_async(&send)
            .await
            .map_err(provider_error)?;

        let issued = issued_tokens(&token);
        tracing::debug!(
            account_id = %request.account_id,
            expires_in = ?issued.expires_in,
            "Exchanged authorization code for tokens"
        );
        Ok(issued)
    }

    async fn refresh(&self, request: RefreshGrant) -> Result<IssuedTokens, ProviderError> {
        let http = self.http.clone();
        let send = move |req: HttpRequest| execute(http.clone(), req);

        let token = self
            .client(&request.client_id, &request.account_id)?
            .exchange_refresh_token(&RefreshToken::new(request.refresh_token))
            .request_async(&send)
            .await
            .map_err(provider_error)?;

        let issued = issued_tokens(&token);
        tracing::debug!(
            account_id = %request.account_id,
            expires_in = ?issued.expires_in,
            rotated = issued.refresh_token.is_some(),
            "Refreshed tokens"
        );
        Ok(issued)
    }
}

fn issued_tokens(token: &BasicTokenResponse) -> IssuedTokens {
    IssuedTokens {
        access_token: token.access_token().secret().to_string(),
        refresh_token: token.refresh_token().map(|t| t.secret().to_string()),
        token_type: token_type_name(token.token_type()),
        expires_in: token.expires_in().map(|d| d.as_secs()),
        scope: token.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        }),
    }
}

fn token_type_name(token_type: &BasicTokenType) -> String {
    match token_type {
        BasicTokenType::Bearer => "Bearer".to_string(),
        BasicTokenType::Mac => "MAC".to_string(),
        BasicTokenType::Extension(other) => other.clone(),
    }
}

fn provider_error(err: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> ProviderError {
    match err {
        RequestTokenError::ServerResponse(response) => {
            let code: &str = response.error().as_ref();
            ProviderError::new(code, response.error_description().cloned())
        }
        RequestTokenError::Request(e) => ProviderError::new("request_failed", Some(e.to_string())),
        RequestTokenError::Parse(e, _) => ProviderError::new("invalid_response", Some(e.to_string())),
        RequestTokenError::Other(msg) => ProviderError::new("unexpected_response", Some(msg)),
    }
}
