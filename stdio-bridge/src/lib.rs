pub mod bridge;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;

pub use config::Configuration;
pub use error::ServerError;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use bridge::{BridgeSettings, ProcessBridge, WorkerEnvironment};
use stdio_bridge_auth::{
    AuthError, CredentialStore, FileCredentialStore, OAuthExchanger, OAuthFlowController,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub oauth: Arc<OAuthFlowController>,
    pub bridge: Arc<ProcessBridge>,
}

impl AppState {
    /// Wire the file-backed credential store, the token endpoint client and
    /// the process bridge from configuration.
    pub fn from_config(configuration: Configuration) -> Result<Self, ServerError> {
        let store: Arc<dyn CredentialStore> =
            Arc::new(FileCredentialStore::new(configuration.credentials_dir())?);
        let exchanger = Arc::new(OAuthExchanger::new(
            configuration.endpoints(),
            configuration.client_auth(),
            configuration.request_timeout(),
        )?);
        let oauth = OAuthFlowController::new(
            configuration.endpoints(),
            store,
            exchanger,
            configuration.flow_settings(),
        );
        let bridge = ProcessBridge::new(BridgeSettings::from_config(&configuration));

        Ok(Self::new(configuration, oauth, bridge))
    }

    pub fn new(configuration: Configuration, oauth: OAuthFlowController, bridge: ProcessBridge) -> Self {
        Self {
            config: Arc::new(configuration),
            oauth: Arc::new(oauth),
            bridge: Arc::new(bridge),
        }
    }

    /// Environment for a new worker: the configured account's credential,
    /// refreshed if it is close to expiry.
    ///
    /// Without a usable credential the worker still starts with identifiers
    /// only, unless `worker.require_credential` is set.
    pub async fn worker_environment(&self) -> Result<WorkerEnvironment, ServerError> {
        let prefix = &self.config.worker.env_prefix;
        let client_id = self.config.oauth.client_id.as_deref();

        let Some(account_id) = self.config.account_id()? else {
            if self.config.worker.require_credential {
                return Err(AuthError::Config("account id is not configured".to_string()).into());
            }
            tracing::warn!("No account configured, starting worker without credentials");
            return Ok(WorkerEnvironment::unauthenticated(prefix, None, client_id));
        };

        match self.oauth.ensure_valid_credential(&account_id).await {
            Ok(record) => {
                let session_file = self.oauth.credential_location(&account_id);
                Ok(WorkerEnvironment::from_credential(
                    prefix,
                    &record,
                    session_file.as_deref(),
                ))
            }
            Err(e) if self.config.worker.require_credential => Err(e.into()),
            Err(e) => {
                tracing::warn!(
                    account_id = %account_id,
                    error = %e,
                    "Starting worker without credentials; visit /login to authorize"
                );
                Ok(WorkerEnvironment::unauthenticated(
                    prefix,
                    Some(&account_id),
                    client_id,
                ))
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    let callback_path = state.config.oauth.callback_path.clone();
    let submit_path = state.config.bridge.submit_path.clone();
    let max_body_bytes = state.config.server.max_body_bytes;

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/login", get(handlers::login))
        .route(&callback_path, get(handlers::oauth_callback))
        .route("/status", get(handlers::status))
        .route("/logout", post(handlers::logout))
        .route("/stream", get(handlers::open_stream))
        .route(&submit_path, post(handlers::submit_message))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
