use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use stdio_bridge_auth::common::MAX_TOKEN_LIFETIME_SECS;
use stdio_bridge_auth::{AccountId, AuthError, ClientAuth, FlowSettings, ProviderEndpoints};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Configuration {
    #[serde(default)]
    pub server: ServerConfiguration,
    #[serde(default)]
    pub oauth: OAuthConfiguration,
    #[serde(default)]
    pub storage: StorageConfiguration,
    #[serde(default)]
    pub worker: WorkerConfiguration,
    #[serde(default)]
    pub bridge: BridgeConfiguration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfiguration {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Public origin of the bridge, used for the redirect URI and the
    /// post-login redirect.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuthMode {
    #[default]
    Public,
    Basic,
}

#[derive(Deserialize, Clone)]
pub struct OAuthConfiguration {
    pub account_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    #[serde(default)]
    pub client_auth: ClientAuthMode,

    #[serde(default = "default_scope")]
    pub scope: String,

    #[serde(default = "default_callback_path")]
    pub callback_path: String,

    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_seconds: u64,

    #[serde(default = "default_attempt_ttl")]
    pub attempt_ttl_seconds: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfiguration {
    pub credentials_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfiguration {
    #[serde(default = "default_worker_command")]
    pub command: String,

    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,

    pub working_dir: Option<PathBuf>,

    /// Start the worker with the bridge's own environment underneath the
    /// injected variables. When false only `PATH` is carried over.
    #[serde(default = "default_true")]
    pub inherit_env: bool,

    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,

    /// Refuse to open a stream until a credential is on file.
    #[serde(default)]
    pub require_credential: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfiguration {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,

    #[serde(default = "default_submit_path")]
    pub submit_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_scope() -> String {
    "mcp".to_string()
}

fn default_callback_path() -> String {
    "/callback".to_string()
}

fn default_authorize_url() -> String {
    "https://{account}.app.netsuite.com/app/login/oauth2/authorize.nl".to_string()
}

fn default_token_url() -> String {
    "https://{account}.suitetalk.api.netsuite.com/services/rest/auth/oauth2/v1/token".to_string()
}

fn default_refresh_margin() -> u64 {
    300
}

fn default_attempt_ttl() -> u64 {
    600
}

fn default_request_timeout() -> u64 {
    30
}

fn default_worker_command() -> String {
    "npx".to_string()
}

fn default_worker_args() -> Vec<String> {
    vec!["@suiteinsider/netsuite-mcp@latest".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_env_prefix() -> String {
    "NETSUITE".to_string()
}

fn default_channel_capacity() -> usize {
    256
}

fn default_keep_alive() -> u64 {
    15
}

fn default_submit_path() -> String {
    "/stream".to_string()
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for OAuthConfiguration {
    fn default() -> Self {
        Self {
            account_id: None,
            client_id: None,
            client_secret: None,
            client_auth: ClientAuthMode::default(),
            scope: default_scope(),
            callback_path: default_callback_path(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            refresh_margin_seconds: default_refresh_margin(),
            attempt_ttl_seconds: default_attempt_ttl(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for OAuthConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfiguration")
            .field("account_id", &self.account_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("client_auth", &self.client_auth)
            .field("scope", &self.scope)
            .field("callback_path", &self.callback_path)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

impl Default for WorkerConfiguration {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            args: default_worker_args(),
            working_dir: None,
            inherit_env: true,
            env_prefix: default_env_prefix(),
            require_credential: false,
        }
    }
}

impl Default for BridgeConfiguration {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            keep_alive_seconds: default_keep_alive(),
            submit_path: default_submit_path(),
        }
    }
}

impl Configuration {
    pub fn new() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if std::path::Path::new("config.toml").exists() {
            builder = builder.add_source(config::File::with_name("config"));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BRIDGE")
                .separator("__")
                .try_parsing(true)
                .list_separator(" ")
                .with_list_parse_key("worker.args"),
        );

        let configuration: Self = builder.build()?.try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    /// Startup checks that would otherwise surface on the first login.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        url::Url::parse(&self.server.base_url).map_err(|e| {
            config::ConfigError::Message(format!(
                "server.base_url {:?} is not a valid URL: {}",
                self.server.base_url, e
            ))
        })?;

        if !self.oauth.callback_path.starts_with('/') {
            return Err(config::ConfigError::Message(
                "oauth.callback_path must start with '/'".to_string(),
            ));
        }
        if !self.bridge.submit_path.starts_with('/') {
            return Err(config::ConfigError::Message(
                "bridge.submit_path must start with '/'".to_string(),
            ));
        }
        if self.bridge.channel_capacity == 0 {
            return Err(config::ConfigError::Message(
                "bridge.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.oauth.refresh_margin_seconds > MAX_TOKEN_LIFETIME_SECS {
            return Err(config::ConfigError::Message(format!(
                "oauth.refresh_margin_seconds must be at most {}",
                MAX_TOKEN_LIFETIME_SECS
            )));
        }
        if self.worker.command.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "worker.command is empty".to_string(),
            ));
        }

        self.endpoints()
            .validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;

        match (self.oauth.client_auth, self.client_secret()) {
            (ClientAuthMode::Basic, None) => {
                return Err(config::ConfigError::Message(
                    "oauth.client_auth = \"basic\" requires oauth.client_secret".to_string(),
                ))
            }
            (ClientAuthMode::Public, Some(_)) => {
                tracing::warn!("oauth.client_secret is set but client_auth is \"public\"; ignoring it");
            }
            _ => {}
        }

        if let Some(raw) = &self.oauth.account_id {
            AccountId::parse(raw).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        }

        Ok(())
    }

    pub fn redirect_uri(&self) -> String {
        format!(
            "{}{}",
            self.server.base_url.trim_end_matches('/'),
            self.oauth.callback_path
        )
    }

    /// Where the browser lands after a successful callback.
    pub fn connected_url(&self) -> String {
        format!("{}/?connected=true", self.server.base_url.trim_end_matches('/'))
    }

    /// Configured account, canonicalized. `Ok(None)` when none is set.
    pub fn account_id(&self) -> Result<Option<AccountId>, AuthError> {
        match self.oauth.account_id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => AccountId::parse(raw).map(Some),
            _ => Ok(None),
        }
    }

    pub fn client_auth(&self) -> ClientAuth {
        match (self.oauth.client_auth, self.client_secret()) {
            (ClientAuthMode::Basic, Some(secret)) => ClientAuth::Basic {
                client_secret: secret.to_string(),
            },
            _ => ClientAuth::Public,
        }
    }

    pub fn endpoints(&self) -> ProviderEndpoints {
        ProviderEndpoints::new(&self.oauth.authorize_url, &self.oauth.token_url)
    }

    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            refresh_margin: chrono::Duration::seconds(
                self.oauth.refresh_margin_seconds.min(MAX_TOKEN_LIFETIME_SECS) as i64,
            ),
            attempt_ttl_seconds: self.oauth.attempt_ttl_seconds,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.oauth.request_timeout_seconds)
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.storage.credentials_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join("stdio-bridge").join("sessions"))
                .unwrap_or_else(|| PathBuf::from("sessions"))
        })
    }

    fn client_secret(&self) -> Option<&str> {
        self.oauth
            .client_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let configuration = Configuration::default();
        assert_eq!(configuration.server.port, 3000);
        assert_eq!(configuration.server.max_body_bytes, 4 * 1024 * 1024);
        assert_eq!(configuration.oauth.scope, "mcp");
        assert_eq!(configuration.worker.command, "npx");
        assert_eq!(configuration.worker.env_prefix, "NETSUITE");
        assert!(configuration.worker.inherit_env);
        assert_eq!(configuration.bridge.channel_capacity, 256);
        assert_eq!(configuration.bridge.submit_path, "/stream");
        assert!(configuration.validate().is_ok());
    }

    #[test]
    fn redirect_uri_joins_base_and_callback() {
        let mut configuration = Configuration::default();
        configuration.server.base_url = "https://bridge.example.com/".to_string();
        assert_eq!(
            configuration.redirect_uri(),
            "https://bridge.example.com/callback"
        );
        assert_eq!(
            configuration.connected_url(),
            "https://bridge.example.com/?connected=true"
        );
    }

    #[test]
    fn basic_auth_requires_secret() {
        let mut configuration = Configuration::default();
        configuration.oauth.client_auth = ClientAuthMode::Basic;
        assert!(configuration.validate().is_err());

        configuration.oauth.client_secret = Some("s3cret".to_string());
        assert!(configuration.validate().is_ok());
        assert!(matches!(configuration.client_auth(), ClientAuth::Basic { .. }));
    }

    #[test]
    fn oversized_refresh_margin_is_rejected() {
        let mut configuration = Configuration::default();
        configuration.oauth.refresh_margin_seconds = u64::MAX;
        assert!(configuration.validate().is_err());

        configuration.oauth.refresh_margin_seconds = 600;
        assert!(configuration.validate().is_ok());
        assert_eq!(
            configuration.flow_settings().refresh_margin,
            chrono::Duration::minutes(10)
        );
    }

    #[test]
    fn public_mode_ignores_secret() {
        let mut configuration = Configuration::default();
        configuration.oauth.client_secret = Some("s3cret".to_string());
        assert_eq!(configuration.client_auth(), ClientAuth::Public);
    }

    #[test]
    fn account_id_is_canonicalized() {
        let mut configuration = Configuration::default();
        assert!(configuration.account_id().unwrap().is_none());

        configuration.oauth.account_id = Some(" ACME ".to_string());
        assert_eq!(configuration.account_id().unwrap().unwrap().as_str(), "acme");

        configuration.oauth.account_id = Some("../etc".to_string());
        assert!(configuration.validate().is_err());
    }

    #[test]
    fn explicit_credentials_dir_wins() {
        let mut configuration = Configuration::default();
        configuration.storage.credentials_dir = Some(PathBuf::from("/tmp/creds"));
        assert_eq!(configuration.credentials_dir(), PathBuf::from("/tmp/creds"));
    }

    #[test]
    fn sections_deserialize_with_defaults() {
        let configuration: Configuration = config::Config::builder()
            .set_override("oauth.account_id", "acme")
            .unwrap()
            .set_override("worker.command", "cat")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(configuration.oauth.account_id.as_deref(), Some("acme"));
        assert_eq!(configuration.worker.command, "cat");
        assert_eq!(configuration.worker.args, default_worker_args());
        assert_eq!(configuration.server.port, 3000);
    }
}
