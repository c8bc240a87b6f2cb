//! Authorization-code + PKCE flow and lazy token refresh.

mod attempts;

pub use attempts::{AttemptLookup, AttemptStore, AuthorizationAttempt};

use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::common::{AccountId, CredentialRecord, TokenSet};
use crate::endpoints::ProviderEndpoints;
use crate::error::AuthError;
use crate::exchange::{CodeExchange, RefreshGrant, TokenExchanger};
use crate::pkce::{generate_state, PkcePair};
use crate::store::CredentialStore;

/// Phase of the most recent authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FlowPhase {
    Idle,
    AwaitingCallback,
    Exchanging,
    Authenticated,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Refresh when the token expires within this window.
    pub refresh_margin: Duration,
    pub attempt_ttl_seconds: u64,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::minutes(5),
            attempt_ttl_seconds: 600,
        }
    }
}

/// Input to [`OAuthFlowController::start_auth`]. Identifiers are optional
/// because they come straight from operator configuration.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub account_id: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: String,
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    pub url: String,
    pub state: String,
}

/// Query parameters delivered by the provider's redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackInput {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Per-account refresh serialization. `generation` is bumped under the lock
/// each time a refresh finishes, and `last` holds that refresh's outcome for
/// callers that were already waiting.
#[derive(Default)]
struct RefreshSlot {
    generation: AtomicU64,
    last: Mutex<Option<RefreshOutcome>>,
}

#[derive(Clone)]
enum RefreshOutcome {
    Refreshed(CredentialRecord),
    Failed {
        code: String,
        description: Option<String>,
    },
}

impl RefreshOutcome {
    fn from_result(result: &Result<CredentialRecord, AuthError>) -> Self {
        match result {
            Ok(record) => RefreshOutcome::Refreshed(record.clone()),
            Err(AuthError::Refresh { code, description }) => RefreshOutcome::Failed {
                code: code.clone(),
                description: description.clone(),
            },
            Err(e) => RefreshOutcome::Failed {
                code: e.code().to_string(),
                description: Some(e.to_string()),
            },
        }
    }

    fn into_result(self) -> Result<CredentialRecord, AuthError> {
        match self {
            RefreshOutcome::Refreshed(record) => Ok(record),
            RefreshOutcome::Failed { code, description } => {
                Err(AuthError::Refresh { code, description })
            }
        }
    }
}

pub struct OAuthFlowController {
    endpoints: ProviderEndpoints,
    store: Arc<dyn CredentialStore>,
    exchanger: Arc<dyn TokenExchanger>,
    attempts: AttemptStore,
    refresh_margin: Duration,
    refresh_slots: DashMap<AccountId, Arc<RefreshSlot>>,
    phase: watch::Sender<FlowPhase>,
}

impl OAuthFlowController {
    pub fn new(
        endpoints: ProviderEndpoints,
        store: Arc<dyn CredentialStore>,
        exchanger: Arc<dyn TokenExchanger>,
        settings: FlowSettings,
    ) -> Self {
        let (phase, _) = watch::channel(FlowPhase::Idle);
        Self {
            endpoints,
            store,
            exchanger,
            attempts: AttemptStore::new(settings.attempt_ttl_seconds),
            refresh_margin: settings.refresh_margin,
            refresh_slots: DashMap::new(),
            phase,
        }
    }

    pub fn attempts(&self) -> &AttemptStore {
        &self.attempts
    }

    pub fn last_phase(&self) -> FlowPhase {
        self.phase.borrow().clone()
    }

    /// Begin an authorization round trip and return the URL to send the
    /// operator to.
    pub fn start_auth(&self, request: AuthRequest) -> Result<AuthorizationStart, AuthError> {
        let account = required(request.account_id.as_deref(), "account id")?;
        let client_id = required(request.client_id.as_deref(), "client id")?;
        let account_id =
            AccountId::parse(account).map_err(|e| AuthError::Config(e.to_string()))?;

        let pkce = PkcePair::generate();
        let state = generate_state();

        let mut url = self.endpoints.authorize_url(&account_id)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", &request.redirect_uri)
            .append_pair("scope", &request.scope)
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", pkce.method.as_str());

        self.attempts.insert(AuthorizationAttempt {
            state: state.clone(),
            verifier: pkce.verifier,
            account_id: account_id.clone(),
            client_id: client_id.to_string(),
            redirect_uri: request.redirect_uri,
            scope: request.scope,
            created_at: Utc::now(),
        });
        self.phase.send_replace(FlowPhase::AwaitingCallback);

        tracing::info!(account_id = %account_id, "Started authorization attempt");

        Ok(AuthorizationStart {
            url: url.to_string(),
            state,
        })
    }

    /// Validate the provider's redirect and complete the exchange.
    pub async fn handle_callback(&self, input: CallbackInput) -> Result<CredentialRecord, AuthError> {
        if let Some(error) = input.error {
            if let Some(state) = input.state.as_deref() {
                self.attempts.take(state);
            }
            return Err(self.fail(AuthError::AuthorizationDenied {
                error,
                description: input.error_description,
            }));
        }

        let state = input.state.unwrap_or_default();
        let attempt = match self.attempts.take(&state) {
            AttemptLookup::Found(attempt) => attempt,
            AttemptLookup::Consumed => return Err(self.fail(AuthError::AttemptNotFound)),
            // An expired state is indistinguishable from one never issued
            AttemptLookup::Expired | AttemptLookup::Unknown => {
                return Err(self.fail(AuthError::CsrfMismatch))
            }
        };

        let code = match input.code.filter(|c| !c.trim().is_empty()) {
            Some(code) => code,
            None => {
                return Err(self.fail(AuthError::InvalidCallback(
                    "missing authorization code".to_string(),
                )))
            }
        };

        self.exchange_code(&code, attempt).await
    }

    /// Redeem `code` for tokens and persist the resulting credential. The
    /// attempt is consumed whatever the outcome.
    pub async fn exchange_code(
        &self,
        code: &str,
        attempt: AuthorizationAttempt,
    ) -> Result<CredentialRecord, AuthError> {
        self.phase.send_replace(FlowPhase::Exchanging);

        let AuthorizationAttempt {
            verifier,
            account_id,
            client_id,
            redirect_uri,
            scope,
            ..
        } = attempt;

        // The verifier moves into the request and is dropped with it.
        let issued = self
            .exchanger
            .exchange_code(CodeExchange {
                account_id: account_id.clone(),
                client_id: client_id.clone(),
                code: code.to_string(),
                redirect_uri: redirect_uri.clone(),
                code_verifier: verifier,
            })
            .await
            .map_err(|e| {
                self.fail(AuthError::TokenExchange {
                    code: e.code,
                    description: e.description,
                })
            })?;

        let now = Utc::now();
        let scope = issued.scope.clone().unwrap_or(scope);
        let record = CredentialRecord {
            account_id,
            client_id,
            redirect_uri,
            scope,
            tokens: TokenSet::issued(issued, now),
            authenticated: true,
            updated_at: now,
        };

        self.store.put(&record).map_err(|e| self.fail(e))?;
        self.phase.send_replace(FlowPhase::Authenticated);

        tracing::info!(
            account_id = %record.account_id,
            expires_at = %record.tokens.expires_at,
            "Authorization completed"
        );

        Ok(record)
    }

    /// Current credential, refreshed first if it is inside the refresh margin.
    pub async fn ensure_valid_credential(
        &self,
        account_id: &AccountId,
    ) -> Result<CredentialRecord, AuthError> {
        let slot = self.refresh_slot(account_id);
        let seen = slot.generation.load(Ordering::Acquire);

        let record = self.load(account_id)?;
        if !self.is_due(&record) {
            return Ok(record);
        }

        let mut last = slot.last.lock().await;

        // A refresh finished while we waited: share its outcome, failure included.
        if slot.generation.load(Ordering::Acquire) != seen {
            if let Some(outcome) = last.clone() {
                tracing::debug!(account_id = %account_id, "Reusing concurrent refresh outcome");
                return outcome.into_result();
            }
        }

        let record = self.load(account_id)?;
        if !self.is_due(&record) {
            return Ok(record);
        }

        tracing::info!(
            account_id = %account_id,
            expires_at = %record.tokens.expires_at,
            "Access token expiring soon, refreshing"
        );
        let result = self.refresh_locked(record).await;
        *last = Some(RefreshOutcome::from_result(&result));
        slot.generation.fetch_add(1, Ordering::Release);
        result
    }

    pub async fn ensure_valid_token(&self, account_id: &AccountId) -> Result<String, AuthError> {
        Ok(self
            .ensure_valid_credential(account_id)
            .await?
            .tokens
            .access_token)
    }

    /// Refresh unconditionally, serialized with any lazy refresh in flight.
    pub async fn refresh_token(&self, account_id: &AccountId) -> Result<CredentialRecord, AuthError> {
        let slot = self.refresh_slot(account_id);
        let mut last = slot.last.lock().await;
        let record = self.load(account_id)?;
        let result = self.refresh_locked(record).await;
        *last = Some(RefreshOutcome::from_result(&result));
        slot.generation.fetch_add(1, Ordering::Release);
        result
    }

    /// Forget the credential for `account_id`. Safe to repeat.
    pub fn clear_session(&self, account_id: &AccountId) -> Result<(), AuthError> {
        self.store.delete(account_id)?;
        self.phase.send_replace(FlowPhase::Idle);
        tracing::info!(account_id = %account_id, "Credential cleared");
        Ok(())
    }

    /// Stored credential without any refresh.
    pub fn credential(&self, account_id: &AccountId) -> Result<Option<CredentialRecord>, AuthError> {
        self.store.get(account_id)
    }

    pub fn credential_location(&self, account_id: &AccountId) -> Option<PathBuf> {
        self.store.location(account_id)
    }

    // Caller must hold the account's refresh lock.
    async fn refresh_locked(&self, record: CredentialRecord) -> Result<CredentialRecord, AuthError> {
        let refresh_token = record.tokens.refresh_token.clone().ok_or_else(|| {
            AuthError::Refresh {
                code: "missing_refresh_token".to_string(),
                description: Some("no refresh token on file".to_string()),
            }
        })?;

        let issued = self
            .exchanger
            .refresh(RefreshGrant {
                account_id: record.account_id.clone(),
                client_id: record.client_id.clone(),
                refresh_token,
            })
            .await
            .map_err(|e| {
                tracing::warn!(account_id = %record.account_id, error = %e, "Token refresh rejected");
                AuthError::Refresh {
                    code: e.code,
                    description: e.description,
                }
            })?;

        let now = Utc::now();
        let mut updated = record;
        updated.tokens = updated.tokens.refreshed(issued, now);
        updated.updated_at = now;
        self.store.put(&updated)?;

        tracing::info!(
            account_id = %updated.account_id,
            expires_at = %updated.tokens.expires_at,
            "Access token refreshed"
        );
        Ok(updated)
    }

    fn load(&self, account_id: &AccountId) -> Result<CredentialRecord, AuthError> {
        self.store
            .get(account_id)?
            .ok_or_else(|| AuthError::NotAuthenticated(account_id.clone()))
    }

    fn is_due(&self, record: &CredentialRecord) -> bool {
        record.tokens.needs_refresh(Utc::now(), self.refresh_margin)
    }

    fn refresh_slot(&self, account_id: &AccountId) -> Arc<RefreshSlot> {
        self.refresh_slots
            .entry(account_id.clone())
            .or_default()
            .clone()
    }

    fn fail(&self, err: AuthError) -> AuthError {
        tracing::warn!(code = err.code(), error = %err, "Authorization attempt failed");
        self.phase.send_replace(FlowPhase::Failed(err.to_string()));
        err
    }
}

fn required<'a>(value: Option<&'a str>, what: &str) -> Result<&'a str, AuthError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::Config(format!("{} is not configured", what)))
}
