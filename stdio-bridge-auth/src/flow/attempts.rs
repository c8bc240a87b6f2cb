use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::common::AccountId;

/// One in-flight authorization round trip, keyed by its `state`.
#[derive(Clone)]
pub struct AuthorizationAttempt {
    pub state: String,
    pub verifier: String,
    pub account_id: AccountId,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for AuthorizationAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationAttempt")
            .field("account_id", &self.account_id)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum AttemptLookup {
    Found(AuthorizationAttempt),
    /// The state was issued but has already been consumed.
    Consumed,
    /// The state was issued but outlived its TTL.
    Expired,
    /// The state was never issued by this process.
    Unknown,
}

/// Correlation table between `state` values and their PKCE verifiers.
///
/// A state can be taken at most once. Taken states leave a tombstone for one
/// TTL so that replays are reported distinctly from forged states.
pub struct AttemptStore {
    pending: Arc<DashMap<String, AuthorizationAttempt>>,
    consumed: Arc<DashMap<String, DateTime<Utc>>>,
    ttl: Duration,
}

impl AttemptStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            consumed: Arc::new(DashMap::new()),
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    pub fn insert(&self, attempt: AuthorizationAttempt) {
        tracing::debug!(account_id = %attempt.account_id, "Stored authorization attempt");
        self.pending.insert(attempt.state.clone(), attempt);
    }

    /// Remove and return the attempt for `state`.
    pub fn take(&self, state: &str) -> AttemptLookup {
        match self.pending.remove(state) {
            Some((state, attempt)) => {
                let now = Utc::now();
                self.consumed.insert(state, now);
                if age(attempt.created_at, now) >= self.ttl {
                    AttemptLookup::Expired
                } else {
                    AttemptLookup::Found(attempt)
                }
            }
            None if self.consumed.contains_key(state) => AttemptLookup::Consumed,
            None => AttemptLookup::Unknown,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop expired attempts and tombstones.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.pending.len() + self.consumed.len();

        self.pending
            .retain(|_, attempt| age(attempt.created_at, now) < self.ttl);
        self.consumed
            .retain(|_, consumed_at| age(*consumed_at, now) < self.ttl);

        before.saturating_sub(self.pending.len() + self.consumed.len())
    }

    /// Background task that periodically purges expired entries.
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        let store = Self {
            pending: self.pending.clone(),
            consumed: self.consumed.clone(),
            ttl: self.ttl,
        };

        tracing::info!(
            "Attempt store cleanup running with TTL of {} seconds",
            self.ttl.as_secs()
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let cleaned = store.purge_expired();
                if cleaned > 0 {
                    tracing::info!(
                        "Cleaned up {} expired authorization attempts, {} pending",
                        cleaned,
                        store.pending_count()
                    );
                }
            }
        })
    }
}

fn age(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
