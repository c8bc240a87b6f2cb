use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Streaming,
    Closed,
}

/// Registry entry for one live worker process.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    pub input: mpsc::UnboundedSender<String>,
    pub state: Arc<watch::Sender<SessionState>>,
    pub cancel: CancellationToken,
    pub created_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }
}

/// Live sessions by id. Entries are removed by their supervisor on teardown.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id.clone(), handle);
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Remove `id`. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Signal every live session to tear down.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.sessions.iter() {
            entry.value().cancel.cancel();
            cancelled += 1;
        }
        cancelled
    }
}
