//! One worker process per client stream, relayed line by line.
//!
//! Each session runs four tasks: a stdout relay feeding the client's event
//! channel, a stderr logger, a stdin writer draining an ordered input queue,
//! and a supervisor that owns the child and tears everything down.

mod environment;
mod error;
mod registry;

pub use environment::WorkerEnvironment;
pub use error::BridgeError;
pub use registry::{SessionHandle, SessionRegistry, SessionState};

use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Configuration;

/// How long trailing worker output may take to reach the client after exit.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How long an abandoned relay may spend counting the output it drops.
const ABANDON_COUNT_LIMIT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub inherit_env: bool,
    pub channel_capacity: usize,
    /// Path clients post input to; advertised in the `endpoint` event.
    pub submit_path: String,
}

impl BridgeSettings {
    pub fn from_config(configuration: &Configuration) -> Self {
        Self {
            command: configuration.worker.command.clone(),
            args: configuration.worker.args.clone(),
            working_dir: configuration.worker.working_dir.clone(),
            inherit_env: configuration.worker.inherit_env,
            channel_capacity: configuration.bridge.channel_capacity.max(1),
            submit_path: configuration.bridge.submit_path.clone(),
        }
    }
}

/// Event delivered to the client of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Where the client should post its input.
    Endpoint(String),
    /// One line of worker output.
    Message(String),
}

impl BridgeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::Endpoint(_) => "endpoint",
            BridgeEvent::Message(_) => "message",
        }
    }

    pub fn data(&self) -> &str {
        match self {
            BridgeEvent::Endpoint(data) | BridgeEvent::Message(data) => data,
        }
    }
}

#[derive(Debug)]
pub struct OpenedSession {
    pub session_id: String,
    /// Closing this receiver ends the session.
    pub events: mpsc::Receiver<BridgeEvent>,
}

pub struct ProcessBridge {
    settings: BridgeSettings,
    registry: Arc<SessionRegistry>,
}

impl ProcessBridge {
    pub fn new(settings: BridgeSettings) -> Self {
        Self {
            settings,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.registry.get(session_id).map(|h| h.current_state())
    }

    /// Spawn a worker and start relaying it.
    pub fn open_session(&self, env: WorkerEnvironment) -> Result<OpenedSession, BridgeError> {
        let session_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("session", session_id = %session_id);
        let _enter = span.enter();

        let mut child = self.spawn(&env)?;
        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                return Err(BridgeError::Spawn {
                    command: self.settings.command.clone(),
                    source: std::io::Error::other("worker stdio was not captured"),
                })
            }
        };

        let (events_tx, events_rx) = mpsc::channel(self.settings.channel_capacity);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionState::Starting);
        let state = Arc::new(state_tx);
        let cancel = CancellationToken::new();
        let abandon = CancellationToken::new();

        self.registry.insert(SessionHandle {
            id: session_id.clone(),
            input: input_tx,
            state: state.clone(),
            cancel: cancel.clone(),
            created_at: Utc::now(),
        });

        let endpoint = format!("{}?sessionId={}", self.settings.submit_path, session_id);
        if events_tx.try_send(BridgeEvent::Endpoint(endpoint)).is_err() {
            tracing::warn!("Could not queue endpoint event");
        }
        state.send_replace(SessionState::Streaming);

        let relay = tokio::spawn(relay_stdout(
            session_id.clone(),
            stdout,
            events_tx.clone(),
            abandon.clone(),
        ));
        tokio::spawn(log_stderr(session_id.clone(), stderr));
        tokio::spawn(write_stdin(
            session_id.clone(),
            stdin,
            input_rx,
            cancel.clone(),
        ));
        tokio::spawn(supervise(Supervision {
            session_id: session_id.clone(),
            registry: self.registry.clone(),
            child,
            events: events_tx,
            relay,
            abandon,
            state,
            cancel,
        }));

        tracing::info!(
            command = %self.settings.command,
            active_sessions = self.registry.len(),
            "Session opened"
        );

        Ok(OpenedSession {
            session_id,
            events: events_rx,
        })
    }

    /// Queue one message for the worker's stdin.
    pub fn submit_input(&self, session_id: &str, payload: String) -> Result<(), BridgeError> {
        let handle = self
            .registry
            .get(session_id)
            .filter(|h| h.current_state() != SessionState::Closed)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;

        handle
            .input
            .send(payload)
            .map_err(|_| BridgeError::SessionNotFound(session_id.to_string()))
    }

    /// Tear down a session. Unknown or already closed ids are ignored.
    pub fn close_session(&self, session_id: &str) {
        if let Some(handle) = self.registry.get(session_id) {
            tracing::debug!(session_id = %session_id, "Closing session");
            handle.cancel.cancel();
        }
    }

    /// Cancel every live session.
    pub fn shutdown(&self) {
        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            tracing::info!(sessions = cancelled, "Shutting down bridge sessions");
        }
    }

    fn spawn(&self, env: &WorkerEnvironment) -> Result<Child, BridgeError> {
        let mut command = Command::new(&self.settings.command);
        command
            .args(&self.settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !self.settings.inherit_env {
            command.env_clear();
            if let Some(path) = std::env::var_os("PATH") {
                command.env("PATH", path);
            }
        }
        command.envs(env.iter());

        if let Some(dir) = &self.settings.working_dir {
            command.current_dir(dir);
        }

        command.spawn().map_err(|source| {
            tracing::error!(command = %self.settings.command, error = %source, "Failed to spawn worker");
            BridgeError::Spawn {
                command: self.settings.command.clone(),
                source,
            }
        })
    }
}

/// Forward every stdout line as a `message` event. Once `abandon` fires the
/// relay stops and returns how many lines it dropped.
async fn relay_stdout<R>(
    session_id: String,
    stdout: R,
    events: mpsc::Sender<BridgeEvent>,
    abandon: CancellationToken,
) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout);
    let mut raw_buf = Vec::new();

    loop {
        raw_buf.clear();
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut raw_buf) => read,
            _ = abandon.cancelled() => return count_remaining(&mut reader).await,
        };
        match read {
            Ok(0) => {
                tracing::debug!(session_id = %session_id, "Worker stdout closed");
                return 0;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to read worker stdout");
                return 0;
            }
        }

        let line = event_line(&raw_buf);
        tokio::select! {
            sent = events.send(BridgeEvent::Message(line)) => {
                if sent.is_err() {
                    tracing::debug!(session_id = %session_id, "Client gone, stopping relay");
                    return 0;
                }
            }
            _ = abandon.cancelled() => return 1 + count_remaining(&mut reader).await,
        }
    }
}

// Lines still buffered or in the pipe, bounded in time in case another
// process holds the write end open.
async fn count_remaining<R>(reader: &mut BufReader<R>) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut count = 0;
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(ABANDON_COUNT_LIMIT, async {
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => count += 1,
            }
        }
    })
    .await;
    count
}

// Line ending stripped. An SSE field cannot hold a carriage return, so an
// embedded one becomes a data line break.
fn event_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).replace("\r\n", "\n").replace('\r', "\n")
}

async fn log_stderr<R>(session_id: String, stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(session_id = %session_id, "worker: {}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Stopped reading worker stderr");
                break;
            }
        }
    }
}

/// Write queued payloads in order, one per line. A failed write ends the
/// session.
async fn write_stdin(
    session_id: String,
    mut stdin: ChildStdin,
    mut input: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            payload = input.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        let result = async {
            stdin.write_all(payload.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to write to worker stdin");
            cancel.cancel();
            break;
        }
    }
}

struct Supervision {
    session_id: String,
    registry: Arc<SessionRegistry>,
    child: Child,
    events: mpsc::Sender<BridgeEvent>,
    relay: JoinHandle<usize>,
    abandon: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
}

/// Wait for exit, disconnect or cancellation, then clean up the session.
async fn supervise(supervision: Supervision) {
    let Supervision {
        session_id,
        registry,
        mut child,
        events,
        mut relay,
        abandon,
        state,
        cancel,
    } = supervision;

    let exit = tokio::select! {
        status = child.wait() => Some(status),
        _ = events.closed() => {
            tracing::info!(session_id = %session_id, "Client disconnected");
            None
        }
        _ = cancel.cancelled() => {
            tracing::info!(session_id = %session_id, "Session cancelled");
            None
        }
    };

    registry.remove(&session_id);
    state.send_replace(SessionState::Closed);

    match exit {
        Some(status) => {
            match status {
                Ok(status) => tracing::info!(session_id = %session_id, %status, "Worker exited"),
                Err(e) => tracing::warn!(session_id = %session_id, error = %e, "Failed to wait for worker"),
            }
            // Let output already written by the worker reach the client
            if tokio::time::timeout(DRAIN_GRACE, &mut relay).await.is_err() {
                abandon.cancel();
                match tokio::time::timeout(ABANDON_COUNT_LIMIT * 2, &mut relay).await {
                    Ok(Ok(dropped)) => tracing::warn!(
                        session_id = %session_id,
                        dropped_lines = dropped,
                        "Client did not drain worker output in time, dropping the rest"
                    ),
                    _ => {
                        relay.abort();
                        tracing::warn!(
                            session_id = %session_id,
                            "Client did not drain worker output in time, relay aborted"
                        );
                    }
                }
            }
        }
        None => {
            relay.abort();
            if let Err(e) = child.kill().await {
                tracing::debug!(session_id = %session_id, error = %e, "Worker already gone");
            }
        }
    }

    cancel.cancel();
    drop(events);

    tracing::info!(
        session_id = %session_id,
        active_sessions = registry.len(),
        "Session closed"
    );
}
