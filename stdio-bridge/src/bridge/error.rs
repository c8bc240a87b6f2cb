use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to start worker `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}
