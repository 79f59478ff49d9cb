//! Error types for the reconciliation steps.

use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by the injected host capabilities.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown relation {0}")]
    UnknownRelation(String),

    #[error("{operation} failed: {source}")]
    Io {
        operation: &'static str,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    Command { command: String, status: String },

    #[error("state file {} is unreadable: {source}", path.display())]
    State {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0}")]
    Refused(String),
}

/// Failure to render or install the collector configuration.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to encode agent config: {0}")]
    Encode(serde_yaml::Error),

    #[error("failed to decode agent config: {0}")]
    Decode(serde_yaml::Error),

    #[error("{operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("collector restart failed: {0}")]
    Restart(HostError),
}

/// Failure to publish relation data.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("relation {relation}: {source}")]
    Relation { relation: String, source: HostError },

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        source: serde_json::Error,
    },
}
