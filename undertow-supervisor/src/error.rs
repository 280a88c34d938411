//! Error types for the supervisor.

use std::path::PathBuf;

/// Errors from talking to the gateway or driving the player.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Gateway at {url} unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Gateway returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid gateway response: {reason}")]
    InvalidResponse { reason: String },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Player(#[from] PlayerError),
}

/// Errors from starting the gateway process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from player control.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Failed to connect to player socket {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Player command {command} failed: {error}")]
    Command { command: String, error: String },

    #[error("Player IPC is not supported on this platform")]
    Unsupported,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid player reply: {0}")]
    Reply(#[from] serde_json::Error),
}
