//! Error types for the streaming gateway.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use undertow_core::{AddressError, IngestError, ProjectionError, StorageError, TorrentError};

/// Errors returned to HTTP callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid torrent identifier: {input}")]
    InvalidTorrentIdentifier { input: String },

    #[error("Failed to fetch torrent from {url}: {reason}")]
    RemoteFetch { url: String, reason: String },

    #[error("Invalid torrent: {reason}")]
    InvalidTorrent { reason: String },

    #[error("Torrent not found: {info_hash}")]
    TorrentNotFound { info_hash: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to resolve local address: {0}")]
    Address(#[from] AddressError),

    #[error("Internal server error: {reason}")]
    Internal { reason: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidTorrentIdentifier { .. }
            | ApiError::RemoteFetch { .. }
            | ApiError::InvalidTorrent { .. } => StatusCode::BAD_REQUEST,
            ApiError::TorrentNotFound { .. } | ApiError::FileNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Address(_) | ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TorrentError> for ApiError {
    fn from(error: TorrentError) -> Self {
        match error {
            TorrentError::InvalidTorrentFile { .. }
            | TorrentError::InvalidMagnetLink { .. }
            | TorrentError::InvalidInfoHash { .. } => ApiError::InvalidTorrent {
                reason: error.to_string(),
            },
            TorrentError::TorrentNotFound { info_hash } => ApiError::TorrentNotFound {
                info_hash: info_hash.to_string(),
            },
            TorrentError::FileNotFound { index, .. } => ApiError::FileNotFound {
                path: format!("#{index}"),
            },
            other => ApiError::Internal {
                reason: other.to_string(),
            },
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::InvalidTorrentIdentifier { input } => ApiError::InvalidTorrentIdentifier { input },
            IngestError::RemoteFetch { url, reason } => ApiError::RemoteFetch { url, reason },
            // Unreadable descriptor paths are the caller's input problem
            IngestError::Torrent(TorrentError::Io(e)) => ApiError::InvalidTorrent {
                reason: e.to_string(),
            },
            IngestError::Torrent(e) => e.into(),
        }
    }
}

impl From<ProjectionError> for ApiError {
    fn from(error: ProjectionError) -> Self {
        match error {
            ProjectionError::Address(e) => ApiError::Address(e),
            ProjectionError::Torrent(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

/// Errors that stop the gateway process.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("A gateway is already listening on port {port}")]
    AlreadyRunning { port: u16 },

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Torrent(#[from] TorrentError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}
