//! Undertow Web - streaming gateway HTTP API
//!
//! Exposes torrent sessions to media players: add torrents, list them with
//! player-reachable stream URLs and playlists, stream individual files with
//! range and conditional request support, and delete torrents.

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]

pub mod cleanup;
pub mod error;
pub mod handlers;
pub mod server;

// Re-export main types
pub use error::{ApiError, GatewayError};
pub use server::{AppState, gateway_running, router, run_server, serve};
