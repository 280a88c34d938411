//! Lifecycle and diagnostics handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::server::AppState;

/// `GET /exit`: acknowledges, then lets the server drain and stop.
pub async fn exit(State(state): State<AppState>) -> (StatusCode, &'static str) {
    tracing::info!("Exit requested over HTTP");
    state.request_shutdown();
    (StatusCode::ACCEPTED, "Shutdown initiated")
}

#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub info_hash: String,
    pub name: String,
    pub resolved: bool,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EngineSnapshot {
    pub sessions: Vec<SessionSnapshot>,
    pub port: u16,
    pub download_dir: String,
    pub readahead: i64,
    pub responsive: bool,
    pub max_conns_per_torrent: usize,
    pub resume_torrents: bool,
    pub delete_data_on_drop: bool,
}

/// `GET /debug/engine`: sessions and runtime settings, mounted with profiling on.
pub async fn debug_engine(State(state): State<AppState>) -> Json<EngineSnapshot> {
    let mut sessions: Vec<SessionSnapshot> = state
        .engine
        .sessions()
        .iter()
        .map(|session| SessionSnapshot {
            info_hash: session.info_hash().to_string(),
            name: session.name(),
            resolved: session.is_resolved(),
            added_at: session.added_at(),
        })
        .collect();
    sessions.sort_by(|a, b| a.added_at.cmp(&b.added_at));

    let config = &state.config;
    Json(EngineSnapshot {
        sessions,
        port: config.port,
        download_dir: config.download_dir.display().to_string(),
        readahead: config.readahead,
        responsive: config.responsive,
        max_conns_per_torrent: config.max_conns_per_torrent,
        resume_torrents: config.resume_torrents,
        delete_data_on_drop: config.delete_data_on_drop,
    })
}
