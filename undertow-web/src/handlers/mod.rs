//! HTTP request handlers organized by functionality

pub mod control;
pub mod range;
pub mod stream;
pub mod torrents;

use std::sync::Arc;

use undertow_core::{InfoHash, TorrentSession};

use crate::error::ApiError;
use crate::server::AppState;

// Re-export handler functions
pub use control::{debug_engine, exit};
pub use range::{ContentInfo, ContentOutcome, build_content_response, evaluate, parse_range_header};
pub use stream::stream_file;
pub use torrents::{DeleteQuery, add_torrent, delete_torrent, get_torrent, list_torrents};

/// Looks up an active session by its hex info-hash.
///
/// Malformed hashes are reported as unknown torrents.
///
/// # Errors
///
/// - `ApiError::TorrentNotFound` - No active session with this hash
pub fn find_session(state: &AppState, info_hash: &str) -> Result<Arc<TorrentSession>, ApiError> {
    let not_found = || ApiError::TorrentNotFound {
        info_hash: info_hash.to_string(),
    };
    let hash = InfoHash::from_hex(info_hash).map_err(|_| not_found())?;
    state.engine.session(&hash).ok_or_else(not_found)
}
