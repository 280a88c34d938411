//! Best-effort removal of a dropped torrent's cached data.
//!
//! Failures here are logged and swallowed; the torrent is already gone from
//! the engine by the time cleanup runs.

use undertow_core::storage::PieceKey;
use undertow_core::{PieceCache, SessionStore, TorrentSession};

/// What a purge managed to remove.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub pieces_removed: usize,
    pub descriptor_removed: bool,
}

/// Deletes every cached piece of the session and its saved descriptor.
///
/// Pieces go in one transactional batch; keys already absent count as
/// removed. Sessions that never resolved have nothing to purge.
pub async fn purge_torrent(
    cache: &dyn PieceCache,
    store: &SessionStore,
    session: &TorrentSession,
) -> PurgeReport {
    let mut report = PurgeReport::default();
    let Some(metainfo) = session.metainfo() else {
        tracing::warn!(info_hash = %session.info_hash(), "No metadata, skipping data deletion");
        return report;
    };

    let keys: Vec<PieceKey> = metainfo.piece_hashes.iter().map(PieceKey::from_hash).collect();
    match cache.delete_many(&keys).await {
        Ok(removed) => {
            tracing::info!(info_hash = %metainfo.info_hash, pieces = keys.len(), removed, "Deleted cached pieces");
            report.pieces_removed = removed;
        }
        Err(e) => {
            tracing::error!(info_hash = %metainfo.info_hash, error = %e, "Failed to delete cached pieces");
        }
    }

    match store.remove(&metainfo.name).await {
        Ok(removed) => report.descriptor_removed = removed,
        Err(e) => {
            tracing::error!(info_hash = %metainfo.info_hash, error = %e, "Failed to delete saved descriptor");
        }
    }
    report
}
