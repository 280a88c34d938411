//! Test fixtures for piece cache testing.

use super::FilePieceCache;

/// Opens a file piece cache inside a fresh temporary download root.
///
/// Returns the temp dir guard alongside the cache; dropping it removes
/// everything.
///
/// # Panics
///
/// Panics if the temporary directory or cache cannot be created.
/// This is acceptable in test fixtures where failures indicate environment issues.
pub async fn create_temp_cache() -> (tempfile::TempDir, FilePieceCache) {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = FilePieceCache::open(FilePieceCache::default_path(temp_dir.path()))
        .await
        .unwrap();
    (temp_dir, cache)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_cache_lives_under_download_root() {
        let (temp_dir, cache) = create_temp_cache().await;

        assert!(cache.root().starts_with(temp_dir.path()));
        assert!(cache.root().ends_with("torrents.db"));
        assert!(cache.root().is_dir());
    }
}
