//! Piece cache for verified torrent piece data.
//!
//! Pieces are keyed by their SHA-1 hash rather than by torrent, so identical
//! pieces shared between torrents are stored once and a torrent re-added
//! after removal finds its data still in place.

pub mod file_cache;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
pub use file_cache::FilePieceCache;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryPieceCache;

/// Cache key of a piece: lowercase hex of its SHA-1 hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PieceKey(String);

impl PieceKey {
    pub fn from_hash(hash: &[u8; 20]) -> Self {
        Self(hex::encode(hash))
    }

    /// Parses a key from its hex form.
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidKey` - Not 40 hex characters
    pub fn parse(value: &str) -> Result<Self, StorageError> {
        let mut hash = [0u8; 20];
        hex::decode_to_slice(value, &mut hash).map_err(|_| StorageError::InvalidKey {
            key: value.to_string(),
        })?;
        Ok(Self::from_hash(&hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PieceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key-value store holding piece data.
///
/// A missing key is never an error: `get` returns `None` and `delete_many`
/// counts it as already deleted.
#[async_trait]
pub trait PieceCache: Send + Sync {
    /// Loads a piece if cached.
    ///
    /// # Errors
    ///
    /// - `StorageError::Closed` - Cache was closed
    /// - `StorageError::Io` - Backend read failed
    async fn get(&self, key: &PieceKey) -> Result<Option<Bytes>, StorageError>;

    /// Stores a verified piece, replacing any previous value.
    ///
    /// # Errors
    ///
    /// - `StorageError::Closed` - Cache was closed
    /// - `StorageError::Io` - Backend write failed
    async fn put(&self, key: &PieceKey, data: Bytes) -> Result<(), StorageError>;

    /// Checks whether a piece is cached.
    ///
    /// # Errors
    ///
    /// - `StorageError::Closed` - Cache was closed
    async fn contains(&self, key: &PieceKey) -> Result<bool, StorageError>;

    /// Removes a set of pieces as one transaction.
    ///
    /// Either every present key is removed or, on a hard failure, none are.
    /// Returns how many pieces were actually removed.
    ///
    /// # Errors
    ///
    /// - `StorageError::PieceDelete` - A removal failed and the batch was rolled back
    /// - `StorageError::Closed` - Cache was closed
    async fn delete_many(&self, keys: &[PieceKey]) -> Result<usize, StorageError>;

    /// Flushes and closes the cache. Later operations fail with `Closed`.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Flushing pending state failed
    async fn close(&self) -> Result<(), StorageError>;
}

/// Errors that occur during piece cache operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid piece key: {key}")]
    InvalidKey { key: String },

    #[error("Failed to delete piece {key}: {reason}")]
    PieceDelete { key: PieceKey, reason: String },

    #[error("Piece cache is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_key_from_hash_is_lowercase_hex() {
        let key = PieceKey::from_hash(&[0xab; 20]);
        assert_eq!(key.as_str(), "ab".repeat(20));
        assert_eq!(key.to_string(), key.as_str());
    }

    #[test]
    fn test_piece_key_parse_normalizes_case() {
        let key = PieceKey::parse(&"AB".repeat(20)).unwrap();
        assert_eq!(key, PieceKey::from_hash(&[0xab; 20]));
        assert!(PieceKey::parse("../etc/passwd").is_err());
    }
}
