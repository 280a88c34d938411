//! In-memory piece cache for tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{PieceCache, PieceKey, StorageError};

/// Piece cache holding everything in a map.
///
/// `fail_delete_of` injects a hard failure for one key so callers can
/// check that a failed batch leaves every piece in place.
#[derive(Debug, Default)]
pub struct MemoryPieceCache {
    pieces: Mutex<HashMap<PieceKey, Bytes>>,
    failing: Mutex<HashSet<PieceKey>>,
    closed: Mutex<bool>,
}

impl MemoryPieceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_delete_of(&self, key: PieceKey) {
        self.failing.lock().insert(key);
    }

    pub fn len(&self) -> usize {
        self.pieces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if *self.closed.lock() {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PieceCache for MemoryPieceCache {
    async fn get(&self, key: &PieceKey) -> Result<Option<Bytes>, StorageError> {
        self.ensure_open()?;
        Ok(self.pieces.lock().get(key).cloned())
    }

    async fn put(&self, key: &PieceKey, data: Bytes) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.pieces.lock().insert(key.clone(), data);
        Ok(())
    }

    async fn contains(&self, key: &PieceKey) -> Result<bool, StorageError> {
        self.ensure_open()?;
        Ok(self.pieces.lock().contains_key(key))
    }

    async fn delete_many(&self, keys: &[PieceKey]) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let failing = self.failing.lock();
        let mut pieces = self.pieces.lock();
        if let Some(key) = keys.iter().find(|key| failing.contains(*key)) {
            return Err(StorageError::PieceDelete {
                key: key.clone(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(keys.iter().filter(|key| pieces.remove(*key).is_some()).count())
    }

    async fn close(&self) -> Result<(), StorageError> {
        *self.closed.lock() = true;
        Ok(())
    }
}
