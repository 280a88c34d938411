//! Undertow Core - torrent sessions exposed as streamable media
//!
//! This crate provides the building blocks the streaming gateway composes:
//! torrent metadata and magnet parsing, the torrent engine boundary with its
//! default web-seed engine, the piece cache, identifier classification,
//! session persistence, local address resolution and playlist projection.

pub mod address;
pub mod config;
pub mod engine;
pub mod ingest;
pub mod persistence;
pub mod projection;
pub mod storage;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use address::{AddressError, AddressPreference, LocalAddressResolver};
pub use config::{GatewayConfig, SupervisorConfig, UndertowConfig};
pub use engine::{Engine, ReadOptions, TorrentEngine, TorrentSession};
pub use ingest::{IngestError, Ingestor, TorrentIdentifier};
pub use persistence::{PersistenceError, SessionStore};
pub use projection::{FileEntry, Projector, ProjectionError, TorrentSummary, build_playlist};
pub use storage::{FilePieceCache, PieceCache, PieceKey, StorageError};
pub use torrent::{InfoHash, Metainfo, PieceIndex, TorrentError};
