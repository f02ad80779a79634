//! Peer wire protocol and piece exchange

pub mod bitfield;
pub mod listener;
pub mod manifest;
pub mod parsing;
pub mod protocol;
pub mod tracker;
pub mod upload;
pub mod verify;
pub mod work_queue;
pub mod worker;

use std::fmt;
use std::net::SocketAddr;

pub use bitfield::{PieceBitfield, ProgressBitfield};
pub use listener::PeerListener;
pub use manifest::{Manifest, ManifestFile};
pub use parsing::BencodeParser;
pub use protocol::{PeerHandshake, PeerId, PeerMessage};
pub use tracker::{AnnounceRequest, AnnounceResponse, HttpTrackerClient, TrackerClient, TrackerManager};
pub use upload::{UploadHandler, UploadRequest};
pub use verify::verify_piece;
pub use work_queue::{PieceJob, PieceWorkQueue};
pub use worker::{PeerEvent, PeerWorker, PieceResult, PieceTransferProgress, WorkerContext};

use crate::storage::StorageError;

/// SHA-1 hash identifying the shared content.
///
/// 20-byte SHA-1 hash of the info dictionary from a torrent file. Both sides
/// of a handshake must present the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Zero-based index of a piece within the shared content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the index as a usize for slice arithmetic.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure classes that decide how an error is recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Socket failure; requeue in-flight work and stop the affected worker
    Transport,
    /// Malformed or mismatched handshake/frame; close the connection
    Protocol,
    /// Piece content hash mismatch; requeue without penalising the peer
    Verification,
    /// Malformed or out-of-range inbound request; drop it, keep the connection
    Validation,
    /// Local storage failure; fatal at startup
    Resource,
}

/// Errors that can occur during piece exchange.
///
/// Covers manifest parsing, tracker discovery, wire protocol failures,
/// data verification and inbound request validation.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Failed to parse torrent file: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Tracker connection failed: {url}")]
    TrackerConnectionFailed { url: String },

    #[error("Tracker rejected announce: {reason}")]
    TrackerRejected { reason: String },

    #[error("Piece {index} hash mismatch")]
    PieceHashMismatch { index: PieceIndex },

    #[error("Peer connection error: {reason}")]
    PeerConnectionError { reason: String },

    #[error("Peer {address} timed out: {operation}")]
    PeerTimeout {
        address: SocketAddr,
        operation: &'static str,
    },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Invalid request from {address}: {reason}")]
    InvalidRequest { address: SocketAddr, reason: String },

    #[error("Piece work queue is full ({capacity} jobs)")]
    WorkQueueFull { capacity: usize },

    #[error("Storage error")]
    Storage(#[from] StorageError),

    #[error("No peers available for torrent")]
    NoPeersAvailable,

    #[error("Swarm has shut down")]
    EngineShutdown,

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error")]
    UrlParsing(#[from] url::ParseError),

    #[error("HTTP error")]
    Http(#[from] reqwest::Error),
}

impl TorrentError {
    /// Classifies the error for recovery decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            TorrentError::PeerConnectionError { .. }
            | TorrentError::PeerTimeout { .. }
            | TorrentError::Io(_) => ErrorCategory::Transport,
            TorrentError::ProtocolError { .. } => ErrorCategory::Protocol,
            TorrentError::PieceHashMismatch { .. } => ErrorCategory::Verification,
            TorrentError::InvalidRequest { .. } => ErrorCategory::Validation,
            TorrentError::Storage(_) | TorrentError::WorkQueueFull { .. } => {
                ErrorCategory::Resource
            }
            TorrentError::InvalidTorrentFile { .. }
            | TorrentError::TrackerConnectionFailed { .. }
            | TorrentError::TrackerRejected { .. }
            | TorrentError::NoPeersAvailable
            | TorrentError::EngineShutdown
            | TorrentError::UrlParsing(_)
            | TorrentError::Http(_) => ErrorCategory::Resource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hash_display() {
        let hash = [
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef, 0x01, 0x23, 0x45, 0x67,
        ];
        let info_hash = InfoHash::new(hash);
        assert_eq!(
            info_hash.to_string(),
            "0123456789abcdef0123456789abcdef01234567"
        );
    }

    #[test]
    fn test_piece_index_ordering() {
        let piece1 = PieceIndex::new(5);
        let piece2 = PieceIndex::new(10);
        assert!(piece1 < piece2);
        assert_eq!(piece1.as_u32(), 5);
        assert_eq!(piece2.as_usize(), 10);
    }

    #[test]
    fn test_error_categories() {
        let address: SocketAddr = "127.0.0.1:6881".parse().unwrap();

        assert_eq!(
            TorrentError::PeerTimeout {
                address,
                operation: "piece transfer"
            }
            .category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            TorrentError::ProtocolError {
                message: "bad".to_string()
            }
            .category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            TorrentError::PieceHashMismatch {
                index: PieceIndex::new(1)
            }
            .category(),
            ErrorCategory::Verification
        );
        assert_eq!(
            TorrentError::InvalidRequest {
                address,
                reason: "out of range".to_string()
            }
            .category(),
            ErrorCategory::Validation
        );
    }
}
