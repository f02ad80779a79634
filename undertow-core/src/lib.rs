//! Undertow Core - peer wire protocol engine and piece exchange scheduler
//!
//! This crate provides the building blocks for a peer-to-peer file transfer
//! client: the binary wire codec and handshake, per-peer download workers,
//! the shared piece work queue, the upload path, and the orchestrator that
//! commits verified pieces and keeps every peer informed.

pub mod config;
pub mod engine;
pub mod storage;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::UndertowConfig;
pub use engine::{SwarmHandle, SwarmProgress, SwarmSetup, spawn_swarm};
pub use storage::StorageError;
pub use torrent::{Manifest, TorrentError};

/// Errors that can bubble up from any Undertow subsystem.
///
/// High-level error types representing failures in core functionality.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UndertowError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            UndertowError::Torrent(e) => match e {
                TorrentError::InvalidTorrentFile { reason } => {
                    format!("Invalid torrent file: {reason}")
                }
                TorrentError::TrackerConnectionFailed { url } => {
                    format!("Could not connect to tracker: {url}")
                }
                TorrentError::NoPeersAvailable => "No peers available for download".to_string(),
                _ => "Download error occurred".to_string(),
            },
            UndertowError::Storage(_) => "Storage error occurred".to_string(),
            UndertowError::Configuration { reason } => format!("Configuration error: {reason}"),
            UndertowError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            UndertowError::Configuration { .. }
                | UndertowError::Torrent(TorrentError::InvalidTorrentFile { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, UndertowError>;
