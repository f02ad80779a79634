//! Core types for tracker communication

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::torrent::{InfoHash, TorrentError};

/// Tracker announce request.
///
/// Reports transfer statistics and asks the tracker for a peer list.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Identity hash of the content being announced
    pub info_hash: InfoHash,
    /// Client's 20-byte identifier
    pub peer_id: [u8; 20],
    /// TCP port accepting inbound peers
    pub port: u16,
    /// Total bytes uploaded to other peers
    pub uploaded: u64,
    /// Total bytes downloaded from other peers
    pub downloaded: u64,
    /// Bytes remaining to download (0 for seeders)
    pub left: u64,
}

/// Tracker announce response.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds until the next announce should be sent
    pub interval: u32,
    /// Number of seeders in the swarm, if reported
    pub complete: u32,
    /// Number of leechers in the swarm, if reported
    pub incomplete: u32,
    /// Peer addresses for connection attempts
    pub peers: Vec<SocketAddr>,
}

/// Tracker communication interface.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Announces client presence and retrieves a peer list.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TrackerConnectionFailed` - Network or HTTP error
    /// - `TorrentError::TrackerRejected` - Tracker answered with a failure reason
    /// - `TorrentError::ProtocolError` - Invalid tracker response format
    async fn announce(&self, request: AnnounceRequest) -> Result<AnnounceResponse, TorrentError>;

    /// Returns tracker URL for logging purposes.
    fn tracker_url(&self) -> &str;
}
