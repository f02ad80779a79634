//! Peer discovery across every announce URL of a manifest

use std::net::SocketAddr;

use super::{AnnounceRequest, HttpTrackerClient, TrackerClient};
use crate::config::NetworkConfig;
use crate::torrent::{Manifest, PeerId, TorrentError};

/// Tries announce URLs in order and returns the first usable peer list.
pub struct TrackerManager {
    network_config: NetworkConfig,
}

impl TrackerManager {
    pub fn new(network_config: NetworkConfig) -> Self {
        Self { network_config }
    }

    /// Announces to each tracker in manifest order until one answers.
    ///
    /// Non-HTTP announce URLs are skipped. A tracker answering with an empty
    /// peer list still counts as an answer.
    ///
    /// # Errors
    ///
    /// - `TorrentError::NoPeersAvailable` - Manifest lists no usable tracker
    /// - Last tracker error if every tracker failed
    pub async fn discover_peers(
        &self,
        manifest: &Manifest,
        peer_id: PeerId,
        port: u16,
    ) -> Result<Vec<SocketAddr>, TorrentError> {
        let request = AnnounceRequest {
            info_hash: manifest.info_hash,
            peer_id: *peer_id.as_bytes(),
            port,
            uploaded: 0,
            downloaded: 0,
            left: manifest.total_length,
        };

        let mut last_error = None;
        for url in &manifest.announce_urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                tracing::debug!(tracker = %url, "Skipping unsupported tracker scheme");
                continue;
            }

            let client = match HttpTrackerClient::new(url.clone(), &self.network_config) {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(tracker = %url, error = %e, "Invalid tracker URL");
                    last_error = Some(e);
                    continue;
                }
            };

            match client.announce(request.clone()).await {
                Ok(response) => {
                    tracing::info!(
                        tracker = %client.tracker_url(),
                        peers = response.peers.len(),
                        seeders = response.complete,
                        leechers = response.incomplete,
                        "Discovered peers"
                    );
                    return Ok(response.peers);
                }
                Err(e) => {
                    tracing::warn!(tracker = %url, error = %e, "Tracker failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(TorrentError::NoPeersAvailable))
    }
}
