//! Command definitions for the swarm actor.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::sync::oneshot;

use crate::torrent::TorrentError;
use crate::torrent::protocol::ConnectionDirection;

/// Commands that can be sent to the swarm actor.
///
/// Each command carries a response channel so callers never touch actor
/// state directly.
pub enum SwarmCommand {
    /// Dial an additional peer.
    AddPeer {
        address: SocketAddr,
        responder: oneshot::Sender<()>,
    },
    /// Stop serving a connected peer until it is unchoked again.
    ChokePeer {
        address: SocketAddr,
        responder: oneshot::Sender<Result<(), TorrentError>>,
    },
    /// Resume serving a connected peer.
    UnchokePeer {
        address: SocketAddr,
        responder: oneshot::Sender<Result<(), TorrentError>>,
    },
    /// List registered connections.
    ConnectedPeers {
        responder: oneshot::Sender<Vec<PeerSummary>>,
    },
    /// Stop every worker and the actor itself.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Registry entry as seen from outside the actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub address: SocketAddr,
    pub direction: ConnectionDirection,
    pub local_choking: bool,
}

/// Swarm progress published after every committed piece.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwarmProgress {
    pub completed_pieces: u32,
    pub total_pieces: u32,
    pub connected_peers: usize,
    pub downloaded_bytes: u64,
    pub uploaded_bytes: u64,
    /// Every piece is verified and committed
    pub complete: bool,
    /// Where the file layout was written once reassembly succeeded
    pub output_root: Option<PathBuf>,
}

impl SwarmProgress {
    /// Fraction of pieces committed, in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        if self.total_pieces == 0 {
            return 1.0;
        }
        self.completed_pieces as f64 / self.total_pieces as f64
    }
}
