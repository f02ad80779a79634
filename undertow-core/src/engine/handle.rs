//! Handle for communicating with the swarm actor.

use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::commands::{PeerSummary, SwarmCommand, SwarmProgress};
use crate::torrent::TorrentError;

/// Cloneable handle to a running swarm.
///
/// Progress is read from a watch channel without a round trip through the
/// actor; everything else is a command with a oneshot reply.
#[derive(Clone)]
pub struct SwarmHandle {
    sender: mpsc::Sender<SwarmCommand>,
    progress: watch::Receiver<SwarmProgress>,
    cancel: CancellationToken,
    listen_addr: SocketAddr,
}

impl SwarmHandle {
    pub(super) fn new(
        sender: mpsc::Sender<SwarmCommand>,
        progress: watch::Receiver<SwarmProgress>,
        cancel: CancellationToken,
        listen_addr: SocketAddr,
    ) -> Self {
        Self {
            sender,
            progress,
            cancel,
            listen_addr,
        }
    }

    /// Latest published progress.
    pub fn progress(&self) -> SwarmProgress {
        self.progress.borrow().clone()
    }

    /// Receiver notified on every progress change.
    pub fn subscribe(&self) -> watch::Receiver<SwarmProgress> {
        self.progress.clone()
    }

    /// Address the inbound listener is bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Waits until every piece is committed and reassembly has run.
    ///
    /// # Errors
    /// - `TorrentError::EngineShutdown` - Swarm stopped before completing
    pub async fn wait_for_completion(&self) -> Result<SwarmProgress, TorrentError> {
        let mut progress = self.progress.clone();
        let done = progress
            .wait_for(|p| p.complete)
            .await
            .map_err(|_| TorrentError::EngineShutdown)?;
        Ok(done.clone())
    }

    /// Dials an additional peer.
    ///
    /// # Errors
    /// - `TorrentError::EngineShutdown` - Swarm actor has stopped
    pub async fn add_peer(&self, address: SocketAddr) -> Result<(), TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.send(SwarmCommand::AddPeer { address, responder })
            .await?;
        rx.await.map_err(|_| TorrentError::EngineShutdown)
    }

    /// Stops serving block requests from `address` and sends it `Choke`.
    ///
    /// # Errors
    /// - `TorrentError::PeerConnectionError` - Peer is not connected
    /// - `TorrentError::EngineShutdown` - Swarm actor has stopped
    pub async fn choke_peer(&self, address: SocketAddr) -> Result<(), TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.send(SwarmCommand::ChokePeer { address, responder })
            .await?;
        rx.await.map_err(|_| TorrentError::EngineShutdown)?
    }

    /// Resumes serving `address` and sends it `Unchoke`.
    ///
    /// # Errors
    /// - `TorrentError::PeerConnectionError` - Peer is not connected
    /// - `TorrentError::EngineShutdown` - Swarm actor has stopped
    pub async fn unchoke_peer(&self, address: SocketAddr) -> Result<(), TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.send(SwarmCommand::UnchokePeer { address, responder })
            .await?;
        rx.await.map_err(|_| TorrentError::EngineShutdown)?
    }

    /// # Errors
    /// - `TorrentError::EngineShutdown` - Swarm actor has stopped
    pub async fn connected_peers(&self) -> Result<Vec<PeerSummary>, TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.send(SwarmCommand::ConnectedPeers { responder }).await?;
        rx.await.map_err(|_| TorrentError::EngineShutdown)
    }

    /// Stops the actor, the listener and every worker.
    ///
    /// # Errors
    /// - `TorrentError::EngineShutdown` - Swarm actor had already stopped
    pub async fn shutdown(&self) -> Result<(), TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.send(SwarmCommand::Shutdown { responder }).await?;
        rx.await.map_err(|_| TorrentError::EngineShutdown)
    }

    /// Resolves once the swarm has been cancelled for any reason.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    async fn send(&self, command: SwarmCommand) -> Result<(), TorrentError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| TorrentError::EngineShutdown)
    }
}
