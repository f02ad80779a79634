//! Inbound connection acceptor.

use std::net::SocketAddr;

use tokio::net::TcpListener;

use super::TorrentError;
use super::worker::{PeerWorker, WorkerContext};

/// Accepts inbound peers and runs an inbound worker for each.
pub struct PeerListener {
    listener: TcpListener,
}

impl PeerListener {
    /// Binds on all interfaces. Port 0 picks an ephemeral port.
    ///
    /// # Errors
    /// - `TorrentError::Io` - Socket could not be bound
    pub async fn bind(port: u16) -> Result<Self, TorrentError> {
        Self::bind_addr(SocketAddr::from(([0, 0, 0, 0], port))).await
    }

    /// Binds on a specific address.
    ///
    /// # Errors
    /// - `TorrentError::Io` - Socket could not be bound
    pub async fn bind_addr(address: SocketAddr) -> Result<Self, TorrentError> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener })
    }

    /// # Errors
    /// - `TorrentError::Io` - Local address could not be queried
    pub fn local_addr(&self) -> Result<SocketAddr, TorrentError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts until the swarm is cancelled.
    ///
    /// Handshake failures only end that connection's task.
    pub async fn run(self, context: WorkerContext) {
        let cancel = context.cancel.clone();
        if let Ok(local) = self.listener.local_addr() {
            tracing::info!(address = %local, "Accepting inbound peers");
        }

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, address) = match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            tracing::debug!(peer = %address, "Inbound connection");
            let context = context.clone();
            tokio::spawn(async move {
                match PeerWorker::accept(stream, address, context).await {
                    Ok(worker) => worker.run().await,
                    Err(e) => tracing::warn!(
                        peer = %address,
                        category = ?e.category(),
                        error = %e,
                        "Inbound handshake failed"
                    ),
                }
            });
        }

        tracing::debug!("Listener stopped");
    }
}
