//! Per-connection peer worker.
//!
//! One worker drives one connection through handshake, the initial message
//! exchange and the download loop. It pulls jobs the remote peer can serve
//! from the shared queue, requests blocks one at a time, verifies assembled
//! pieces and emits them to the orchestrator. Inbound block requests are
//! forwarded to the upload path.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::bitfield::PieceBitfield;
use super::protocol::{
    ConnectionDirection, PeerHandshake, PeerId, PeerLink, PeerMessage, connect_with_backoff,
    establish_link,
};
use super::upload::UploadRequest;
use super::verify::verify_piece;
use super::work_queue::{PieceJob, PieceWorkQueue};
use super::{InfoHash, PieceIndex, TorrentError};
use crate::config::PeerConfig;

/// Verified piece produced exactly once per successful transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct PieceResult {
    pub index: PieceIndex,
    pub data: Bytes,
}

/// Connection lifecycle notifications sent to the orchestrator.
#[derive(Debug)]
pub enum PeerEvent {
    /// Handshake done; `outbound` reaches the connection's writer task.
    ///
    /// The orchestrator answers on `ready` with the local bitfield as of
    /// registration; every later commit reaches the peer as a `Have`.
    Connected {
        address: SocketAddr,
        direction: ConnectionDirection,
        outbound: mpsc::UnboundedSender<PeerMessage>,
        ready: oneshot::Sender<PieceBitfield>,
    },
    /// Worker stopped and its socket is closing
    Disconnected { address: SocketAddr },
}

/// Everything a worker shares with the rest of the swarm.
#[derive(Clone)]
pub struct WorkerContext {
    pub info_hash: InfoHash,
    pub local_peer_id: PeerId,
    pub piece_count: u32,
    pub config: PeerConfig,
    pub queue: Arc<PieceWorkQueue>,
    pub results: mpsc::UnboundedSender<PieceResult>,
    pub uploads: mpsc::Sender<UploadRequest>,
    pub events: mpsc::UnboundedSender<PeerEvent>,
    pub cancel: CancellationToken,
}

/// Accumulation state for the one piece a worker is transferring.
#[derive(Debug)]
pub struct PieceTransferProgress {
    pub index: PieceIndex,
    buffer: Vec<u8>,
    bytes_received: u32,
    length: u32,
}

impl PieceTransferProgress {
    pub fn new(job: &PieceJob) -> Self {
        Self {
            index: job.index,
            buffer: vec![0u8; job.length as usize],
            bytes_received: 0,
            length: job.length,
        }
    }

    /// Offset and length of the next block to request, `None` once complete.
    pub fn next_block(&self, block_size: u32) -> Option<(u32, u32)> {
        let remaining = self.length - self.bytes_received;
        (remaining > 0).then(|| (self.bytes_received, remaining.min(block_size)))
    }

    /// Appends a block if it continues the piece exactly where it left off.
    pub fn accept_block(&mut self, offset: u32, data: &[u8]) -> bool {
        let end = offset as u64 + data.len() as u64;
        if data.is_empty() || offset != self.bytes_received || end > self.length as u64 {
            return false;
        }

        self.buffer[offset as usize..end as usize].copy_from_slice(data);
        self.bytes_received = end as u32;
        true
    }

    pub fn bytes_received(&self) -> u32 {
        self.bytes_received
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_received == self.length
    }

    pub fn into_data(self) -> Bytes {
        Bytes::from(self.buffer)
    }
}

/// How a single piece transfer ended.
#[derive(Debug)]
enum TransferOutcome {
    Completed(PieceResult),
    HashMismatch,
    Choked,
    Cancelled,
}

/// Next unit of work picked by the download loop.
enum Step {
    Message(Option<Result<PeerMessage, TorrentError>>),
    Job(PieceJob),
    Cancelled,
}

/// Worker bound to one established connection.
pub struct PeerWorker {
    context: WorkerContext,
    link: PeerLink,
    remote_choking: bool,
    remote_pieces: PieceBitfield,
}

impl PeerWorker {
    /// Connects to `address` with timeout backoff and runs the handshake.
    ///
    /// # Errors
    /// - `TorrentError::PeerConnectionError` - Connect or handshake I/O failed
    /// - `TorrentError::ProtocolError` - Remote handshake rejected
    pub async fn connect(address: SocketAddr, context: WorkerContext) -> Result<Self, TorrentError> {
        let stream = connect_with_backoff(address, &context.config).await?;
        Self::establish(stream, address, ConnectionDirection::Outbound, context).await
    }

    /// Runs the handshake on an accepted inbound connection.
    ///
    /// # Errors
    /// - `TorrentError::PeerConnectionError` - Handshake I/O failed
    /// - `TorrentError::ProtocolError` - Remote handshake rejected
    pub async fn accept(
        stream: TcpStream,
        address: SocketAddr,
        context: WorkerContext,
    ) -> Result<Self, TorrentError> {
        Self::establish(stream, address, ConnectionDirection::Inbound, context).await
    }

    async fn establish(
        stream: TcpStream,
        address: SocketAddr,
        direction: ConnectionDirection,
        context: WorkerContext,
    ) -> Result<Self, TorrentError> {
        let handshake = PeerHandshake::new(context.info_hash, context.local_peer_id);
        let link = establish_link(
            stream,
            address,
            direction,
            &handshake,
            &context.config,
            &context.cancel,
        )
        .await?;

        let remote_pieces = PieceBitfield::new(context.piece_count);
        Ok(Self {
            context,
            link,
            remote_choking: true,
            remote_pieces,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.link.address
    }

    /// Runs the worker until the connection fails or the swarm is cancelled.
    ///
    /// Registers with the orchestrator first and always deregisters on exit.
    /// Errors are logged here and never propagate further.
    pub async fn run(mut self) {
        let address = self.link.address;
        let (ready, registered) = oneshot::channel();
        let event = PeerEvent::Connected {
            address,
            direction: self.link.direction,
            outbound: self.link.outbound.clone(),
            ready,
        };
        if self.context.events.send(event).is_err() {
            return;
        }

        let local = tokio::select! {
            _ = self.context.cancel.cancelled() => None,
            local = registered => local.ok(),
        };
        let Some(local) = local else {
            let _ = self
                .context
                .events
                .send(PeerEvent::Disconnected { address });
            return;
        };

        match self.exchange(local).await {
            Ok(()) => tracing::debug!(peer = %address, "Peer worker stopped"),
            Err(e) => tracing::warn!(
                peer = %address,
                category = ?e.category(),
                error = %e,
                "Peer worker failed"
            ),
        }

        let _ = self
            .context
            .events
            .send(PeerEvent::Disconnected { address });
    }

    async fn exchange(&mut self, local: PieceBitfield) -> Result<(), TorrentError> {
        if local.count() > 0 {
            self.send(PeerMessage::Bitfield {
                bitfield: local.to_bytes(),
            })?;
        }
        self.send(PeerMessage::Interested)?;
        self.send(PeerMessage::Unchoke)?;

        let Some(first) = self.recv(None).await? else {
            return Ok(());
        };
        self.handle_message(first).await?;

        loop {
            if self.remote_choking {
                // Woken directly by the next inbound frame, typically Unchoke
                let Some(message) = self.recv(None).await? else {
                    return Ok(());
                };
                self.handle_message(message).await?;
                continue;
            }

            let step = tokio::select! {
                biased;
                _ = self.context.cancel.cancelled() => Step::Cancelled,
                message = self.link.inbound.recv() => Step::Message(message),
                job = self.context.queue.next_job_for(&self.remote_pieces) => Step::Job(job),
            };

            match step {
                Step::Cancelled => return Ok(()),
                Step::Message(message) => {
                    let message = message.ok_or_else(connection_closed)??;
                    self.handle_message(message).await?;
                }
                Step::Job(job) => self.process_job(job).await?,
            }
        }
    }

    async fn process_job(&mut self, job: PieceJob) -> Result<(), TorrentError> {
        let address = self.link.address;
        tracing::debug!(peer = %address, piece = %job.index, length = job.length, "Starting piece transfer");

        let outcome = match self.download_piece(&job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.requeue(job);
                return Err(e);
            }
        };

        match outcome {
            TransferOutcome::Completed(result) => {
                tracing::debug!(peer = %address, piece = %job.index, "Piece verified");
                if self.context.results.send(result).is_err() {
                    self.requeue(job);
                    return Err(TorrentError::EngineShutdown);
                }
            }
            TransferOutcome::HashMismatch => {
                let e = TorrentError::PieceHashMismatch { index: job.index };
                tracing::warn!(
                    peer = %address,
                    category = ?e.category(),
                    error = %e,
                    "Piece failed verification, requeueing"
                );
                self.requeue(job);
            }
            TransferOutcome::Choked => {
                tracing::debug!(peer = %address, piece = %job.index, "Choked mid-transfer, requeueing");
                self.requeue(job);
            }
            TransferOutcome::Cancelled => self.requeue(job),
        }
        Ok(())
    }

    /// Requests blocks sequentially, one in flight, under a piece-wide deadline.
    async fn download_piece(&mut self, job: &PieceJob) -> Result<TransferOutcome, TorrentError> {
        let deadline = Instant::now() + self.context.config.piece_timeout;
        let mut progress = PieceTransferProgress::new(job);

        while let Some((offset, length)) = progress.next_block(self.context.config.block_size) {
            self.send(PeerMessage::Request {
                piece_index: job.index,
                offset,
                length,
            })?;

            loop {
                let Some(message) = self.recv(Some(deadline)).await? else {
                    return Ok(TransferOutcome::Cancelled);
                };

                match message {
                    PeerMessage::Piece {
                        piece_index,
                        offset,
                        data,
                    } if piece_index == job.index => {
                        if progress.accept_block(offset, &data) {
                            break;
                        }
                        tracing::debug!(
                            peer = %self.link.address,
                            piece = %piece_index,
                            offset,
                            "Discarding out-of-order block"
                        );
                    }
                    other => {
                        self.handle_message(other).await?;
                        if self.remote_choking {
                            return Ok(TransferOutcome::Choked);
                        }
                    }
                }
            }
        }

        let data = progress.into_data();
        if verify_piece(&data, &job.expected_hash) {
            Ok(TransferOutcome::Completed(PieceResult {
                index: job.index,
                data,
            }))
        } else {
            Ok(TransferOutcome::HashMismatch)
        }
    }

    /// Applies one inbound message outside of block accumulation.
    async fn handle_message(&mut self, message: PeerMessage) -> Result<(), TorrentError> {
        let address = self.link.address;

        match message {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => {
                tracing::debug!(peer = %address, "Peer choked us");
                self.remote_choking = true;
            }
            PeerMessage::Unchoke => {
                tracing::debug!(peer = %address, "Peer unchoked us");
                self.remote_choking = false;
            }
            PeerMessage::Interested | PeerMessage::NotInterested => {
                tracing::trace!(peer = %address, kind = message.kind(), "Peer interest changed");
            }
            PeerMessage::Have { piece_index } => {
                if piece_index.as_u32() >= self.context.piece_count {
                    return Err(TorrentError::ProtocolError {
                        message: format!("Have for piece {piece_index} out of range"),
                    });
                }
                self.remote_pieces.set_piece(piece_index);
            }
            PeerMessage::Bitfield { bitfield } => {
                self.remote_pieces = PieceBitfield::from_bytes(&bitfield, self.context.piece_count)?;
                tracing::debug!(
                    peer = %address,
                    pieces = self.remote_pieces.count(),
                    "Received peer bitfield"
                );
            }
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            } => {
                let request = UploadRequest {
                    peer: address,
                    piece_index,
                    offset,
                    length,
                };
                if self.context.uploads.send(request).await.is_err() {
                    return Err(TorrentError::EngineShutdown);
                }
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                ..
            } => {
                tracing::debug!(peer = %address, piece = %piece_index, offset, "Ignoring unrequested block");
            }
            PeerMessage::Cancel {
                piece_index,
                offset,
                ..
            } => {
                tracing::debug!(peer = %address, piece = %piece_index, offset, "Peer cancelled request");
            }
            PeerMessage::Unknown { id, payload } => {
                tracing::debug!(peer = %address, id, length = payload.len(), "Ignoring unknown message");
            }
        }
        Ok(())
    }

    /// Next inbound message; `None` on cancellation.
    async fn recv(&mut self, deadline: Option<Instant>) -> Result<Option<PeerMessage>, TorrentError> {
        let address = self.link.address;
        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.context.cancel.cancelled() => Ok(None),
            item = self.link.inbound.recv() => match item {
                Some(result) => result.map(Some),
                None => Err(connection_closed()),
            },
            _ = expired => Err(TorrentError::PeerTimeout {
                address,
                operation: "piece transfer",
            }),
        }
    }

    fn send(&self, message: PeerMessage) -> Result<(), TorrentError> {
        self.link
            .outbound
            .send(message)
            .map_err(|_| connection_closed())
    }

    fn requeue(&self, job: PieceJob) {
        if let Err(e) = self.context.queue.push(job) {
            tracing::error!(peer = %self.link.address, piece = %job.index, error = %e, "Failed to requeue job");
        }
    }
}

fn connection_closed() -> TorrentError {
    TorrentError::PeerConnectionError {
        reason: "Connection closed".to_string(),
    }
}
