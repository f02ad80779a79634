//! Orchestrator state owned by the swarm actor.
//!
//! Commits verified pieces in a fixed order (memory buffer, content store,
//! progress bitfield, peer broadcast), serves validated upload requests and
//! keeps the registry in sync with worker lifecycle events.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

use super::commands::{PeerSummary, SwarmProgress};
use super::registry::PeerRegistry;
use crate::storage::{ContentStore, StorageError, assemble_files};
use crate::torrent::{
    Manifest, PeerEvent, PeerMessage, PeerWorker, PieceIndex, PieceJob, PieceResult,
    ProgressBitfield, TorrentError, UploadHandler, UploadRequest, WorkerContext,
};

pub(super) struct SwarmCore {
    manifest: Arc<Manifest>,
    progress: ProgressBitfield,
    content: Arc<dyn ContentStore>,
    /// In-memory mirror of the content store, served to uploaders
    buffer: Vec<u8>,
    registry: PeerRegistry,
    uploader: UploadHandler,
    context: WorkerContext,
    progress_tx: watch::Sender<SwarmProgress>,
    output_dir: Option<PathBuf>,
    downloaded_bytes: u64,
    uploaded_bytes: u64,
    output_root: Option<PathBuf>,
}

impl SwarmCore {
    pub(super) fn new(
        manifest: Arc<Manifest>,
        progress: ProgressBitfield,
        content: Arc<dyn ContentStore>,
        buffer: Vec<u8>,
        context: WorkerContext,
        progress_tx: watch::Sender<SwarmProgress>,
        output_dir: Option<PathBuf>,
    ) -> Self {
        let uploader = UploadHandler::new(&manifest, context.config.max_frame_length);
        Self {
            manifest,
            progress,
            content,
            buffer,
            registry: PeerRegistry::new(),
            uploader,
            context,
            progress_tx,
            output_dir,
            downloaded_bytes: 0,
            uploaded_bytes: 0,
            output_root: None,
        }
    }

    /// Dials `address` on a new task; failures end only that task.
    pub(super) fn spawn_outbound(&self, address: SocketAddr) {
        let context = self.context.clone();
        tokio::spawn(async move {
            match PeerWorker::connect(address, context).await {
                Ok(worker) => worker.run().await,
                Err(e) => tracing::warn!(
                    peer = %address,
                    category = ?e.category(),
                    error = %e,
                    "Failed to establish connection"
                ),
            }
        });
    }

    /// Commits a verified piece.
    ///
    /// Duplicates are dropped. A failed store write or bitfield persist puts
    /// the job back on the queue so another worker can fetch it again.
    pub(super) async fn commit_piece(&mut self, result: PieceResult) {
        let index = result.index;
        if self.progress.has_piece(index) {
            tracing::debug!(piece = %index, "Dropping duplicate piece result");
            return;
        }
        let Some(job) = self.manifest.job(index) else {
            tracing::warn!(piece = %index, "Dropping result for unknown piece");
            return;
        };
        if result.data.len() != job.length as usize {
            tracing::warn!(
                piece = %index,
                expected = job.length,
                actual = result.data.len(),
                "Dropping result with wrong length"
            );
            self.requeue(job);
            return;
        }

        let offset = self.manifest.piece_offset(index);
        let start = offset as usize;
        self.buffer[start..start + result.data.len()].copy_from_slice(&result.data);

        if let Err(e) = self.content.write_at(offset, &result.data).await {
            tracing::error!(piece = %index, error = %e, "Failed to write piece to content store");
            self.requeue(job);
            return;
        }

        if let Err(e) = self.progress.mark_piece(index).await {
            tracing::error!(piece = %index, error = %e, "Failed to persist progress");
            self.requeue(job);
            return;
        }

        self.downloaded_bytes += result.data.len() as u64;
        self.registry.broadcast(&PeerMessage::Have { piece_index: index });

        tracing::info!(
            "Downloaded {}/{} pieces",
            self.progress.completed(),
            self.progress.piece_count()
        );

        if self.progress.is_complete() {
            self.finish().await;
        }
        self.publish();
    }

    /// Reassembles the declared file layout once every piece is committed.
    pub(super) async fn finish(&mut self) {
        tracing::info!(name = %self.manifest.name, "All pieces verified");
        let Some(output_dir) = self.output_dir.clone() else {
            return;
        };

        match assemble_files(self.content.as_ref(), &self.manifest, &output_dir).await {
            Ok(root) => {
                tracing::info!(path = %root.display(), "Reassembled files");
                self.output_root = Some(root);
            }
            Err(e) => tracing::error!(error = %e, "Failed to reassemble files"),
        }
    }

    /// Answers a block request, or a `Choke` if we are choking the requester.
    ///
    /// Invalid requests are logged and dropped; the connection stays open.
    pub(super) fn serve_upload(&mut self, request: UploadRequest) {
        let Some(peer) = self.registry.get(request.peer) else {
            tracing::debug!(peer = %request.peer, "Request from unregistered peer");
            return;
        };

        if peer.local_choking {
            tracing::debug!(peer = %request.peer, piece = %request.piece_index, "Refusing request while choking");
            peer.send(PeerMessage::Choke);
            return;
        }

        match self
            .uploader
            .serve(&request, self.progress.bits(), &self.buffer)
        {
            Ok(reply) => {
                if peer.send(reply) {
                    self.uploaded_bytes += request.length as u64;
                    tracing::trace!(
                        peer = %request.peer,
                        piece = %request.piece_index,
                        offset = request.offset,
                        length = request.length,
                        "Served block"
                    );
                    self.publish();
                }
            }
            Err(e) => tracing::warn!(peer = %request.peer, error = %e, "Dropping invalid request"),
        }
    }

    pub(super) fn handle_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Connected {
                address,
                direction,
                outbound,
                ready,
            } => {
                tracing::info!(peer = %address, ?direction, "Peer connected");
                self.registry.register(address, direction, outbound);
                let _ = ready.send(self.progress.snapshot());
            }
            PeerEvent::Disconnected { address } => {
                if self.registry.remove(address).is_some() {
                    tracing::info!(peer = %address, "Peer disconnected");
                }
            }
        }
        self.publish();
    }

    pub(super) fn optimistic_unchoke(&mut self) {
        if let Some(address) = self.registry.optimistic_unchoke() {
            tracing::debug!(peer = %address, "Optimistically unchoked peer");
        }
    }

    pub(super) fn choke(&mut self, address: SocketAddr) -> Result<(), TorrentError> {
        if self.registry.choke(address) {
            Ok(())
        } else {
            Err(unknown_peer(address))
        }
    }

    pub(super) fn unchoke(&mut self, address: SocketAddr) -> Result<(), TorrentError> {
        if self.registry.unchoke(address) {
            Ok(())
        } else {
            Err(unknown_peer(address))
        }
    }

    pub(super) fn peers(&self) -> Vec<PeerSummary> {
        self.registry
            .addresses()
            .filter_map(|address| {
                self.registry.get(address).map(|entry| PeerSummary {
                    address,
                    direction: entry.direction,
                    local_choking: entry.local_choking,
                })
            })
            .collect()
    }

    pub(super) fn is_complete(&self) -> bool {
        self.progress.is_complete()
    }

    /// Publishes the current counters to every progress watcher.
    pub(super) fn publish(&self) {
        self.progress_tx.send_replace(SwarmProgress {
            completed_pieces: self.progress.completed(),
            total_pieces: self.progress.piece_count(),
            connected_peers: self.registry.len(),
            downloaded_bytes: self.downloaded_bytes,
            uploaded_bytes: self.uploaded_bytes,
            complete: self.progress.is_complete(),
            output_root: self.output_root.clone(),
        });
    }

    fn requeue(&self, job: PieceJob) {
        if let Err(e) = self.context.queue.push(job) {
            tracing::error!(piece = %job.index, error = %e, "Failed to requeue job");
        }
    }
}

/// Reads every already verified piece into a fresh buffer.
///
/// # Errors
/// - `StorageError` - Content store could not be read
pub(super) async fn load_buffer(
    manifest: &Manifest,
    progress: &ProgressBitfield,
    content: &dyn ContentStore,
) -> Result<Vec<u8>, StorageError> {
    let mut buffer = vec![0u8; manifest.total_length as usize];
    for index in (0..manifest.piece_count()).map(PieceIndex::new) {
        if !progress.has_piece(index) {
            continue;
        }
        let offset = manifest.piece_offset(index);
        let length = manifest.piece_size(index) as usize;
        let bytes = content.read_at(offset, length).await?;
        let start = offset as usize;
        buffer[start..start + length].copy_from_slice(&bytes);
    }
    Ok(buffer)
}

fn unknown_peer(address: SocketAddr) -> TorrentError {
    TorrentError::PeerConnectionError {
        reason: format!("{address} is not connected"),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::PeerConfig;
    use crate::storage::test_fixtures::{FlakyBitfieldStore, FlakyContentStore};
    use crate::storage::{BitfieldStore, MemoryBitfieldStore, MemoryContentStore};
    use crate::torrent::manifest::fixtures::manifest_for;
    use crate::torrent::{PeerId, PieceWorkQueue};

    const DATA: &[u8] = b"0123456789abcdefFEDCBA9876543210";

    struct Harness {
        core: SwarmCore,
        queue: Arc<PieceWorkQueue>,
        progress: watch::Receiver<SwarmProgress>,
    }

    async fn harness(content: Arc<dyn ContentStore>, store: Box<dyn BitfieldStore>) -> Harness {
        let manifest = Arc::new(manifest_for(DATA, 16));
        let piece_count = manifest.piece_count();
        let progress = ProgressBitfield::load(piece_count, store).await.unwrap();
        let queue = Arc::new(PieceWorkQueue::new(piece_count as usize));

        let context = WorkerContext {
            info_hash: manifest.info_hash,
            local_peer_id: PeerId::new([1u8; 20]),
            piece_count,
            config: PeerConfig::default(),
            queue: queue.clone(),
            results: mpsc::unbounded_channel().0,
            uploads: mpsc::channel(1).0,
            events: mpsc::unbounded_channel().0,
            cancel: CancellationToken::new(),
        };
        let (progress_tx, progress_rx) = watch::channel(SwarmProgress::default());
        let buffer = vec![0u8; DATA.len()];
        let core = SwarmCore::new(manifest, progress, content, buffer, context, progress_tx, None);

        Harness {
            core,
            queue,
            progress: progress_rx,
        }
    }

    fn result(index: u32) -> PieceResult {
        let start = index as usize * 16;
        PieceResult {
            index: PieceIndex::new(index),
            data: Bytes::copy_from_slice(&DATA[start..start + 16]),
        }
    }

    #[tokio::test]
    async fn test_persist_failure_requeues_and_later_commit_completes() {
        let store = FlakyBitfieldStore::failing(1);
        let persisted = store.clone();
        let mut h = harness(Arc::new(MemoryContentStore::new(32)), Box::new(store)).await;

        h.core.commit_piece(result(0)).await;
        h.core.commit_piece(result(1)).await;

        // Piece 0 hit the failing persist and went back on the queue
        let requeued = h.queue.pop().unwrap();
        assert_eq!(requeued.index, PieceIndex::new(0));
        assert!(h.queue.is_empty());
        assert_eq!(persisted.contents(), vec![0b0100_0000]);
        assert!(!h.progress.borrow().complete);

        h.core.commit_piece(result(0)).await;

        assert_eq!(persisted.contents(), vec![0b1100_0000]);
        let progress = h.progress.borrow().clone();
        assert!(progress.complete);
        assert_eq!(progress.completed_pieces, 2);
        assert_eq!(progress.downloaded_bytes, 32);
    }

    #[tokio::test]
    async fn test_write_failure_requeues_and_later_commit_completes() {
        let content = FlakyContentStore::failing(32, 1);
        let written = content.clone();
        let mut h = harness(Arc::new(content), Box::new(MemoryBitfieldStore::new())).await;

        h.core.commit_piece(result(1)).await;

        assert_eq!(h.queue.pop().unwrap().index, PieceIndex::new(1));
        assert!(!h.core.progress.has_piece(PieceIndex::new(1)));
        assert_eq!(h.progress.borrow().completed_pieces, 0);

        h.core.commit_piece(result(1)).await;
        h.core.commit_piece(result(0)).await;

        assert!(h.queue.is_empty());
        assert_eq!(written.contents(), DATA);
        assert!(h.progress.borrow().complete);
    }

    #[tokio::test]
    async fn test_duplicate_result_is_dropped() {
        let mut h = harness(
            Arc::new(MemoryContentStore::new(32)),
            Box::new(MemoryBitfieldStore::new()),
        )
        .await;

        h.core.commit_piece(result(0)).await;
        h.core.commit_piece(result(0)).await;

        assert!(h.queue.is_empty());
        assert_eq!(h.progress.borrow().downloaded_bytes, 16);
    }
}
