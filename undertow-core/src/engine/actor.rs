//! Actor implementation for the swarm orchestrator.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::commands::{SwarmCommand, SwarmProgress};
use super::core::{SwarmCore, load_buffer};
use super::handle::SwarmHandle;
use crate::config::{StorageConfig, UndertowConfig};
use crate::storage::{
    BitfieldStore, ContentStore, FileBitfieldStore, FileContentStore, StorageError,
};
use crate::torrent::{
    Manifest, PeerEvent, PeerId, PeerListener, PieceResult, PieceWorkQueue, ProgressBitfield,
    TorrentError, UploadRequest, WorkerContext,
};

/// Everything a swarm needs besides configuration.
pub struct SwarmSetup {
    pub manifest: Manifest,
    pub content: Arc<dyn ContentStore>,
    pub bitfield_store: Box<dyn BitfieldStore>,
    /// Peers dialed at startup
    pub peers: Vec<SocketAddr>,
    pub local_peer_id: PeerId,
    /// Directory receiving the file layout on completion; `None` skips reassembly
    pub output_dir: Option<PathBuf>,
}

impl SwarmSetup {
    /// File-backed setup under `storage.download_dir`.
    ///
    /// The content blob and progress file are named after the manifest and
    /// the reassembled layout lands in the same directory.
    ///
    /// # Errors
    /// - `StorageError` - Content blob could not be created or resized
    pub async fn on_disk(
        manifest: Manifest,
        storage: &StorageConfig,
        peers: Vec<SocketAddr>,
        local_peer_id: PeerId,
    ) -> Result<Self, StorageError> {
        let dir = &storage.download_dir;
        let blob_path = dir.join(format!("{}{}", manifest.name, storage.blob_suffix));
        let bitfield_path = dir.join(format!("{}{}", manifest.name, storage.bitfield_suffix));

        let content = FileContentStore::open(&blob_path, manifest.total_length).await?;
        Ok(Self {
            manifest,
            content: Arc::new(content),
            bitfield_store: Box::new(FileBitfieldStore::new(bitfield_path)),
            peers,
            local_peer_id,
            output_dir: Some(dir.clone()),
        })
    }
}

/// Receivers drained by the actor loop.
struct ActorChannels {
    commands: mpsc::Receiver<SwarmCommand>,
    results: mpsc::UnboundedReceiver<PieceResult>,
    uploads: mpsc::Receiver<UploadRequest>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
}

/// Loads local progress, starts the listener and outbound workers, then
/// spawns the orchestrator actor and returns its handle.
///
/// Every missing piece is queued exactly once before any worker starts.
///
/// # Errors
/// - `TorrentError::Storage` - Progress or content could not be loaded
/// - `TorrentError::Io` - Listener could not be bound
pub async fn spawn_swarm(
    config: UndertowConfig,
    setup: SwarmSetup,
) -> Result<SwarmHandle, TorrentError> {
    let SwarmSetup {
        manifest,
        content,
        bitfield_store,
        peers,
        local_peer_id,
        output_dir,
    } = setup;

    let manifest = Arc::new(manifest);
    let piece_count = manifest.piece_count();

    let progress = ProgressBitfield::load(piece_count, bitfield_store).await?;
    let buffer = load_buffer(&manifest, &progress, content.as_ref()).await?;

    let queue = Arc::new(PieceWorkQueue::new(piece_count as usize));
    for index in progress.missing() {
        if let Some(job) = manifest.job(index) {
            queue.push(job)?;
        }
    }
    tracing::info!(
        name = %manifest.name,
        info_hash = %manifest.info_hash,
        completed = progress.completed(),
        total = piece_count,
        "Loaded local progress"
    );

    let (progress_tx, progress_rx) = watch::channel(SwarmProgress::default());
    let (command_tx, commands) = mpsc::channel(100);
    let (results_tx, results) = mpsc::unbounded_channel();
    let (uploads_tx, uploads) = mpsc::channel(config.swarm.upload_queue_capacity);
    let (events_tx, events) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let context = WorkerContext {
        info_hash: manifest.info_hash,
        local_peer_id,
        piece_count,
        config: config.peer.clone(),
        queue,
        results: results_tx,
        uploads: uploads_tx,
        events: events_tx,
        cancel: cancel.clone(),
    };

    let listener = PeerListener::bind(config.swarm.listen_port).await?;
    let listen_addr = listener.local_addr()?;

    let mut core = SwarmCore::new(
        manifest,
        progress,
        content,
        buffer,
        context.clone(),
        progress_tx,
        output_dir,
    );
    if core.is_complete() {
        core.finish().await;
    }
    core.publish();

    tokio::spawn(listener.run(context));
    for address in peers {
        core.spawn_outbound(address);
    }

    let channels = ActorChannels {
        commands,
        results,
        uploads,
        events,
    };
    let unchoke_interval = config.swarm.optimistic_unchoke_interval;
    tokio::spawn(run_actor_loop(core, channels, cancel.clone(), unchoke_interval));

    Ok(SwarmHandle::new(command_tx, progress_rx, cancel, listen_addr))
}

/// Processes results, requests, lifecycle events and commands one at a time.
///
/// Runs until cancelled, told to shut down, or every handle is dropped.
async fn run_actor_loop(
    mut core: SwarmCore,
    mut channels: ActorChannels,
    cancel: CancellationToken,
    unchoke_interval: Duration,
) {
    tracing::debug!("Swarm actor started");

    let mut unchoke_timer =
        tokio::time::interval_at(Instant::now() + unchoke_interval, unchoke_interval);
    unchoke_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = channels.commands.recv() => match command {
                Some(command) => {
                    if !handle_command(&mut core, command, &cancel) {
                        break;
                    }
                }
                None => break,
            },
            Some(event) = channels.events.recv() => core.handle_event(event),
            Some(result) = channels.results.recv() => core.commit_piece(result).await,
            Some(request) = channels.uploads.recv() => core.serve_upload(request),
            _ = unchoke_timer.tick() => core.optimistic_unchoke(),
        }
    }

    cancel.cancel();
    tracing::debug!("Swarm actor stopped");
}

/// Handles a single command. Returns false to stop the actor.
fn handle_command(core: &mut SwarmCore, command: SwarmCommand, cancel: &CancellationToken) -> bool {
    match command {
        SwarmCommand::AddPeer { address, responder } => {
            core.spawn_outbound(address);
            let _ = responder.send(());
        }
        SwarmCommand::ChokePeer { address, responder } => {
            let _ = responder.send(core.choke(address));
        }
        SwarmCommand::UnchokePeer { address, responder } => {
            let _ = responder.send(core.unchoke(address));
        }
        SwarmCommand::ConnectedPeers { responder } => {
            let _ = responder.send(core.peers());
        }
        SwarmCommand::Shutdown { responder } => {
            tracing::info!("Swarm shutting down");
            cancel.cancel();
            let _ = responder.send(());
            return false;
        }
    }
    true
}
