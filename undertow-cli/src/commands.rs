//! CLI command implementations

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;
use undertow_core::config::UndertowConfig;
use undertow_core::torrent::{BencodeParser, Manifest, PeerId, TrackerManager};
use undertow_core::{Result, SwarmHandle, SwarmSetup, TorrentError, UndertowError, spawn_swarm};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Download the content of a torrent file
    Download {
        /// Path to the torrent file
        torrent: PathBuf,
        /// Directory for the content blob, progress file and final files
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Port accepting inbound peers
        #[arg(short, long)]
        port: Option<u16>,
        /// Peer to connect to instead of asking the trackers (repeatable)
        #[arg(long = "peer")]
        peers: Vec<SocketAddr>,
        /// Keep uploading after the download completes, until Ctrl-C
        #[arg(long)]
        seed: bool,
    },
    /// Print what a torrent file describes
    Inspect {
        /// Path to the torrent file
        torrent: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the first failure of the selected command
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Download {
            torrent,
            output,
            port,
            peers,
            seed,
        } => download(&torrent, output, port, peers, seed).await,
        Commands::Inspect { torrent } => inspect(&torrent).await,
    }
}

/// Reads and decodes a torrent file.
///
/// # Errors
/// - `UndertowError::Io` - File could not be read
/// - `UndertowError::Torrent` - File is not a valid torrent
async fn load_manifest(path: &Path) -> Result<Manifest> {
    let data = tokio::fs::read(path).await?;
    if data.is_empty() {
        return Err(UndertowError::Torrent(TorrentError::InvalidTorrentFile {
            reason: format!("{} is empty", path.display()),
        }));
    }
    Ok(BencodeParser::parse_manifest(&data)?)
}

/// Download a torrent, optionally seeding afterwards
///
/// # Errors
/// - Torrent file unreadable or malformed
/// - No peers could be discovered
/// - Local storage could not be opened
pub async fn download(
    torrent: &Path,
    output: Option<PathBuf>,
    port: Option<u16>,
    peers: Vec<SocketAddr>,
    seed: bool,
) -> anyhow::Result<()> {
    let mut config = UndertowConfig::from_env();
    if let Some(output) = output {
        config.storage.download_dir = output;
    }
    if let Some(port) = port {
        config.swarm.listen_port = port;
    }

    let manifest = load_manifest(torrent).await?;
    let peer_id = PeerId::generate(config.peer.client_id);
    println!("Downloading: {}", manifest.name);
    println!("  Info hash: {}", manifest.info_hash);
    println!(
        "  Size: {} bytes in {} pieces",
        manifest.total_length,
        manifest.piece_count()
    );

    let peers = if peers.is_empty() {
        TrackerManager::new(config.network.clone())
            .discover_peers(&manifest, peer_id, config.swarm.listen_port)
            .await
            .context("peer discovery failed")?
    } else {
        peers
    };
    println!("  Peers: {}", peers.len());

    let setup = SwarmSetup::on_disk(manifest, &config.storage, peers, peer_id)
        .await
        .map_err(UndertowError::from)?;
    let handle = spawn_swarm(config, setup)
        .await
        .map_err(UndertowError::from)?;
    tracing::info!(address = %handle.listen_addr(), "Swarm started");

    tokio::select! {
        result = handle.wait_for_completion() => {
            let progress = result?;
            match &progress.output_root {
                Some(root) => println!("Download complete: {}", root.display()),
                None => println!("Download complete, but reassembly failed (see log)"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted at {:.1}%", handle.progress().fraction() * 100.0);
            handle.shutdown().await?;
            return Ok(());
        }
    }

    if seed {
        seed_until_interrupted(&handle).await?;
    }
    handle.shutdown().await?;
    Ok(())
}

async fn seed_until_interrupted(handle: &SwarmHandle) -> anyhow::Result<()> {
    println!("Seeding on {}, press Ctrl-C to stop", handle.listen_addr());
    tokio::signal::ctrl_c().await?;

    let progress = handle.progress();
    println!("Uploaded {} bytes", progress.uploaded_bytes);
    Ok(())
}

/// Print manifest details
///
/// # Errors
/// - Torrent file unreadable or malformed
pub async fn inspect(torrent: &Path) -> anyhow::Result<()> {
    let manifest = load_manifest(torrent).await?;

    println!("Name: {}", manifest.name);
    println!("Info hash: {}", manifest.info_hash);
    println!("Piece length: {}", manifest.piece_length);
    println!("Pieces: {}", manifest.piece_count());
    println!("Total size: {} bytes", manifest.total_length);
    println!("Files:");
    for file in &manifest.files {
        println!("  {} ({} bytes)", file.path.join("/"), file.length);
    }
    if manifest.announce_urls.is_empty() {
        println!("Trackers: none");
    } else {
        println!("Trackers:");
        for url in &manifest.announce_urls {
            println!("  {url}");
        }
    }
    Ok(())
}
