//! Download-side swarm tests against simulated seeders over loopback TCP.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{SeederBehavior, content, manifest_for, spawn_seeder};
use tokio::time::timeout;
use undertow_core::config::UndertowConfig;
use undertow_core::storage::{MemoryBitfieldStore, MemoryContentStore};
use undertow_core::torrent::{Manifest, PeerId};
use undertow_core::{SwarmHandle, SwarmSetup, spawn_swarm};

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(15);

struct Download {
    handle: SwarmHandle,
    store: MemoryContentStore,
    bitfield: MemoryBitfieldStore,
}

async fn start_download(
    manifest: &Manifest,
    peers: Vec<std::net::SocketAddr>,
    config: UndertowConfig,
    output_dir: Option<std::path::PathBuf>,
) -> Download {
    let store = MemoryContentStore::new(manifest.total_length);
    let bitfield = MemoryBitfieldStore::new();
    let setup = SwarmSetup {
        manifest: manifest.clone(),
        content: Arc::new(store.clone()),
        bitfield_store: Box::new(bitfield.clone()),
        peers,
        local_peer_id: PeerId::new([0x11; 20]),
        output_dir,
    };
    let handle = spawn_swarm(config, setup).await.unwrap();
    Download {
        handle,
        store,
        bitfield,
    }
}

/// Collects `expected` Have announcements, then checks nothing else arrives.
async fn collect_haves(
    haves: &mut tokio::sync::mpsc::UnboundedReceiver<u32>,
    expected: usize,
) -> Vec<u32> {
    let mut seen = Vec::new();
    while seen.len() < expected {
        let index = timeout(COMPLETION_TIMEOUT, haves.recv())
            .await
            .expect("timed out waiting for Have")
            .expect("seeder stopped");
        seen.push(index);
    }
    assert!(
        timeout(Duration::from_millis(200), haves.recv()).await.is_err(),
        "unexpected extra Have"
    );
    seen
}

#[tokio::test]
async fn test_downloads_four_pieces_from_single_seeder() {
    let data = content(64);
    let manifest = manifest_for(&data, 16);
    let mut seeder = spawn_seeder(&manifest, data.clone(), SeederBehavior::default()).await;
    let output = tempfile::tempdir().unwrap();

    let download = start_download(
        &manifest,
        vec![seeder.address],
        UndertowConfig::for_testing(),
        Some(output.path().to_path_buf()),
    )
    .await;

    let progress = timeout(COMPLETION_TIMEOUT, download.handle.wait_for_completion())
        .await
        .expect("download timed out")
        .unwrap();

    assert_eq!(progress.completed_pieces, 4);
    assert_eq!(progress.downloaded_bytes, 64);
    assert_eq!(download.store.contents(), data);
    assert_eq!(download.bitfield.contents(), vec![0xF0]);

    // Single-file layout lands directly in the output directory
    assert_eq!(progress.output_root.as_deref(), Some(output.path()));
    let assembled = std::fs::read(output.path().join("payload.bin")).unwrap();
    assert_eq!(assembled, data);

    let mut haves = collect_haves(&mut seeder.haves, 4).await;
    haves.sort_unstable();
    assert_eq!(haves, vec![0, 1, 2, 3]);

    download.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_every_piece_committed_exactly_once_across_workers() {
    let data = content(8 * 32 - 5);
    let manifest = manifest_for(&data, 32);

    let mut seeders = Vec::new();
    for _ in 0..3 {
        seeders.push(spawn_seeder(&manifest, data.clone(), SeederBehavior::default()).await);
    }
    let addresses = seeders.iter().map(|s| s.address).collect();

    let download = start_download(&manifest, addresses, UndertowConfig::for_testing(), None).await;
    let progress = timeout(COMPLETION_TIMEOUT, download.handle.wait_for_completion())
        .await
        .expect("download timed out")
        .unwrap();

    assert_eq!(progress.completed_pieces, 8);
    assert_eq!(progress.downloaded_bytes, data.len() as u64);
    assert_eq!(download.store.contents(), data);
    assert_eq!(progress.output_root, None);

    // Each seeder hears about each piece once, whoever fetched it
    for seeder in &mut seeders {
        let haves = collect_haves(&mut seeder.haves, 8).await;
        let distinct: HashSet<u32> = haves.iter().copied().collect();
        assert_eq!(distinct.len(), 8);
    }

    download.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pieces_split_between_partial_seeders() {
    let data = content(6 * 16);
    let manifest = manifest_for(&data, 16);

    let evens = spawn_seeder(
        &manifest,
        data.clone(),
        SeederBehavior {
            pieces: Some(vec![0, 2, 4]),
            ..Default::default()
        },
    )
    .await;
    let odds = spawn_seeder(
        &manifest,
        data.clone(),
        SeederBehavior {
            pieces: Some(vec![1, 3, 5]),
            ..Default::default()
        },
    )
    .await;

    let download = start_download(
        &manifest,
        vec![evens.address, odds.address],
        UndertowConfig::for_testing(),
        None,
    )
    .await;
    timeout(COMPLETION_TIMEOUT, download.handle.wait_for_completion())
        .await
        .expect("download timed out")
        .unwrap();
    assert_eq!(download.store.contents(), data);

    // Nobody was asked for a piece it does not advertise
    assert!(evens.requests.lock().iter().all(|(index, _, _)| index % 2 == 0));
    assert!(odds.requests.lock().iter().all(|(index, _, _)| index % 2 == 1));

    download.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_corrupted_piece_is_fetched_again() {
    let data = content(4 * 16);
    let manifest = manifest_for(&data, 16);
    let seeder = spawn_seeder(
        &manifest,
        data.clone(),
        SeederBehavior {
            corrupt_once: Some(2),
            ..Default::default()
        },
    )
    .await;

    let download = start_download(
        &manifest,
        vec![seeder.address],
        UndertowConfig::for_testing(),
        None,
    )
    .await;
    timeout(COMPLETION_TIMEOUT, download.handle.wait_for_completion())
        .await
        .expect("download timed out")
        .unwrap();

    assert_eq!(download.store.contents(), data);
    let requests_for_two = seeder
        .requests
        .lock()
        .iter()
        .filter(|(index, _, _)| *index == 2)
        .count();
    assert_eq!(requests_for_two, 2);

    download.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_choke_mid_piece_restarts_transfer() {
    let data = content(2 * 32);
    let manifest = manifest_for(&data, 32);
    let seeder = spawn_seeder(
        &manifest,
        data.clone(),
        SeederBehavior {
            choke_once_at: Some((0, 16)),
            ..Default::default()
        },
    )
    .await;

    let mut config = UndertowConfig::for_testing();
    config.peer.block_size = 16;

    let download = start_download(&manifest, vec![seeder.address], config, None).await;
    timeout(COMPLETION_TIMEOUT, download.handle.wait_for_completion())
        .await
        .expect("download timed out")
        .unwrap();
    assert_eq!(download.store.contents(), data);

    // Piece 0 restarted from its first block after the choke
    let requests = seeder.requests.lock().clone();
    let piece_zero: Vec<u32> = requests
        .iter()
        .filter(|(index, _, _)| *index == 0)
        .map(|(_, offset, _)| *offset)
        .collect();
    assert_eq!(piece_zero, vec![0, 16, 0, 16]);

    download.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_peer_does_not_block_download() {
    let data = content(3 * 16);
    let manifest = manifest_for(&data, 16);
    let seeder = spawn_seeder(&manifest, data.clone(), SeederBehavior::default()).await;

    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let unreachable = closed.local_addr().unwrap();
    drop(closed);

    let download = start_download(
        &manifest,
        vec![unreachable, seeder.address],
        UndertowConfig::for_testing(),
        None,
    )
    .await;
    timeout(COMPLETION_TIMEOUT, download.handle.wait_for_completion())
        .await
        .expect("download timed out")
        .unwrap();
    assert_eq!(download.store.contents(), data);

    let peers = download.handle.connected_peers().await.unwrap();
    assert!(peers.iter().all(|peer| peer.address != unreachable));

    download.handle.shutdown().await.unwrap();
}
