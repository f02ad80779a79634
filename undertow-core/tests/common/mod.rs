//! Simulated remote peers speaking the wire protocol over loopback TCP.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use undertow_core::torrent::protocol::{HandshakeCodec, MessageCodec};
use undertow_core::torrent::{
    InfoHash, Manifest, ManifestFile, PeerHandshake, PeerId, PeerMessage, PieceBitfield,
    PieceIndex, TorrentError,
};

pub const MAX_FRAME: u32 = 1 << 20;
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-file manifest over `content`.
pub fn manifest_for(content: &[u8], piece_length: u32) -> Manifest {
    let piece_hashes = content
        .chunks(piece_length as usize)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&Sha1::digest(chunk));
            hash
        })
        .collect();

    Manifest {
        info_hash: InfoHash::new([0x5a; 20]),
        name: "payload.bin".to_string(),
        piece_length,
        piece_hashes,
        total_length: content.len() as u64,
        files: vec![ManifestFile {
            path: vec!["payload.bin".to_string()],
            length: content.len() as u64,
            offset: 0,
        }],
        announce_urls: Vec::new(),
    }
}

/// Deterministic non-repeating test content.
pub fn content(length: usize) -> Vec<u8> {
    (0..length).map(|i| (i * 7 + i / 256) as u8).collect()
}

/// How a simulated seeder deviates from a well-behaved one.
#[derive(Debug, Clone, Default)]
pub struct SeederBehavior {
    /// Pieces advertised and served; `None` means all
    pub pieces: Option<Vec<u32>>,
    /// Serve flipped bytes the first time this piece is requested
    pub corrupt_once: Option<u32>,
    /// On the first request for `(piece, offset)`, choke, wait, unchoke and drop it
    pub choke_once_at: Option<(u32, u32)>,
}

/// Handle to a running simulated seeder.
pub struct SimulatedSeeder {
    pub address: SocketAddr,
    /// Piece indices the swarm announced, through its `Bitfield` or `Have`
    pub haves: mpsc::UnboundedReceiver<u32>,
    /// Every `Request` received as `(piece, offset, length)`
    pub requests: Arc<Mutex<Vec<(u32, u32, u32)>>>,
}

struct SeederState {
    manifest: Manifest,
    content: Vec<u8>,
    behavior: SeederBehavior,
    triggered: Mutex<HashSet<&'static str>>,
    haves: mpsc::UnboundedSender<u32>,
    requests: Arc<Mutex<Vec<(u32, u32, u32)>>>,
}

impl SeederState {
    fn trigger_once(&self, key: &'static str) -> bool {
        self.triggered.lock().insert(key)
    }

    fn advertises(&self, index: u32) -> bool {
        match &self.behavior.pieces {
            Some(pieces) => pieces.contains(&index),
            None => index < self.manifest.piece_count(),
        }
    }
}

/// Starts a seeder that accepts any number of connections.
pub async fn spawn_seeder(
    manifest: &Manifest,
    content: Vec<u8>,
    behavior: SeederBehavior,
) -> SimulatedSeeder {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (haves_tx, haves) = mpsc::unbounded_channel();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let state = Arc::new(SeederState {
        manifest: manifest.clone(),
        content,
        behavior,
        triggered: Mutex::new(HashSet::new()),
        haves: haves_tx,
        requests: requests.clone(),
    });

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let state = state.clone();
            tokio::spawn(async move {
                let _ = serve_connection(stream, state).await;
            });
        }
    });

    SimulatedSeeder {
        address,
        haves,
        requests,
    }
}

async fn serve_connection(mut stream: TcpStream, state: Arc<SeederState>) -> Result<(), TorrentError> {
    let info_hash = state.manifest.info_hash;
    HandshakeCodec::read_handshake(&mut stream, info_hash, IO_TIMEOUT).await?;
    let reply = PeerHandshake::new(info_hash, PeerId::new([0x53; 20]));
    stream
        .write_all(&HandshakeCodec::serialize_handshake(&reply))
        .await?;

    let mut bitfield = PieceBitfield::new(state.manifest.piece_count());
    for index in 0..state.manifest.piece_count() {
        if state.advertises(index) {
            bitfield.set_piece(PieceIndex::new(index));
        }
    }
    write(&mut stream, PeerMessage::Bitfield {
        bitfield: bitfield.to_bytes(),
    })
    .await?;
    write(&mut stream, PeerMessage::Unchoke).await?;

    loop {
        match MessageCodec::read_message(&mut stream, MAX_FRAME).await? {
            PeerMessage::Have { piece_index } => {
                let _ = state.haves.send(piece_index.as_u32());
            }
            PeerMessage::Bitfield { bitfield } => {
                let count = state.manifest.piece_count();
                let advertised = PieceBitfield::from_bytes(&bitfield, count)?;
                for index in (0..count).map(PieceIndex::new) {
                    if advertised.has_piece(index) {
                        let _ = state.haves.send(index.as_u32());
                    }
                }
            }
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            } => {
                let index = piece_index.as_u32();
                state.requests.lock().push((index, offset, length));

                if state.behavior.choke_once_at == Some((index, offset))
                    && state.trigger_once("choke")
                {
                    write(&mut stream, PeerMessage::Choke).await?;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    write(&mut stream, PeerMessage::Unchoke).await?;
                    continue;
                }

                if !state.advertises(index) {
                    continue;
                }

                let start = state.manifest.piece_offset(piece_index) as usize + offset as usize;
                let mut block = state.content[start..start + length as usize].to_vec();
                if state.behavior.corrupt_once == Some(index) && state.trigger_once("corrupt") {
                    block[0] ^= 0xff;
                }

                write(&mut stream, PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: block.into(),
                })
                .await?;
            }
            _ => {}
        }
    }
}

pub async fn write(stream: &mut TcpStream, message: PeerMessage) -> Result<(), TorrentError> {
    stream.write_all(&MessageCodec::encode(&message)).await?;
    Ok(())
}

/// Next non-keep-alive message, failing the test after `IO_TIMEOUT`.
pub async fn next_message(stream: &mut TcpStream) -> PeerMessage {
    loop {
        let message = tokio::time::timeout(IO_TIMEOUT, MessageCodec::read_message(stream, MAX_FRAME))
            .await
            .expect("timed out waiting for message")
            .expect("connection failed");
        if message != PeerMessage::KeepAlive {
            return message;
        }
    }
}

/// Connects to a swarm listener as a leecher and completes the handshake.
pub async fn connect_leecher(port: u16, info_hash: InfoHash) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let hello = PeerHandshake::new(info_hash, PeerId::new([0x4c; 20]));
    stream
        .write_all(&HandshakeCodec::serialize_handshake(&hello))
        .await
        .unwrap();
    HandshakeCodec::read_handshake(&mut stream, info_hash, IO_TIMEOUT)
        .await
        .unwrap();
    stream
}
