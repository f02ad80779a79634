//! Core types for the peer wire protocol

use bytes::Bytes;

use crate::torrent::{InfoHash, PieceIndex};

/// Protocol identifier carried in every handshake.
pub const PROTOCOL_NAME: &[u8; 19] = b"BitTorrent protocol";

/// Total handshake length: 1 + 19 + 8 + 20 + 20.
pub const HANDSHAKE_LENGTH: usize = 68;

/// Peer identifier.
///
/// 20-byte identifier presented in handshakes and tracker announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates peer ID from 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Returns peer ID as byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generate random peer ID with the given 8-byte client prefix.
    pub fn generate(client_id: &str) -> Self {
        let mut id = [0u8; 20];
        let prefix = client_id.as_bytes();
        let prefix_len = prefix.len().min(8);
        id[..prefix_len].copy_from_slice(&prefix[..prefix_len]);
        for byte in &mut id[prefix_len..] {
            *byte = rand::random();
        }
        Self(id)
    }
}

/// Wire message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl MessageId {
    /// Maps a raw type byte onto a known message id.
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Choke),
            1 => Some(Self::Unchoke),
            2 => Some(Self::Interested),
            3 => Some(Self::NotInterested),
            4 => Some(Self::Have),
            5 => Some(Self::Bitfield),
            6 => Some(Self::Request),
            7 => Some(Self::Piece),
            8 => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// One undecoded frame: type byte plus raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub id: u8,
    pub payload: Bytes,
}

/// Peer wire protocol messages.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// Zero-length frame keeping the connection alive
    KeepAlive,
    /// Sender will not serve requests
    Choke,
    /// Sender will serve requests
    Unchoke,
    /// Sender wants pieces the receiver has
    Interested,
    /// Sender wants nothing from the receiver
    NotInterested,
    /// Sender has completed and verified a piece
    Have { piece_index: PieceIndex },
    /// Sender's complete piece possession bitmap
    Bitfield { bitfield: Bytes },
    /// Request for one block of a piece
    Request {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
    /// One block of piece data
    Piece {
        piece_index: PieceIndex,
        offset: u32,
        data: Bytes,
    },
    /// Withdraws an earlier request
    Cancel {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
    /// Message type this client does not implement; logged and ignored
    Unknown { id: u8, payload: Bytes },
}

impl PeerMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::KeepAlive => "KeepAlive",
            PeerMessage::Choke => "Choke",
            PeerMessage::Unchoke => "Unchoke",
            PeerMessage::Interested => "Interested",
            PeerMessage::NotInterested => "NotInterested",
            PeerMessage::Have { .. } => "Have",
            PeerMessage::Bitfield { .. } => "Bitfield",
            PeerMessage::Request { .. } => "Request",
            PeerMessage::Piece { .. } => "Piece",
            PeerMessage::Cancel { .. } => "Cancel",
            PeerMessage::Unknown { .. } => "Unknown",
        }
    }
}

/// Fixed-format identity exchange run once per connection.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerHandshake {
    /// Reserved bytes for protocol extensions, always zero when sent
    pub reserved: [u8; 8],
    /// Identity hash of the content being shared
    pub info_hash: InfoHash,
    /// Identifier of the sending peer
    pub peer_id: PeerId,
}

impl PeerHandshake {
    /// Create handshake with zeroed reserved bytes.
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }
}

/// Direction a connection was established in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    Outbound,
    Inbound,
}
