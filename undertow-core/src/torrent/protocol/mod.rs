//! BitTorrent wire protocol: frames, handshake and connection transport.
//!
//! Defines message types and their binary form, the fixed 68-byte handshake
//! and the split reader/writer tasks that own a connected socket.

pub mod handshake;
pub mod messages;
pub mod transport;
pub mod types;

// Re-export public API
pub use handshake::HandshakeCodec;
pub use messages::MessageCodec;
pub use transport::{InboundMessage, PeerLink, connect_with_backoff, establish_link};
pub use types::{ConnectionDirection, PeerHandshake, PeerId, PeerMessage, RawFrame};
