//! Handshake encoding, exact-length decoding and validation

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::types::{HANDSHAKE_LENGTH, PROTOCOL_NAME, PeerHandshake, PeerId};
use crate::torrent::{InfoHash, TorrentError};

/// Handshake serialization for the peer wire protocol.
///
/// Layout: name length (19), "BitTorrent protocol", 8 reserved bytes,
/// 20-byte content hash, 20-byte peer id. 68 bytes total.
pub struct HandshakeCodec;

impl HandshakeCodec {
    /// Serializes handshake into its fixed 68-byte form.
    pub fn serialize_handshake(handshake: &PeerHandshake) -> [u8; HANDSHAKE_LENGTH] {
        let mut buf = [0u8; HANDSHAKE_LENGTH];
        buf[0] = PROTOCOL_NAME.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL_NAME);
        buf[20..28].copy_from_slice(&handshake.reserved);
        buf[28..48].copy_from_slice(handshake.info_hash.as_bytes());
        buf[48..68].copy_from_slice(handshake.peer_id.as_bytes());
        buf
    }

    /// Deserializes a 68-byte handshake.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Name length or literal name mismatch
    pub fn deserialize_handshake(
        data: &[u8; HANDSHAKE_LENGTH],
    ) -> Result<PeerHandshake, TorrentError> {
        if data[0] as usize != PROTOCOL_NAME.len() || &data[1..20] != PROTOCOL_NAME {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "Unexpected protocol name: {:?}",
                    String::from_utf8_lossy(&data[1..20])
                ),
            });
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(PeerHandshake {
            reserved,
            info_hash: InfoHash::new(info_hash),
            peer_id: PeerId::new(peer_id),
        })
    }

    /// Reads exactly one handshake under a deadline and checks its content hash.
    ///
    /// # Errors
    /// - `TorrentError::PeerConnectionError` - Short read, stream end or deadline expiry
    /// - `TorrentError::ProtocolError` - Wrong protocol name or content hash
    pub async fn read_handshake<R>(
        reader: &mut R,
        expected_info_hash: InfoHash,
        deadline: Duration,
    ) -> Result<PeerHandshake, TorrentError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; HANDSHAKE_LENGTH];
        tokio::time::timeout(deadline, reader.read_exact(&mut buf))
            .await
            .map_err(|_| TorrentError::PeerConnectionError {
                reason: "Timed out waiting for handshake".to_string(),
            })?
            .map_err(|e| TorrentError::PeerConnectionError {
                reason: format!("Failed to read handshake: {e}"),
            })?;

        let handshake = Self::deserialize_handshake(&buf)?;
        if handshake.info_hash != expected_info_hash {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "Info hash mismatch in handshake: expected {expected_info_hash}, got {}",
                    handshake.info_hash
                ),
            });
        }

        Ok(handshake)
    }
}
