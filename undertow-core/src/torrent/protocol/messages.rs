//! Length-prefixed frame encoding and decoding

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::types::{MessageId, PeerMessage, RawFrame};
use crate::torrent::{PieceIndex, TorrentError};

/// Frame codec for the peer wire protocol.
///
/// A frame is a 4-byte big-endian length, one type byte and the payload.
/// Length zero is a keep-alive carrying neither type nor payload.
pub struct MessageCodec;

impl MessageCodec {
    /// Encodes a raw frame: length = payload + 1, type byte, payload.
    pub fn encode_frame(id: u8, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + payload.len());
        buf.put_u32(payload.len() as u32 + 1);
        buf.put_u8(id);
        buf.extend_from_slice(payload);
        buf.freeze()
    }

    /// Encodes a typed message into a complete frame.
    pub fn encode(message: &PeerMessage) -> Bytes {
        match message {
            PeerMessage::KeepAlive => Bytes::from_static(&[0, 0, 0, 0]),
            PeerMessage::Choke => Self::encode_frame(MessageId::Choke as u8, &[]),
            PeerMessage::Unchoke => Self::encode_frame(MessageId::Unchoke as u8, &[]),
            PeerMessage::Interested => Self::encode_frame(MessageId::Interested as u8, &[]),
            PeerMessage::NotInterested => Self::encode_frame(MessageId::NotInterested as u8, &[]),
            PeerMessage::Have { piece_index } => {
                Self::encode_frame(MessageId::Have as u8, &piece_index.as_u32().to_be_bytes())
            }
            PeerMessage::Bitfield { bitfield } => {
                Self::encode_frame(MessageId::Bitfield as u8, bitfield)
            }
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            } => Self::encode_frame(
                MessageId::Request as u8,
                &Self::block_triple(*piece_index, *offset, *length),
            ),
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                let mut payload = Vec::with_capacity(8 + data.len());
                payload.put_u32(piece_index.as_u32());
                payload.put_u32(*offset);
                payload.extend_from_slice(data);
                Self::encode_frame(MessageId::Piece as u8, &payload)
            }
            PeerMessage::Cancel {
                piece_index,
                offset,
                length,
            } => Self::encode_frame(
                MessageId::Cancel as u8,
                &Self::block_triple(*piece_index, *offset, *length),
            ),
            PeerMessage::Unknown { id, payload } => Self::encode_frame(*id, payload),
        }
    }

    fn block_triple(piece_index: PieceIndex, offset: u32, length: u32) -> [u8; 12] {
        let mut payload = [0u8; 12];
        payload[0..4].copy_from_slice(&piece_index.as_u32().to_be_bytes());
        payload[4..8].copy_from_slice(&offset.to_be_bytes());
        payload[8..12].copy_from_slice(&length.to_be_bytes());
        payload
    }

    /// Reads one raw frame; `None` is a keep-alive.
    ///
    /// The length prefix is read first and a zero length returns without any
    /// further read. A short read anywhere in the frame discards what was read.
    ///
    /// # Errors
    /// - `TorrentError::PeerConnectionError` - Stream ended or failed mid-frame
    /// - `TorrentError::ProtocolError` - Declared length exceeds `max_frame_length`
    pub async fn read_frame<R>(
        reader: &mut R,
        max_frame_length: u32,
    ) -> Result<Option<RawFrame>, TorrentError>
    where
        R: AsyncRead + Unpin,
    {
        let mut length_buf = [0u8; 4];
        reader
            .read_exact(&mut length_buf)
            .await
            .map_err(|e| read_error("frame length", e))?;

        let length = u32::from_be_bytes(length_buf);
        if length == 0 {
            return Ok(None);
        }

        if length > max_frame_length {
            return Err(TorrentError::ProtocolError {
                message: format!("Frame length {length} exceeds limit {max_frame_length}"),
            });
        }

        let mut body = vec![0u8; length as usize];
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| read_error("frame body", e))?;

        let mut body = Bytes::from(body);
        let id = body.get_u8();
        Ok(Some(RawFrame { id, payload: body }))
    }

    /// Reads and decodes one typed message.
    ///
    /// # Errors
    /// - `TorrentError::PeerConnectionError` - Stream ended or failed mid-frame
    /// - `TorrentError::ProtocolError` - Oversized frame or malformed payload
    pub async fn read_message<R>(
        reader: &mut R,
        max_frame_length: u32,
    ) -> Result<PeerMessage, TorrentError>
    where
        R: AsyncRead + Unpin,
    {
        match Self::read_frame(reader, max_frame_length).await? {
            None => Ok(PeerMessage::KeepAlive),
            Some(frame) => Self::decode(frame),
        }
    }

    /// Decodes a raw frame into a typed message.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Payload length does not fit the message type
    pub fn decode(frame: RawFrame) -> Result<PeerMessage, TorrentError> {
        let RawFrame { id, mut payload } = frame;

        let Some(message_id) = MessageId::from_u8(id) else {
            return Ok(PeerMessage::Unknown { id, payload });
        };

        match message_id {
            MessageId::Choke => Ok(PeerMessage::Choke),
            MessageId::Unchoke => Ok(PeerMessage::Unchoke),
            MessageId::Interested => Ok(PeerMessage::Interested),
            MessageId::NotInterested => Ok(PeerMessage::NotInterested),
            MessageId::Have => {
                expect_length("Have", &payload, 4)?;
                Ok(PeerMessage::Have {
                    piece_index: PieceIndex::new(payload.get_u32()),
                })
            }
            MessageId::Bitfield => Ok(PeerMessage::Bitfield { bitfield: payload }),
            MessageId::Request => {
                expect_length("Request", &payload, 12)?;
                Ok(PeerMessage::Request {
                    piece_index: PieceIndex::new(payload.get_u32()),
                    offset: payload.get_u32(),
                    length: payload.get_u32(),
                })
            }
            MessageId::Piece => {
                if payload.len() < 8 {
                    return Err(TorrentError::ProtocolError {
                        message: format!("Piece payload too short: {} bytes", payload.len()),
                    });
                }
                let piece_index = PieceIndex::new(payload.get_u32());
                let offset = payload.get_u32();
                Ok(PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: payload,
                })
            }
            MessageId::Cancel => {
                expect_length("Cancel", &payload, 12)?;
                Ok(PeerMessage::Cancel {
                    piece_index: PieceIndex::new(payload.get_u32()),
                    offset: payload.get_u32(),
                    length: payload.get_u32(),
                })
            }
        }
    }
}

fn expect_length(kind: &str, payload: &Bytes, expected: usize) -> Result<(), TorrentError> {
    if payload.len() != expected {
        return Err(TorrentError::ProtocolError {
            message: format!(
                "Invalid {kind} payload length: expected {expected}, got {}",
                payload.len()
            ),
        });
    }
    Ok(())
}

fn read_error(what: &str, error: std::io::Error) -> TorrentError {
    if error.kind() == std::io::ErrorKind::UnexpectedEof {
        TorrentError::PeerConnectionError {
            reason: format!("Connection closed while reading {what}"),
        }
    } else {
        TorrentError::PeerConnectionError {
            reason: format!("Failed to read {what}: {error}"),
        }
    }
}
