//! Serving inbound block requests from verified local content.

use std::net::SocketAddr;

use bytes::Bytes;

use super::bitfield::PieceBitfield;
use super::manifest::Manifest;
use super::protocol::PeerMessage;
use super::{PieceIndex, TorrentError};

/// Block request received from a peer, routed to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRequest {
    pub peer: SocketAddr,
    pub piece_index: PieceIndex,
    pub offset: u32,
    pub length: u32,
}

/// Validates block requests and slices replies out of the content buffer.
///
/// Served bytes are never re-verified: only pieces marked in the progress
/// bitfield are served, and those were verified before being stored.
#[derive(Debug, Clone)]
pub struct UploadHandler {
    piece_length: u32,
    total_length: u64,
    max_block_length: u32,
}

/// Bytes of a `Piece` frame body ahead of the block: id, index and begin
const PIECE_HEADER_LENGTH: u32 = 9;

impl UploadHandler {
    /// Replies are kept within `max_frame_length`, the limit receivers enforce.
    pub fn new(manifest: &Manifest, max_frame_length: u32) -> Self {
        Self {
            piece_length: manifest.piece_length,
            total_length: manifest.total_length,
            max_block_length: max_frame_length.saturating_sub(PIECE_HEADER_LENGTH),
        }
    }

    /// Checks a request and returns the absolute content range it covers.
    ///
    /// # Errors
    /// - `TorrentError::InvalidRequest` - Index out of range or not held,
    ///   empty or oversized block, block past the nominal piece length or past
    ///   the content end
    pub fn validate(
        &self,
        request: &UploadRequest,
        local: &PieceBitfield,
    ) -> Result<(u64, usize), TorrentError> {
        let invalid = |reason: String| TorrentError::InvalidRequest {
            address: request.peer,
            reason,
        };

        if request.piece_index.as_u32() >= local.piece_count() {
            return Err(invalid(format!(
                "piece {} out of range",
                request.piece_index
            )));
        }
        if !local.has_piece(request.piece_index) {
            return Err(invalid(format!("piece {} not available", request.piece_index)));
        }
        if request.length == 0 {
            return Err(invalid("empty block".to_string()));
        }
        if request.length > self.max_block_length {
            return Err(invalid(format!(
                "block length {} exceeds limit {}",
                request.length, self.max_block_length
            )));
        }

        let block_end = request.offset as u64 + request.length as u64;
        if block_end > self.piece_length as u64 {
            return Err(invalid(format!(
                "block {}+{} exceeds piece length {}",
                request.offset, request.length, self.piece_length
            )));
        }

        let start = request.piece_index.as_u32() as u64 * self.piece_length as u64
            + request.offset as u64;
        if start + request.length as u64 > self.total_length {
            return Err(invalid(format!(
                "block {}+{} exceeds content end",
                request.offset, request.length
            )));
        }

        Ok((start, request.length as usize))
    }

    /// Builds the `Piece` reply for a valid request.
    ///
    /// # Errors
    /// - `TorrentError::InvalidRequest` - Request failed validation
    pub fn serve(
        &self,
        request: &UploadRequest,
        local: &PieceBitfield,
        content: &[u8],
    ) -> Result<PeerMessage, TorrentError> {
        let (start, length) = self.validate(request, local)?;
        let start = start as usize;
        let block = content
            .get(start..start + length)
            .ok_or_else(|| TorrentError::InvalidRequest {
                address: request.peer,
                reason: "block outside content buffer".to_string(),
            })?;

        Ok(PeerMessage::Piece {
            piece_index: request.piece_index,
            offset: request.offset,
            data: Bytes::copy_from_slice(block),
        })
    }
}
