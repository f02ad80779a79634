//! Piece possession bit-vectors, remote and local.
//!
//! Bit order is most-significant-first within each byte: piece `i` lives at
//! byte `i / 8`, bit `7 - i % 8`.

use bytes::Bytes;

use super::{PieceIndex, TorrentError};
use crate::storage::{BitfieldStore, StorageError};

/// Bitfield representing which pieces a peer has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceBitfield {
    bits: Vec<u8>,
    piece_count: u32,
}

impl PieceBitfield {
    /// Create empty bitfield for given number of pieces
    pub fn new(piece_count: u32) -> Self {
        Self {
            bits: vec![0u8; piece_count.div_ceil(8) as usize],
            piece_count,
        }
    }

    /// Create bitfield with every piece present
    pub fn full(piece_count: u32) -> Self {
        let mut bitfield = Self::new(piece_count);
        for index in 0..piece_count {
            bitfield.set_piece(PieceIndex::new(index));
        }
        bitfield
    }

    /// Create bitfield from raw bytes received from a peer.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Invalid bitfield size for piece count
    pub fn from_bytes(bits: &[u8], piece_count: u32) -> Result<Self, TorrentError> {
        let expected_bytes = piece_count.div_ceil(8) as usize;
        if bits.len() != expected_bytes {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "Invalid bitfield size: expected {expected_bytes} bytes for {piece_count} pieces, got {}",
                    bits.len()
                ),
            });
        }

        Ok(Self {
            bits: bits.to_vec(),
            piece_count,
        })
    }

    /// Check if the bit for `piece_index` is set
    pub fn has_piece(&self, piece_index: PieceIndex) -> bool {
        let index = piece_index.as_u32();
        if index >= self.piece_count {
            return false;
        }

        let byte_index = (index / 8) as usize;
        let bit_index = 7 - (index % 8);
        self.bits[byte_index] & (1 << bit_index) != 0
    }

    /// Set the bit for `piece_index`; idempotent, out-of-range is ignored
    pub fn set_piece(&mut self, piece_index: PieceIndex) {
        let index = piece_index.as_u32();
        if index >= self.piece_count {
            return;
        }

        let byte_index = (index / 8) as usize;
        let bit_index = 7 - (index % 8);
        self.bits[byte_index] |= 1 << bit_index;
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Number of set bits
    pub fn count(&self) -> u32 {
        (0..self.piece_count)
            .filter(|&i| self.has_piece(PieceIndex::new(i)))
            .count() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Copy suitable for a wire `Bitfield` message
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }
}

/// Local download progress backed by a persistence store.
///
/// Loaded once at startup and rewritten in full on every newly set bit. A
/// bit is visible in memory only once the store holds it.
pub struct ProgressBitfield {
    bits: PieceBitfield,
    completed: u32,
    store: Box<dyn BitfieldStore>,
}

impl ProgressBitfield {
    /// Loads progress from `store`, resizing it to exactly `ceil(piece_count / 8)` bytes.
    ///
    /// # Errors
    /// - `StorageError` - Backing store could not be resized or read
    pub async fn load(
        piece_count: u32,
        mut store: Box<dyn BitfieldStore>,
    ) -> Result<Self, StorageError> {
        let byte_len = piece_count.div_ceil(8) as usize;
        let mut bytes = store.load(byte_len).await?;
        bytes.resize(byte_len, 0);

        // Spare bits past the last piece are never trusted
        let mut bits = PieceBitfield::new(piece_count);
        for index in 0..piece_count {
            let byte = bytes[(index / 8) as usize];
            if byte & (1 << (7 - index % 8)) != 0 {
                bits.set_piece(PieceIndex::new(index));
            }
        }

        let completed = bits.count();
        Ok(Self {
            bits,
            completed,
            store,
        })
    }

    pub fn has_piece(&self, index: PieceIndex) -> bool {
        self.bits.has_piece(index)
    }

    /// Persists the whole vector with `index` set, then sets the bit.
    ///
    /// Returns `false` without touching the store when the bit was already set.
    /// On error the in-memory vector is unchanged.
    ///
    /// # Errors
    /// - `StorageError` - Persisting the updated vector failed
    pub async fn mark_piece(&mut self, index: PieceIndex) -> Result<bool, StorageError> {
        if self.bits.has_piece(index) || index.as_u32() >= self.bits.piece_count() {
            return Ok(false);
        }

        let mut updated = self.bits.clone();
        updated.set_piece(index);
        self.store.persist(updated.as_bytes()).await?;

        self.bits = updated;
        self.completed += 1;
        Ok(true)
    }

    pub fn piece_count(&self) -> u32 {
        self.bits.piece_count()
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.bits.piece_count()
    }

    /// Indices not yet marked, ascending
    pub fn missing(&self) -> Vec<PieceIndex> {
        (0..self.bits.piece_count())
            .map(PieceIndex::new)
            .filter(|&i| !self.bits.has_piece(i))
            .collect()
    }

    pub fn bits(&self) -> &PieceBitfield {
        &self.bits
    }

    pub fn snapshot(&self) -> PieceBitfield {
        self.bits.clone()
    }
}
