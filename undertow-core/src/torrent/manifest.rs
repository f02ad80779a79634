//! Decoded content description: identity, piece hashes and file layout.

use super::work_queue::PieceJob;
use super::{InfoHash, PieceIndex};

/// Fully decoded torrent manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub info_hash: InfoHash,
    pub name: String,
    /// Nominal piece length; only the final piece may be shorter
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_length: u64,
    pub files: Vec<ManifestFile>,
    pub announce_urls: Vec<String>,
}

/// One file of the content, located by its offset in the contiguous store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile {
    /// Path components relative to the content directory
    pub path: Vec<String>,
    pub length: u64,
    pub offset: u64,
}

impl Manifest {
    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Absolute byte offset of the first byte of `index`.
    pub fn piece_offset(&self, index: PieceIndex) -> u64 {
        index.as_u32() as u64 * self.piece_length as u64
    }

    /// Length of `index`: the nominal length, truncated for the final piece.
    ///
    /// Returns 0 for indices past the end.
    pub fn piece_size(&self, index: PieceIndex) -> u32 {
        let offset = self.piece_offset(index);
        if offset >= self.total_length {
            return 0;
        }
        (self.total_length - offset).min(self.piece_length as u64) as u32
    }

    pub fn piece_hash(&self, index: PieceIndex) -> Option<&[u8; 20]> {
        self.piece_hashes.get(index.as_usize())
    }

    /// Download job describing `index`, if it exists.
    pub fn job(&self, index: PieceIndex) -> Option<PieceJob> {
        self.piece_hash(index).map(|hash| PieceJob {
            index,
            expected_hash: *hash,
            length: self.piece_size(index),
        })
    }
}
