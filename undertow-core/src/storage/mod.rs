//! Storage layer for downloaded content.
//!
//! Defines the byte-addressed content store, the progress bitfield
//! persistence surface and the final multi-file reassembly step.

pub mod bitfield_store;
pub mod content;
pub mod layout;
#[cfg(test)]
pub mod test_fixtures;

use std::path::PathBuf;

use async_trait::async_trait;
pub use bitfield_store::{FileBitfieldStore, MemoryBitfieldStore};
pub use content::{FileContentStore, MemoryContentStore};
pub use layout::assemble_files;

/// Single contiguous byte store holding every piece at its absolute offset.
///
/// Offsets are `piece_index * piece_length + begin`. Implementations must be
/// safe to share between the orchestrator and reassembly.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Reads exactly `length` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// - `StorageError::OutOfBounds` - Range extends past the end of the store
    /// - `StorageError::Io` - If file system operation failed
    async fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>, StorageError>;

    /// Writes `bytes` starting at `offset`.
    ///
    /// # Errors
    ///
    /// - `StorageError::OutOfBounds` - Range extends past the end of the store
    /// - `StorageError::Io` - If file system operation failed
    async fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<(), StorageError>;

    /// Total addressable length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persistence surface for the local progress bitfield.
#[async_trait]
pub trait BitfieldStore: Send + Sync {
    /// Resizes the backing store to exactly `byte_len` bytes, truncating or
    /// zero-padding, then returns its full contents.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If file system operation failed
    async fn load(&mut self, byte_len: usize) -> Result<Vec<u8>, StorageError>;

    /// Overwrites the whole backing store with `bytes`.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If file system operation failed
    async fn persist(&mut self, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Errors that occur during storage operations.
///
/// Covers file system errors, out-of-range access and invalid file layouts
/// during content storage and reassembly.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Access beyond the end of the content store
    #[error("Range {offset}+{length} exceeds store length {store_length}")]
    OutOfBounds {
        /// Start of the requested range
        offset: u64,
        /// Length of the requested range
        length: u64,
        /// Total length of the store
        store_length: u64,
    },

    /// File list entry would escape the output directory
    #[error("Invalid file path component in {path:?}")]
    InvalidPath {
        /// Offending path as declared in the manifest
        path: PathBuf,
    },

    /// File system specific error occurred
    #[error("File system error: {message}")]
    FilesystemError {
        /// Description of the file system error
        message: String,
    },

    /// Standard I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn check_bounds(offset: u64, length: u64, store_length: u64) -> Result<(), StorageError> {
    match offset.checked_add(length) {
        Some(end) if end <= store_length => Ok(()),
        _ => Err(StorageError::OutOfBounds {
            offset,
            length,
            store_length,
        }),
    }
}
