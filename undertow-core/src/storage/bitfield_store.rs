//! Flat-file and in-memory persistence for the progress bitfield.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::{BitfieldStore, StorageError};

/// Progress bitfield stored as a raw byte dump.
///
/// The file is opened lazily on `load` and kept open for the rewrites that
/// follow every newly marked piece.
pub struct FileBitfieldStore {
    path: PathBuf,
    file: Option<File>,
}

impl FileBitfieldStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    async fn file(&mut self) -> Result<&mut File, StorageError> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)
                .await?;
            self.file = Some(file);
        }

        self.file.as_mut().ok_or_else(|| StorageError::FilesystemError {
            message: format!("Bitfield file {} not open", self.path.display()),
        })
    }
}

#[async_trait]
impl BitfieldStore for FileBitfieldStore {
    async fn load(&mut self, byte_len: usize) -> Result<Vec<u8>, StorageError> {
        let file = self.file().await?;
        file.set_len(byte_len as u64).await?;
        file.seek(SeekFrom::Start(0)).await?;

        let mut bytes = vec![0u8; byte_len];
        file.read_exact(&mut bytes).await?;
        Ok(bytes)
    }

    async fn persist(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        let file = self.file().await?;
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

/// In-memory bitfield store; clones share the same bytes.
#[derive(Clone, Default)]
pub struct MemoryBitfieldStore {
    bytes: Arc<parking_lot::Mutex<Vec<u8>>>,
}

impl MemoryBitfieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

#[async_trait]
impl BitfieldStore for MemoryBitfieldStore {
    async fn load(&mut self, byte_len: usize) -> Result<Vec<u8>, StorageError> {
        let mut bytes = self.bytes.lock();
        bytes.resize(byte_len, 0);
        Ok(bytes.clone())
    }

    async fn persist(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        let mut stored = self.bytes.lock();
        stored.clear();
        stored.extend_from_slice(bytes);
        Ok(())
    }
}
