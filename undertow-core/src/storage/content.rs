//! Content store implementations: one blob file on disk, or memory.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{ContentStore, StorageError, check_bounds};

/// Content store backed by a single blob file sized to the total length.
pub struct FileContentStore {
    path: PathBuf,
    file: Mutex<File>,
    length: u64,
}

impl FileContentStore {
    /// Opens or creates the blob at `path` and sizes it to `length` bytes.
    ///
    /// Existing contents below `length` are kept so a restarted download can
    /// serve pieces its progress bitfield already marks.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Parent directory, open or resize failed
    pub async fn open(path: impl AsRef<Path>, length: u64) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        file.set_len(length).await?;

        tracing::debug!(path = %path.display(), length, "Opened content store");
        Ok(Self {
            path,
            file: Mutex::new(file),
            length,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContentStore for FileContentStore {
    async fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>, StorageError> {
        check_bounds(offset, length as u64, self.length)?;

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len() as u64, self.length)?;

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.length
    }
}

/// In-memory content store, cloneable so tests can inspect what was written.
#[derive(Clone)]
pub struct MemoryContentStore {
    data: Arc<parking_lot::Mutex<Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new(length: u64) -> Self {
        Self {
            data: Arc::new(parking_lot::Mutex::new(vec![0u8; length as usize])),
        }
    }

    /// Store pre-filled with `data`, e.g. for a seeding peer
    pub fn with_contents(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(parking_lot::Mutex::new(data)),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>, StorageError> {
        let data = self.data.lock();
        check_bounds(offset, length as u64, data.len() as u64)?;
        let start = offset as usize;
        Ok(data[start..start + length].to_vec())
    }

    async fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.lock();
        check_bounds(offset, bytes.len() as u64, data.len() as u64)?;
        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.lock().len() as u64
    }
}
