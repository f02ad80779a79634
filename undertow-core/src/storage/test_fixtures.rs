//! Storage doubles that fail a fixed number of writes before recovering.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use super::{BitfieldStore, ContentStore, MemoryBitfieldStore, MemoryContentStore, StorageError};

fn injected_failure(what: &str) -> StorageError {
    StorageError::Io(std::io::Error::other(format!("injected {what} failure")))
}

/// Returns true while `remaining` still has failures to hand out.
fn take_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Bitfield store whose first `n` persists fail; clones share state.
#[derive(Clone)]
pub struct FlakyBitfieldStore {
    inner: MemoryBitfieldStore,
    remaining: Arc<AtomicU32>,
}

impl FlakyBitfieldStore {
    pub fn failing(n: u32) -> Self {
        Self {
            inner: MemoryBitfieldStore::new(),
            remaining: Arc::new(AtomicU32::new(n)),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner.contents()
    }
}

#[async_trait]
impl BitfieldStore for FlakyBitfieldStore {
    async fn load(&mut self, byte_len: usize) -> Result<Vec<u8>, StorageError> {
        self.inner.load(byte_len).await
    }

    async fn persist(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if take_failure(&self.remaining) {
            return Err(injected_failure("persist"));
        }
        self.inner.persist(bytes).await
    }
}

/// Content store whose first `n` writes fail; clones share state.
#[derive(Clone)]
pub struct FlakyContentStore {
    inner: MemoryContentStore,
    remaining: Arc<AtomicU32>,
}

impl FlakyContentStore {
    pub fn failing(length: u64, n: u32) -> Self {
        Self {
            inner: MemoryContentStore::new(length),
            remaining: Arc::new(AtomicU32::new(n)),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner.contents()
    }
}

#[async_trait]
impl ContentStore for FlakyContentStore {
    async fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>, StorageError> {
        self.inner.read_at(offset, length).await
    }

    async fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<(), StorageError> {
        if take_failure(&self.remaining) {
            return Err(injected_failure("write"));
        }
        self.inner.write_at(offset, bytes).await
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fails_then_recovers() {
        let store = FlakyContentStore::failing(4, 2);
        assert!(store.write_at(0, &[1]).await.is_err());
        assert!(store.write_at(0, &[1]).await.is_err());
        store.write_at(0, &[1]).await.unwrap();
        assert_eq!(store.contents(), vec![1, 0, 0, 0]);
    }
}
