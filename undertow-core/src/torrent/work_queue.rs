//! Shared pool of undone piece-download jobs.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::bitfield::PieceBitfield;
use super::{PieceIndex, TorrentError};

/// Immutable description of one undone piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceJob {
    pub index: PieceIndex,
    pub expected_hash: [u8; 20],
    /// Nominal piece length, truncated for the final piece
    pub length: u32,
}

/// FIFO job queue shared by every peer worker.
///
/// Capacity is fixed at the piece count; a job is only ever held by one
/// worker or by the queue, so pushes past capacity signal a scheduling bug.
/// Redelivery is at-least-once: a requeued job may return to the worker that
/// just gave it up.
#[derive(Debug)]
pub struct PieceWorkQueue {
    jobs: Mutex<VecDeque<PieceJob>>,
    capacity: usize,
    available: Notify,
}

impl PieceWorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            available: Notify::new(),
        }
    }

    /// Appends a job and wakes every waiting worker.
    ///
    /// # Errors
    /// - `TorrentError::WorkQueueFull` - Queue already holds `capacity` jobs
    pub fn push(&self, job: PieceJob) -> Result<(), TorrentError> {
        {
            let mut jobs = self.jobs.lock();
            if jobs.len() >= self.capacity {
                return Err(TorrentError::WorkQueueFull {
                    capacity: self.capacity,
                });
            }
            jobs.push_back(job);
        }
        self.available.notify_waiters();
        Ok(())
    }

    /// Removes the oldest job, if any.
    pub fn pop(&self) -> Option<PieceJob> {
        self.jobs.lock().pop_front()
    }

    /// Removes the oldest job whose piece `bitfield` advertises.
    ///
    /// Jobs the peer lacks stay where they are for other workers.
    pub fn pop_for(&self, bitfield: &PieceBitfield) -> Option<PieceJob> {
        let mut jobs = self.jobs.lock();
        let position = jobs.iter().position(|job| bitfield.has_piece(job.index))?;
        jobs.remove(position)
    }

    /// Waits for a job whose piece `bitfield` advertises.
    ///
    /// Waiters re-check on every push, so a job requeued by another worker or
    /// a bitfield that grew since the last check is picked up. Callers that
    /// learn new remote pieces while waiting must call again with the
    /// updated bitfield.
    pub async fn next_job_for(&self, bitfield: &PieceBitfield) -> PieceJob {
        loop {
            let notified = self.available.notified();
            if let Some(job) = self.pop_for(bitfield) {
                return job;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn job(index: u32) -> PieceJob {
        PieceJob {
            index: PieceIndex::new(index),
            expected_hash: [index as u8; 20],
            length: 16,
        }
    }

    #[test]
    fn test_fifo_order_and_capacity() {
        let queue = PieceWorkQueue::new(2);
        queue.push(job(0)).unwrap();
        queue.push(job(1)).unwrap();

        assert!(matches!(
            queue.push(job(2)),
            Err(TorrentError::WorkQueueFull { capacity: 2 })
        ));
        assert_eq!(queue.pop().unwrap().index, PieceIndex::new(0));
        assert_eq!(queue.pop().unwrap().index, PieceIndex::new(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_for_skips_missing_pieces() {
        let queue = PieceWorkQueue::new(4);
        for i in 0..4 {
            queue.push(job(i)).unwrap();
        }

        let mut bitfield = PieceBitfield::new(4);
        bitfield.set_piece(PieceIndex::new(2));

        assert_eq!(queue.pop_for(&bitfield).unwrap().index, PieceIndex::new(2));
        assert!(queue.pop_for(&bitfield).is_none());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().index, PieceIndex::new(0));
    }

    #[tokio::test]
    async fn test_waiter_woken_by_requeue() {
        let queue = Arc::new(PieceWorkQueue::new(4));
        let bitfield = PieceBitfield::full(4);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next_job_for(&bitfield).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(job(3)).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.index, PieceIndex::new(3));
    }

    #[tokio::test]
    async fn test_concurrent_consumers_take_each_job_once() {
        let queue = Arc::new(PieceWorkQueue::new(64));
        for i in 0..64 {
            queue.push(job(i)).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(job) = queue.pop() {
                    taken.push(job.index.as_u32());
                    tokio::task::yield_now().await;
                }
                taken
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..64).collect::<Vec<_>>());
    }
}
