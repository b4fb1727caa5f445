// src/buffer_store.rs
//
// Bounded in-memory frame log backing live capture and replay.
// Oldest frames are evicted once the log reaches capacity; readers are told
// about changes through a revision counter they can watch.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use crate::io::CanFrame;

/// Default number of frames kept before eviction starts
pub const DEFAULT_CAPACITY: usize = 1_000_000;

// ============================================================================
// Types
// ============================================================================

/// One page of the log for display
#[derive(Clone, Debug, Serialize)]
pub struct FramePage {
    pub frames: Vec<CanFrame>,
    /// Total frames in the log when the page was taken
    pub total_count: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Ordered, bounded frame log.
///
/// Every mutation and read takes the same lock, so nobody observes a
/// half-evicted state. Index 0 is always the oldest retained frame.
pub struct FrameLog {
    frames: RwLock<VecDeque<CanFrame>>,
    capacity: usize,
    /// Bumped at least once per mutation batch
    revision: watch::Sender<u64>,
}

impl Default for FrameLog {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLog {
    /// Log with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Log holding at most `capacity` frames (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            frames: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
            revision,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<CanFrame>> {
        self.frames.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<CanFrame>> {
        self.frames.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Append one frame, evicting the oldest if the log is full
    pub fn append(&self, frame: CanFrame) {
        {
            let mut frames = self.write();
            if frames.len() >= self.capacity {
                frames.pop_front();
            }
            frames.push_back(frame);
        }
        self.bump();
    }

    /// Append many frames in order under one lock and one notification.
    /// Returns how many older frames were evicted.
    pub fn append_batch<I>(&self, batch: I) -> usize
    where
        I: IntoIterator<Item = CanFrame>,
    {
        let mut evicted = 0;
        let mut appended = 0;
        {
            let mut frames = self.write();
            for frame in batch {
                if frames.len() >= self.capacity {
                    frames.pop_front();
                    evicted += 1;
                }
                frames.push_back(frame);
                appended += 1;
            }
        }
        if appended > 0 {
            self.bump();
        }
        evicted
    }

    /// Drop every frame
    pub fn clear(&self) {
        let removed = {
            let mut frames = self.write();
            let n = frames.len();
            frames.clear();
            n
        };
        tlog!("[FrameLog] Cleared {} frames", removed);
        self.bump();
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frame at `index` (0 = oldest retained)
    pub fn get(&self, index: usize) -> Option<CanFrame> {
        self.read().get(index).cloned()
    }

    /// Every frame, oldest first
    pub fn snapshot(&self) -> Vec<CanFrame> {
        self.read().iter().cloned().collect()
    }

    /// Up to `limit` frames starting at `offset`
    pub fn page(&self, offset: usize, limit: usize) -> FramePage {
        let frames = self.read();
        FramePage {
            frames: frames.iter().skip(offset).take(limit).cloned().collect(),
            total_count: frames.len(),
            offset,
            limit,
        }
    }

    /// The most recent `limit` frames, oldest first
    pub fn tail(&self, limit: usize) -> Vec<CanFrame> {
        let frames = self.read();
        let start = frames.len().saturating_sub(limit);
        frames.iter().skip(start).cloned().collect()
    }

    // ========================================================================
    // Notification
    // ========================================================================

    /// Watch the revision counter. Changes may be coalesced; read the log
    /// after a notification rather than assuming what changed.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Current revision
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u32) -> CanFrame {
        CanFrame::data(id, false, &[id as u8])
    }

    fn ids(log: &FrameLog) -> Vec<u32> {
        log.snapshot().iter().map(|f| f.id).collect()
    }

    #[test]
    fn test_append_and_read() {
        let log = FrameLog::new();
        assert!(log.is_empty());
        assert_eq!(log.capacity(), DEFAULT_CAPACITY);

        log.append(frame(1));
        log.append(frame(2));
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(0).unwrap().id, 1);
        assert_eq!(log.get(1).unwrap().id, 2);
        assert!(log.get(2).is_none());
        assert_eq!(ids(&log), vec![1, 2]);
    }

    #[test]
    fn test_eviction_keeps_length_at_capacity() {
        let capacity = 5;
        let log = FrameLog::with_capacity(capacity);
        for id in 0..=capacity as u32 {
            log.append(frame(id));
        }
        assert_eq!(log.len(), capacity);
        // Frame 0 is gone; the frame that was at index 1 is now at 0
        assert_eq!(log.get(0).unwrap().id, 1);
        assert!(log.snapshot().iter().all(|f| f.id != 0));
        assert_eq!(log.get(capacity - 1).unwrap().id, capacity as u32);
    }

    #[test]
    fn test_append_batch_evicts_in_order() {
        let log = FrameLog::with_capacity(3);
        log.append(frame(0));
        let evicted = log.append_batch((1..=4).map(frame));
        assert_eq!(evicted, 2);
        assert_eq!(ids(&log), vec![2, 3, 4]);
    }

    #[test]
    fn test_clear() {
        let log = FrameLog::new();
        log.append_batch((0..10).map(frame));
        log.clear();
        assert!(log.is_empty());
        assert!(log.get(0).is_none());
        log.clear(); // idempotent
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn test_page_and_tail() {
        let log = FrameLog::new();
        log.append_batch((0..10).map(frame));

        let page = log.page(8, 5);
        assert_eq!(page.total_count, 10);
        assert_eq!(page.frames.iter().map(|f| f.id).collect::<Vec<_>>(), vec![8, 9]);
        assert!(log.page(20, 5).frames.is_empty());

        let tail: Vec<u32> = log.tail(3).iter().map(|f| f.id).collect();
        assert_eq!(tail, vec![7, 8, 9]);
        assert_eq!(log.tail(50).len(), 10);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = FrameLog::with_capacity(0);
        log.append(frame(1));
        log.append(frame(2));
        assert_eq!(ids(&log), vec![2]);
    }

    #[tokio::test]
    async fn test_subscribe_sees_mutations() {
        let log = FrameLog::new();
        let mut rx = log.subscribe();
        assert!(!rx.has_changed().unwrap());

        log.append(frame(1));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);

        // Batch = one bump; empty batch = none
        log.append_batch((2..5).map(frame));
        log.append_batch(std::iter::empty());
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 2);

        log.clear();
        assert!(rx.has_changed().unwrap());
        assert_eq!(log.revision(), 3);
    }
}
