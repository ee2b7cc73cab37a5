//! Queue access
//!
//! The session consumes the queue only through the [`Queue`] trait: the head
//! entry, its length and total duration, the three loop flags and `next()`.
//! [`TrackQueue`] is the in-memory implementation used by the binary.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::source::AudioSource;

/// One entry of a destination's queue
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Queue entry UUID
    pub queue_entry_id: Uuid,

    /// Track to play
    pub source: Arc<dyn AudioSource>,

    /// Display name of whoever added the entry
    pub requested_by: Option<String>,
}

impl QueueItem {
    pub fn new(source: Arc<dyn AudioSource>) -> Self {
        Self {
            queue_entry_id: Uuid::new_v4(),
            source,
            requested_by: None,
        }
    }

    pub fn requested_by(mut self, name: impl Into<String>) -> Self {
        self.requested_by = Some(name.into());
        self
    }
}

/// Ordered pending tracks plus loop-mode flags
///
/// Implementations serialize their own mutations; the session never holds a
/// queue borrow across an await point.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Entry at `index` (0 is the head)
    fn get(&self, index: usize) -> Option<QueueItem>;

    fn head(&self) -> Option<QueueItem> {
        self.get(0)
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the lengths of every entry still in the queue, head included
    fn total_remaining_seconds(&self) -> u64;

    /// Repeat the head track
    fn loop_enabled(&self) -> bool;
    fn set_loop_enabled(&self, enabled: bool);

    /// Re-append finished tracks to the back
    fn queue_loop_enabled(&self) -> bool;
    fn set_queue_loop_enabled(&self, enabled: bool);

    /// Repeat the head track exactly once more
    fn once_loop_enabled(&self) -> bool;
    fn set_once_loop_enabled(&self, enabled: bool);

    /// Advance past the current head
    async fn next(&self);
}

#[derive(Debug, Default)]
struct TrackQueueInner {
    items: VecDeque<QueueItem>,
    loop_enabled: bool,
    queue_loop_enabled: bool,
    once_loop_enabled: bool,
}

/// In-memory queue
#[derive(Debug, Default)]
pub struct TrackQueue {
    inner: Mutex<TrackQueueInner>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackQueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an entry; returns its 0-based position
    pub fn push(&self, item: QueueItem) -> usize {
        let mut inner = self.lock();
        inner.items.push_back(item);
        inner.items.len() - 1
    }

    /// Remove an entry by queue entry ID
    ///
    /// Returns true if the entry was found and removed.
    pub fn remove(&self, queue_entry_id: Uuid) -> bool {
        let mut inner = self.lock();
        match inner
            .items
            .iter()
            .position(|item| item.queue_entry_id == queue_entry_id)
        {
            Some(index) => {
                inner.items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.lock().items.clear();
    }

    /// URLs of every entry, head first
    pub fn urls(&self) -> Vec<String> {
        self.lock()
            .items
            .iter()
            .map(|item| item.source.url().to_string())
            .collect()
    }
}

#[async_trait]
impl Queue for TrackQueue {
    fn get(&self, index: usize) -> Option<QueueItem> {
        self.lock().items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.lock().items.len()
    }

    fn total_remaining_seconds(&self) -> u64 {
        self.lock()
            .items
            .iter()
            .map(|item| item.source.duration_seconds())
            .sum()
    }

    fn loop_enabled(&self) -> bool {
        self.lock().loop_enabled
    }

    fn set_loop_enabled(&self, enabled: bool) {
        self.lock().loop_enabled = enabled;
    }

    fn queue_loop_enabled(&self) -> bool {
        self.lock().queue_loop_enabled
    }

    fn set_queue_loop_enabled(&self, enabled: bool) {
        self.lock().queue_loop_enabled = enabled;
    }

    fn once_loop_enabled(&self) -> bool {
        self.lock().once_loop_enabled
    }

    fn set_once_loop_enabled(&self, enabled: bool) {
        self.lock().once_loop_enabled = enabled;
    }

    async fn next(&self) {
        let mut inner = self.lock();
        let Some(finished) = inner.items.pop_front() else {
            return;
        };
        debug!(track = finished.source.url(), "Advancing queue");
        if inner.queue_loop_enabled {
            inner.items.push_back(finished);
        }
    }
}
