//! Offline queue policy - ordering, overflow, and retry arithmetic.
//!
//! The durable queue itself lives in the client's local store; this module
//! owns the decisions so they stay deterministic and unit-testable:
//!
//! 1. Drain order: priority descending, then `created_at` ascending,
//!    arrival order breaking ties (stable sort)
//! 2. Overflow: evict the oldest ~10% rather than reject new writes -
//!    new local intent outranks very old queued intent
//! 3. Retry: linear backoff (`retry_count * base_delay`), bounded by a
//!    retry ceiling after which a change is dead-lettered

use crate::change::PendingChange;
use std::time::Duration;

/// Policy knobs for the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Maximum queued (unsynced) changes before eviction kicks in
    pub max_size: usize,
    /// Dispatch attempts before a change is dead-lettered
    pub max_retries: u32,
    /// Base unit of the linear backoff
    pub base_delay: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_retries: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl QueuePolicy {
    /// Number of oldest entries evicted when the queue overflows:
    /// ceil(max_size * 0.1).
    pub fn eviction_count(&self) -> usize {
        self.max_size.div_ceil(10)
    }

    /// True when a queue of `len` unsynced changes cannot take another
    /// entry without evicting.
    pub fn overflowed(&self, len: usize) -> bool {
        len >= self.max_size
    }

    /// Linear backoff before the next attempt. Deliberately not
    /// exponential: the queue is small and user-visible latency matters
    /// more than server load here.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        self.base_delay * retry_count
    }

    /// True once a change has used up its dispatch attempts.
    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Sort changes into dispatch order: priority desc, then `created_at`
    /// asc. The sort is stable, so equal keys keep arrival order and
    /// dependent edits to the same entity are never reordered.
    pub fn sort_for_drain(changes: &mut [PendingChange]) {
        changes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
    }
}
