//! Live-memory accounting shared by every buffer the pool owns.

use std::sync::atomic::{AtomicI64, Ordering};

/// Counts live bytes and live allocations across a pool.
///
/// Every [`Buffer`](crate::Buffer) reports its backing allocation here, so an
/// application can gauge memory pressure before enqueueing more work. Both
/// counters return to their pre-construction values once the pool and all
/// buffers handed out through callbacks have been dropped.
#[derive(Debug, Default)]
pub struct AllocTracker {
    bytes: AtomicI64,
    objects: AtomicI64,
}

impl AllocTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes currently allocated.
    pub fn live_bytes(&self) -> i64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Number of live allocations.
    pub fn live_objects(&self) -> i64 {
        self.objects.load(Ordering::Relaxed)
    }

    pub(crate) fn on_alloc(&self, size: usize) {
        self.bytes.fetch_add(size as i64, Ordering::Relaxed);
        self.objects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_free(&self, size: usize) {
        self.bytes.fetch_sub(size as i64, Ordering::Relaxed);
        self.objects.fetch_sub(1, Ordering::Relaxed);
    }

    /// Adjusts the byte counter when an existing allocation is resized.
    pub(crate) fn on_realloc(&self, old_size: usize, new_size: usize) {
        self.bytes
            .fetch_add(new_size as i64 - old_size as i64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_alloc_and_free() {
        let tracker = AllocTracker::new();
        assert_eq!(tracker.live_bytes(), 0);
        assert_eq!(tracker.live_objects(), 0);

        tracker.on_alloc(128);
        tracker.on_alloc(64);
        assert_eq!(tracker.live_bytes(), 192);
        assert_eq!(tracker.live_objects(), 2);

        tracker.on_realloc(64, 256);
        assert_eq!(tracker.live_bytes(), 384);
        assert_eq!(tracker.live_objects(), 2);

        tracker.on_free(128);
        tracker.on_free(256);
        assert_eq!(tracker.live_bytes(), 0);
        assert_eq!(tracker.live_objects(), 0);
    }
}
