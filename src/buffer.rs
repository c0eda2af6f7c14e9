//! Owned byte buffers with live-memory accounting.

use crate::alloc::AllocTracker;
use std::fmt;
use std::sync::Arc;

/// An owned, resizable byte region tied to an [`AllocTracker`].
///
/// Every buffer the pool queues, writes, or hands to a callback is one of
/// these; the tracker's byte and object counters follow the backing
/// allocation through grow, shrink, transfer, and drop. Buffers are never
/// aliased - handing one to an I/O path is a move, and [`Buffer::take`]
/// leaves the source empty.
pub struct Buffer {
    data: Vec<u8>,
    tracker: Arc<AllocTracker>,
}

impl Buffer {
    /// Creates an empty buffer. No allocation is counted until bytes arrive.
    pub fn new(tracker: &Arc<AllocTracker>) -> Self {
        Self {
            data: Vec::new(),
            tracker: tracker.clone(),
        }
    }

    /// Creates a zero-filled buffer of `length` bytes.
    pub fn with_length(tracker: &Arc<AllocTracker>, length: usize) -> Self {
        let mut buf = Self::new(tracker);
        buf.resize(length, 0);
        buf
    }

    /// Creates a buffer holding a copy of `data`.
    pub fn from_slice(tracker: &Arc<AllocTracker>, data: &[u8]) -> Self {
        let mut buf = Self::new(tracker);
        buf.set(data);
        buf
    }

    /// Replaces the contents with a copy of `data`, reusing capacity when
    /// possible.
    pub fn set(&mut self, data: &[u8]) {
        if data.len() > self.data.capacity() {
            self.reallocate(data.len());
        }
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    /// Resizes to `prefer_length` bytes, preserving at most
    /// `preserve_length` bytes of the existing prefix. Bytes beyond the
    /// preserved prefix are zeroed.
    pub fn resize(&mut self, prefer_length: usize, preserve_length: usize) {
        let keep = preserve_length.min(self.data.len()).min(prefer_length);
        if prefer_length > self.data.capacity() {
            let old = self.data.capacity();
            let mut grown = Vec::with_capacity(prefer_length);
            grown.extend_from_slice(&self.data[..keep]);
            if old == 0 {
                self.tracker.on_alloc(grown.capacity());
            } else {
                self.tracker.on_realloc(old, grown.capacity());
            }
            self.data = grown;
        }
        self.data.truncate(keep);
        self.data.resize(prefer_length, 0);
    }

    /// Moves the contents out, leaving this buffer empty.
    ///
    /// The returned buffer carries the allocation (and its accounting); the
    /// source keeps its tracker and can be refilled.
    pub fn take(&mut self) -> Buffer {
        let data = std::mem::take(&mut self.data);
        Buffer {
            data,
            tracker: self.tracker.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    // Replaces the backing allocation with one of `capacity` bytes, keeping
    // the accounting straight. Contents are not preserved.
    fn reallocate(&mut self, capacity: usize) {
        let old = self.data.capacity();
        let new: Vec<u8> = Vec::with_capacity(capacity);
        let new_cap = new.capacity();
        self.data = new;
        match (old, new_cap) {
            (0, 0) => {}
            (0, _) => self.tracker.on_alloc(new_cap),
            (_, 0) => self.tracker.on_free(old),
            (_, _) => self.tracker.on_realloc(old, new_cap),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.data.capacity() > 0 {
            self.tracker.on_free(self.data.capacity());
        }
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.data.len())
            .field("capacity", &self.data.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> Arc<AllocTracker> {
        Arc::new(AllocTracker::new())
    }

    #[test]
    fn set_and_resize_preserve_prefix() {
        let trace = tracker();
        let mut buf = Buffer::from_slice(&trace, b"hello world");
        assert_eq!(buf.as_slice(), b"hello world");

        buf.resize(5, 5);
        assert_eq!(buf.as_slice(), b"hello");

        buf.resize(8, 5);
        assert_eq!(&buf.as_slice()[..5], b"hello");
        assert_eq!(&buf.as_slice()[5..], &[0, 0, 0]);
    }

    #[test]
    fn take_leaves_source_empty() {
        let trace = tracker();
        let mut buf = Buffer::from_slice(&trace, b"payload");
        let moved = buf.take();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 0);
        assert_eq!(moved.as_slice(), b"payload");
    }

    #[test]
    fn tracker_returns_to_baseline() {
        let trace = tracker();
        {
            let mut a = Buffer::from_slice(&trace, &[7u8; 100]);
            let b = Buffer::with_length(&trace, 50);
            assert!(trace.live_bytes() >= 150);
            assert_eq!(trace.live_objects(), 2);
            let c = a.take();
            drop(b);
            drop(c);
        }
        assert_eq!(trace.live_bytes(), 0);
        assert_eq!(trace.live_objects(), 0);
    }
}
