//! The upcall contract between the pool and the application.

use crate::alloc::AllocTracker;
use crate::buffer::Buffer;
use crate::endpoint::Endpoint;
use std::sync::Arc;

/// Callbacks delivered by the pool's loop thread.
///
/// Every method is invoked on the reactor thread, one at a time, and must
/// return promptly - the loop makes no progress while a callback runs. It is
/// safe to publish from inside a callback through the thread-safe API
/// ([`PoolHandle`](crate::PoolHandle) or the pool's own `bind`/`send`/`close`
/// methods); anything else the pool owns must not be touched.
///
/// Delivery guarantees per peer endpoint: the callback sequence is a prefix
/// of `connection_status(up) · message* · connection_status(down)`. A
/// `dropped` before the down means that particular send failed; after the
/// down it means the connection terminated with the payload still queued.
pub trait PoolCallback: Send + Sync {
    /// One payload received from `node`.
    fn message(&self, node: &Endpoint, data: &[u8]);

    /// A payload that will never be sent. The buffer is handed back so the
    /// application can reclaim or account for it.
    fn dropped(&self, node: &Endpoint, data: &[u8]);

    /// Result of a bind or unbind command, and listener teardown notices.
    fn bind_status(&self, node: &Endpoint, success: bool);

    /// `true` exactly once after a successful TCP startup (accept or
    /// connect), `false` exactly once after shutdown of a started
    /// connection. A connect that never completes reports `false` once.
    fn connection_status(&self, node: &Endpoint, success: bool);

    /// Provides the buffer a read is received into.
    ///
    /// The default allocates a fresh tracked buffer of `suggested` bytes.
    /// Implementations may return a differently sized buffer (for example to
    /// cap per-connection memory); a zero-capacity buffer makes the read
    /// fail and shuts the connection down.
    fn allocate_for_message(
        &self,
        _node: &Endpoint,
        suggested: usize,
        tracker: &Arc<AllocTracker>,
    ) -> Buffer {
        Buffer::with_length(tracker, suggested)
    }

    /// Returns the buffer handed out by [`allocate_for_message`], after the
    /// `message` upcall (or after a failed read). Called exactly once per
    /// allocate, symmetric in every path.
    ///
    /// [`allocate_for_message`]: PoolCallback::allocate_for_message
    fn deallocate_for_message(&self, _node: &Endpoint, _buffer: Buffer) {}
}
