//! Handle wrappers owned by the reactor.

use std::collections::VecDeque;

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::Interest;

use crate::buffer::Buffer;
use crate::endpoint::Endpoint;

/// A TCP connection record: the stream, its identity, the pending send
/// queue, and the lifecycle flags.
///
/// Lifecycle: allocated on accept or connect, inserted into `node2stream`
/// only once startup completes (`started`), removed and dropped by the
/// idempotent shutdown path. The one logical deadline timer is referenced
/// through `timer_generation`: re-arming bumps the generation and older heap
/// entries become stale.
pub(crate) struct TcpConn {
    pub(crate) stream: TcpStream,
    pub(crate) node: Endpoint,
    pub(crate) interest: Interest,
    /// Present in `node2stream`; a `connection_status(true)` has fired.
    /// Connect-in-flight state lives in the reactor's `connecting` set.
    pub(crate) started: bool,
    /// Graceful close requested while sends were still queued; shut down
    /// once the queue drains.
    pub(crate) close_after_drain: bool,
    /// Payloads queued for this stream, written in order. `send_pos` is the
    /// progress into the front buffer.
    pub(crate) send_queue: VecDeque<Buffer>,
    pub(crate) send_pos: usize,
    pub(crate) timer_generation: u64,
}

impl TcpConn {
    pub(crate) fn new(stream: TcpStream, node: Endpoint, interest: Interest) -> Self {
        Self {
            stream,
            node,
            interest,
            started: false,
            close_after_drain: false,
            send_queue: VecDeque::new(),
            send_pos: 0,
            timer_generation: 0,
        }
    }

    pub(crate) fn has_pending_send(&self) -> bool {
        !self.send_queue.is_empty()
    }

    /// Invalidates any armed deadline and returns the generation for the
    /// next one.
    pub(crate) fn bump_timer(&mut self) -> u64 {
        self.timer_generation += 1;
        self.timer_generation
    }
}

/// A TCP listener record.
pub(crate) struct TcpListen {
    pub(crate) listener: TcpListener,
    pub(crate) node: Endpoint,
}

/// A bound UDP socket, used for both ingress and round-robin egress.
pub(crate) struct UdpSock {
    pub(crate) socket: UdpSocket,
    pub(crate) node: Endpoint,
    pub(crate) token: usize,
}
