//! The network pool: a single-threaded reactor owning every socket and
//! timer, fed through a thread-safe command queue.

mod conn;
mod reactor;
mod timer;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use ::config::Config;
use mio::{Poll, Token, Waker};
use tracing::{debug, error, instrument, warn};

use crate::alloc::AllocTracker;
use crate::buffer::Buffer;
use crate::callback::PoolCallback;
use crate::config::Settings;
use crate::endpoint::Endpoint;
use crate::error::Error;
use self::reactor::Reactor;

// Reserved token for the command-queue waker; connection, listener, and UDP
// socket tokens are allocated above ID_RANGE_START.
pub(crate) const WAKE_TOKEN: Token = Token(2);
pub(crate) const ID_RANGE_START: usize = 1000;

// One send request published by a producer. The payload was copied into a
// tracked buffer before the queue mutex was taken.
pub(crate) struct PendingSend {
    pub(crate) node: Endpoint,
    pub(crate) data: Buffer,
    pub(crate) auto_connect: bool,
}

/// Commands accumulated between wakeups. Bind and close are keyed maps (the
/// last command per endpoint wins within a batch); sends keep arrival order.
#[derive(Default)]
pub(crate) struct PendingOps {
    pub(crate) bind: HashMap<Endpoint, bool>,
    pub(crate) send: VecDeque<PendingSend>,
    pub(crate) close: HashMap<Endpoint, bool>,
    pub(crate) want_exit: bool,
}

impl PendingOps {
    // Moves the queued commands out, leaving the shared state empty but
    // preserving the exit flag.
    pub(crate) fn drain(&mut self) -> PendingOps {
        PendingOps {
            bind: std::mem::take(&mut self.bind),
            send: std::mem::take(&mut self.send),
            close: std::mem::take(&mut self.close),
            want_exit: self.want_exit,
        }
    }
}

// State shared between producers and the loop thread.
pub(crate) struct Shared {
    pub(crate) pending: Mutex<PendingOps>,
    pub(crate) waker: Waker,
    pub(crate) tracker: Arc<AllocTracker>,
}

impl Shared {
    fn wake(&self) {
        // A failed wake means the poll is gone; the reactor is exiting and
        // will drain (or drop) whatever was queued.
        if let Err(err) = self.waker.wake() {
            warn!(?err, "failed to wake network pool loop");
        }
    }

    fn bind(&self, node: &Endpoint, bind: bool) {
        {
            let mut pending = self.pending.lock().expect("pool command queue poisoned");
            pending.bind.insert(node.clone(), bind);
        }
        self.wake();
    }

    fn send(&self, node: &Endpoint, data: &[u8], auto_connect: bool) -> bool {
        // Copy outside the lock: producers never hold the mutex across
        // anything slower than a queue push.
        let data = Buffer::from_slice(&self.tracker, data);
        {
            let mut pending = self.pending.lock().expect("pool command queue poisoned");
            if pending.want_exit {
                return false;
            }
            pending.send.push_back(PendingSend {
                node: node.clone(),
                data,
                auto_connect,
            });
        }
        self.wake();
        true
    }

    fn close(&self, node: &Endpoint, force: bool) {
        {
            let mut pending = self.pending.lock().expect("pool command queue poisoned");
            pending.close.insert(node.clone(), force);
        }
        self.wake();
    }
}

/// A reusable network connection pool.
///
/// The constructor spawns the loop thread that owns every socket, timer, and
/// in-flight transfer. Applications publish work through [`bind`], [`send`],
/// and [`close`] (all callable from any thread) and observe results through
/// the [`PoolCallback`] upcalls, which are delivered on the loop thread.
///
/// Dropping the pool tears everything down: every listener reports
/// `bind_status(node, false)`, every live or connecting peer reports
/// `connection_status(node, false)`, and every queued payload is returned
/// through `dropped` before the loop thread exits.
///
/// [`bind`]: NetworkPool::bind
/// [`send`]: NetworkPool::send
/// [`close`]: NetworkPool::close
pub struct NetworkPool {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl NetworkPool {
    /// Creates a pool and spawns its loop thread.
    ///
    /// # Errors
    ///
    /// Fails when the OS poll or its waker cannot be created; nothing is
    /// spawned in that case and the pool is unusable.
    pub fn new(callback: Arc<dyn PoolCallback>, config: &Config) -> Result<Self, Error> {
        Self::new_named(callback, config, "")
    }

    /// Creates a pool whose settings are resolved with `{name}.{key}`
    /// configuration priority (see [`Settings`]).
    pub fn new_named(
        callback: Arc<dyn PoolCallback>,
        config: &Config,
        name: &str,
    ) -> Result<Self, Error> {
        let settings = Settings::from_config_named(config, name);
        Self::with_settings(callback, settings)
    }

    /// Creates a pool from already-resolved settings.
    pub fn with_settings(
        callback: Arc<dyn PoolCallback>,
        settings: Settings,
    ) -> Result<Self, Error> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        let tracker = Arc::new(AllocTracker::new());
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingOps::default()),
            waker,
            tracker: tracker.clone(),
        });

        let reactor = Reactor::new(poll, callback, settings, tracker, shared.clone());
        let thread = std::thread::Builder::new()
            .name("netpool-loop".to_string())
            .spawn(move || {
                if let Err(err) = reactor.run() {
                    error!(?err, "network pool loop terminated with error");
                }
            })?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Requests a bind (`bind = true`) or unbind (`false`) of `node`.
    ///
    /// Thread-safe and non-blocking; the outcome arrives as exactly one
    /// `bind_status` upcall per command. Binding an endpoint that is already
    /// bound re-reports `bind_status(node, true)`.
    #[instrument(skip(self))]
    pub fn bind(&self, node: &Endpoint, bind: bool) {
        self.shared.bind(node, bind);
    }

    /// Queues `data` for delivery to `node`.
    ///
    /// Thread-safe; returns immediately after copying the payload. With
    /// `auto_connect` set, a missing TCP peer is dialed first and the
    /// payload waits for the connect to complete. Without it, a send to an
    /// unknown peer is reported straight back through `dropped`.
    ///
    /// Exactly one of two things happens to every accepted payload: its
    /// bytes enter the socket's write path, or it comes back through the
    /// `dropped` upcall. Returns `false` only when the pool is shutting
    /// down.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn send(&self, node: &Endpoint, data: &[u8], auto_connect: bool) -> bool {
        self.shared.send(node, data, auto_connect)
    }

    /// Requests closing the connection to `node`.
    ///
    /// Graceful by default: queued sends drain (bounded by the send
    /// deadline) before the FIN. `force` closes immediately. Repeated
    /// closes of the same peer produce at most one `connection_status(node,
    /// false)`.
    #[instrument(skip(self))]
    pub fn close(&self, node: &Endpoint, force: bool) {
        self.shared.close(node, force);
    }

    /// A cloneable, thread-safe handle to this pool's publish API.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: self.shared.clone(),
        }
    }

    /// The pool's live-memory accounting.
    pub fn tracker(&self) -> &Arc<AllocTracker> {
        &self.shared.tracker
    }
}

impl Drop for NetworkPool {
    fn drop(&mut self) {
        debug!("shutting down network pool");
        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .expect("pool command queue poisoned");
            pending.want_exit = true;
        }
        self.shared.wake();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("network pool loop thread panicked");
            }
        }
    }
}

/// Thread-safe handle for publishing into a [`NetworkPool`] from other
/// threads (worker pools, request handlers).
///
/// Clones share the same command queue; the handle does not keep the loop
/// alive - publishing after the pool dropped is a no-op (`send` returns
/// `false`).
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl PoolHandle {
    /// See [`NetworkPool::bind`].
    pub fn bind(&self, node: &Endpoint, bind: bool) {
        self.shared.bind(node, bind);
    }

    /// See [`NetworkPool::send`].
    pub fn send(&self, node: &Endpoint, data: &[u8], auto_connect: bool) -> bool {
        self.shared.send(node, data, auto_connect)
    }

    /// See [`NetworkPool::close`].
    pub fn close(&self, node: &Endpoint, force: bool) {
        self.shared.close(node, force);
    }

    /// The pool's live-memory accounting.
    pub fn tracker(&self) -> &Arc<AllocTracker> {
        &self.shared.tracker
    }
}
