//! An event-driven network connection pool with a thread-safe publish API.
//!
//! A single loop thread owns every socket, timer, and in-flight transfer.
//! Application code never touches a socket: it publishes commands (bind a
//! listener, send bytes, close a peer) through the pool's thread-safe API
//! and receives upcalls - connection up/down, message received, payload
//! dropped, bind succeeded/failed - through the [`PoolCallback`] trait,
//! delivered synchronously on the loop thread.
//!
//! - **One owner:** all transport state lives on the reactor thread; there
//!   is no shared mutable state between I/O paths.
//! - **Endpoint-addressed:** peers and listeners are identified by
//!   [`Endpoint`] values (`protocol`, `ip`, `port`), not by handles.
//! - **Deterministic resources:** every payload the pool accepts is either
//!   written to a socket or handed back through `dropped`; the
//!   [`AllocTracker`] counters return to baseline once the pool is gone.
//! - **Deadlines built in:** each TCP connection carries one timer covering
//!   whichever deadline applies - connect, idle, or send-drain.
//!
//! # Quick Start
//!
//! ```no_run
//! use netpool::{Endpoint, NetworkPool, PoolCallback, Protocol};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl PoolCallback for Echo {
//!     fn message(&self, node: &Endpoint, data: &[u8]) {
//!         println!("{} sent {} bytes", node, data.len());
//!     }
//!     fn dropped(&self, node: &Endpoint, data: &[u8]) {
//!         println!("{} dropped {} bytes", node, data.len());
//!     }
//!     fn bind_status(&self, node: &Endpoint, success: bool) {
//!         println!("bind {}: {}", node, success);
//!     }
//!     fn connection_status(&self, node: &Endpoint, success: bool) {
//!         println!("connection {}: {}", node, success);
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = config::Config::default();
//! let pool = NetworkPool::new(Arc::new(Echo), &config)?;
//!
//! // Listen for TCP connections.
//! let listener = Endpoint::from_parts(Protocol::Tcp, "127.0.0.1", 8080)?;
//! pool.bind(&listener, true);
//!
//! // Dial out and send in one step.
//! let peer = Endpoint::from_parts(Protocol::Tcp, "192.0.2.1", 9000)?;
//! pool.send(&peer, b"hello", true);
//! # Ok(())
//! # }
//! ```
//!
//! # Threading
//!
//! [`NetworkPool::bind`], [`NetworkPool::send`], and [`NetworkPool::close`]
//! are callable from any thread, as is the cloneable [`PoolHandle`].
//! Payload bytes are copied before the command queue's mutex is taken, so
//! producers never contend on I/O. Callbacks run on the loop thread, one at
//! a time; from inside a callback, only the publish API may be used.
//! [`WorkQueue`] runs CPU-bound request handling off the loop thread; tasks
//! talk back through a [`PoolHandle`].
//!
//! # Configuration
//!
//! Pools are configured through the [`config`](https://docs.rs/config/)
//! crate; see [`Settings`] for the key table and defaults. Named pools
//! resolve `{name}.{key}` before `{key}`:
//!
//! ```toml
//! tcp_idle_timeout_seconds = 60
//!
//! [edge]
//! tcp_backlog = 512
//! ```
//!
//! # HTTP framing
//!
//! [`HttpContext`] is a streaming HTTP/1.1 framer built for this pool's
//! receive path: one context per connection, bytes in any chunking, headers
//! and chunked bodies out. `demos/http_server.rs` wires it together with a
//! [`WorkQueue`] into a small keep-alive HTTP server.

mod alloc;
mod buffer;
mod callback;
mod config;
mod endpoint;
mod error;
mod http;
mod pool;
mod worker;

pub use alloc::AllocTracker;
pub use buffer::Buffer;
pub use callback::PoolCallback;
pub use config::Settings;
pub use endpoint::{Endpoint, Protocol};
pub use error::Error;
pub use http::{HttpContext, DEFAULT_MAX_BUFFER_SIZE};
pub use pool::{NetworkPool, PoolHandle};
pub use worker::{Task, WorkQueue};

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::alloc::AllocTracker;
    pub use crate::buffer::Buffer;
    pub use crate::callback::PoolCallback;
    pub use crate::config::Settings;
    pub use crate::endpoint::{Endpoint, Protocol};
    pub use crate::error::Error;
    pub use crate::http::HttpContext;
    pub use crate::pool::{NetworkPool, PoolHandle};
    pub use crate::worker::{Task, WorkQueue};
}
