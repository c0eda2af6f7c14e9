//! The single-threaded event loop that owns every live handle.
//!
//! All maps here are touched only by the loop thread. Producers reach the
//! reactor exclusively through the shared command queue and its waker; the
//! reactor reaches the application exclusively through the callback trait,
//! invoked synchronously between I/O operations.

use std::collections::{HashMap, HashSet};
use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, SockRef, Socket, TcpKeepalive, Type};
use tracing::{debug, error, info, trace, warn};

use super::conn::{TcpConn, TcpListen, UdpSock};
use super::timer::{TimerQueue, TimerRole};
use super::{PendingOps, PendingSend, Shared, ID_RANGE_START, WAKE_TOKEN};
use crate::alloc::AllocTracker;
use crate::buffer::Buffer;
use crate::callback::PoolCallback;
use crate::config::Settings;
use crate::endpoint::{Endpoint, Protocol};
use crate::error::Error;

const POLL_CAPACITY: usize = 256;

// Read size suggested to allocate_for_message; implementations may return
// less.
const RECV_SUGGESTED_SIZE: usize = 64 * 1024;

pub(crate) struct Reactor {
    poll: Poll,
    callback: Arc<dyn PoolCallback>,
    settings: Settings,
    tracker: Arc<AllocTracker>,
    shared: Arc<Shared>,

    // Every live handle is owned by exactly one of these containers.
    conns: HashMap<usize, TcpConn>,
    tcp_servers: HashMap<usize, TcpListen>,
    node2server: HashMap<Endpoint, usize>,
    udp_servers: Vec<UdpSock>,
    udp_index: usize,

    // Only fully started peers: a connection_status(true) has fired and no
    // connection_status(false) yet.
    node2stream: HashMap<Endpoint, usize>,
    connecting: HashSet<usize>,
    // Payloads waiting for a connect to complete; an entry exists iff its
    // queue is non-empty.
    waiting_send: HashMap<Endpoint, Vec<Buffer>>,

    timers: TimerQueue,
    next_id: usize,
}

impl Reactor {
    pub(crate) fn new(
        poll: Poll,
        callback: Arc<dyn PoolCallback>,
        settings: Settings,
        tracker: Arc<AllocTracker>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            poll,
            callback,
            settings,
            tracker,
            shared,
            conns: HashMap::new(),
            tcp_servers: HashMap::new(),
            node2server: HashMap::new(),
            udp_servers: Vec::new(),
            udp_index: 0,
            node2stream: HashMap::new(),
            connecting: HashSet::new(),
            waiting_send: HashMap::new(),
            timers: TimerQueue::new(),
            next_id: ID_RANGE_START,
        }
    }

    /// Runs the loop until an exit is requested. Blocks the current thread.
    pub(crate) fn run(mut self) -> Result<(), Error> {
        let mut events = Events::with_capacity(POLL_CAPACITY);
        loop {
            let timeout = self.timers.next_timeout(Instant::now());
            self.poll.poll(&mut events, timeout)?;

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    let pending = self
                        .shared
                        .pending
                        .lock()
                        .expect("pool command queue poisoned")
                        .drain();
                    if pending.want_exit {
                        self.teardown(pending);
                        return Ok(());
                    }
                    self.process_pending(pending);
                } else {
                    self.dispatch(event.token().0, event.is_readable(), event.is_writable());
                }
            }

            self.fire_expired_timers();
        }
    }

    // ============================================================================
    // Command Processing
    // ============================================================================

    fn process_pending(&mut self, pending: PendingOps) {
        for (node, bind) in pending.bind {
            match node.protocol() {
                Protocol::Tcp => self.bind_tcp(node, bind),
                Protocol::Udp => self.bind_udp(node, bind),
            }
        }
        for request in pending.send {
            match request.node.protocol() {
                Protocol::Tcp => self.send_tcp(request),
                Protocol::Udp => self.send_udp(request),
            }
        }
        for (node, force) in pending.close {
            self.close_tcp(&node, force);
        }
    }

    fn bind_tcp(&mut self, node: Endpoint, bind: bool) {
        if let Some(&token) = self.node2server.get(&node) {
            if bind {
                // Already bound; re-report success.
                self.callback.bind_status(&node, true);
            } else {
                self.node2server.remove(&node);
                if let Some(mut server) = self.tcp_servers.remove(&token) {
                    let _ = self.poll.registry().deregister(&mut server.listener);
                }
                info!(%node, "listener closed");
                self.callback.bind_status(&node, false);
            }
        } else if bind {
            match self.bind_and_listen(&node) {
                Ok(()) => {
                    info!(%node, "listening for connections");
                    self.callback.bind_status(&node, true);
                }
                Err(err) => {
                    warn!(%node, ?err, "bind and listen failed");
                    self.callback.bind_status(&node, false);
                }
            }
        } else {
            self.callback.bind_status(&node, false);
        }
    }

    fn bind_and_listen(&mut self, node: &Endpoint) -> Result<(), Error> {
        let domain = if node.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::STREAM, Some(socket2::Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&node.addr().into())?;
        socket.listen(self.settings.tcp_backlog as i32)?;

        let mut listener = TcpListener::from_std(socket.into());
        let token = self.alloc_token();
        self.poll
            .registry()
            .register(&mut listener, Token(token), Interest::READABLE)?;
        self.tcp_servers.insert(
            token,
            TcpListen {
                listener,
                node: node.clone(),
            },
        );
        self.node2server.insert(node.clone(), token);
        Ok(())
    }

    fn bind_udp(&mut self, node: Endpoint, bind: bool) {
        if let Some(pos) = self.udp_servers.iter().position(|u| u.node == node) {
            if bind {
                self.callback.bind_status(&node, true);
            } else {
                let mut server = self.udp_servers.remove(pos);
                let _ = self.poll.registry().deregister(&mut server.socket);
                if self.udp_index >= self.udp_servers.len() {
                    self.udp_index = 0;
                }
                info!(%node, "udp socket closed");
                self.callback.bind_status(&node, false);
            }
        } else if bind {
            match self.bind_udp_socket(&node) {
                Ok(()) => {
                    info!(%node, "udp socket bound");
                    self.callback.bind_status(&node, true);
                }
                Err(err) => {
                    warn!(%node, ?err, "udp bind failed");
                    self.callback.bind_status(&node, false);
                }
            }
        } else {
            self.callback.bind_status(&node, false);
        }
    }

    fn bind_udp_socket(&mut self, node: &Endpoint) -> Result<(), Error> {
        let mut socket = UdpSocket::bind(node.addr())?;
        if self.settings.udp_ttl != 0 {
            socket.set_ttl(self.settings.udp_ttl)?;
        }
        let token = self.alloc_token();
        self.poll
            .registry()
            .register(&mut socket, Token(token), Interest::READABLE)?;
        self.udp_servers.push(UdpSock {
            socket,
            node: node.clone(),
            token,
        });
        Ok(())
    }

    fn send_tcp(&mut self, request: PendingSend) {
        let PendingSend {
            node,
            data,
            auto_connect,
        } = request;

        if let Some(&token) = self.node2stream.get(&node) {
            self.queue_write(token, vec![data]);
            return;
        }

        // An entry in waiting_send exists iff a connect is already in
        // flight for this endpoint.
        let connect_needed = !self.waiting_send.contains_key(&node);
        if connect_needed && !auto_connect {
            trace!(%node, "no connection and auto-connect off, dropping");
            self.callback.dropped(&node, data.as_slice());
            return;
        }

        self.waiting_send.entry(node.clone()).or_default().push(data);

        if connect_needed {
            match self.connect_tcp(&node) {
                Ok(token) => {
                    debug!(%node, "connecting");
                    self.connecting.insert(token);
                }
                Err(err) => {
                    warn!(%node, ?err, "connect failed");
                    self.callback.connection_status(&node, false);
                    self.drop_waiting(&node);
                }
            }
        }
    }

    fn connect_tcp(&mut self, node: &Endpoint) -> Result<usize, Error> {
        let mut stream = TcpStream::connect(node.addr())?;
        self.apply_stream_options(&stream)?;
        let token = self.alloc_token();
        self.poll
            .registry()
            .register(&mut stream, Token(token), Interest::WRITABLE)?;

        let mut conn = TcpConn::new(stream, node.clone(), Interest::WRITABLE);
        let generation = conn.bump_timer();
        self.timers.arm(
            token,
            generation,
            Duration::from_secs(self.settings.tcp_connect_timeout_seconds),
            TimerRole::Connect,
        );
        self.conns.insert(token, conn);
        Ok(token)
    }

    fn send_udp(&mut self, request: PendingSend) {
        let PendingSend { node, data, .. } = request;

        if self.udp_servers.is_empty() {
            // Egress needs a bound UDP socket; without one the datagram is
            // silently discarded.
            debug!(%node, "no udp socket bound, discarding datagram");
            return;
        }

        self.udp_index = (self.udp_index + 1) % self.udp_servers.len();
        let sender = &self.udp_servers[self.udp_index];
        match sender.socket.send_to(data.as_slice(), node.addr()) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                self.callback.dropped(&node, data.as_slice());
            }
            Err(err) => {
                let mut failed = self.udp_servers.remove(self.udp_index);
                error!(node = %failed.node, ?err, "udp send failed, closing socket");
                let _ = self.poll.registry().deregister(&mut failed.socket);
                if self.udp_index >= self.udp_servers.len() {
                    self.udp_index = 0;
                }
                self.callback.dropped(&node, data.as_slice());
                self.callback.bind_status(&failed.node, false);
            }
        }
    }

    fn close_tcp(&mut self, node: &Endpoint, force: bool) {
        let Some(&token) = self.node2stream.get(node) else {
            return;
        };
        let has_pending = self
            .conns
            .get(&token)
            .map(TcpConn::has_pending_send)
            .unwrap_or(false);
        if force || !has_pending {
            self.shutdown_tcp(token, false, !force);
        } else if let Some(conn) = self.conns.get_mut(&token) {
            // Drain first, FIN after; the send deadline bounds the drain.
            conn.close_after_drain = true;
            let generation = conn.bump_timer();
            self.timers.arm(
                token,
                generation,
                Duration::from_secs(self.settings.tcp_send_timeout_seconds),
                TimerRole::Send,
            );
        }
    }

    // ============================================================================
    // Event Dispatch
    // ============================================================================

    fn dispatch(&mut self, token: usize, readable: bool, writable: bool) {
        if self.tcp_servers.contains_key(&token) {
            self.accept_pending(token);
            return;
        }
        if self.udp_servers.iter().any(|u| u.token == token) {
            if readable {
                self.udp_readable(token);
            }
            return;
        }
        if self.connecting.contains(&token) {
            self.finish_connect(token);
            return;
        }
        if readable && self.conns.contains_key(&token) {
            self.conn_readable(token);
        }
        if writable && self.conns.contains_key(&token) {
            self.conn_writable(token);
        }
    }

    fn accept_pending(&mut self, token: usize) {
        // Accept everything first, register afterwards; the listener borrow
        // must end before connections are set up.
        let mut accepted = Vec::new();
        let mut listener_error = None;
        {
            let Some(server) = self.tcp_servers.get(&token) else {
                return;
            };
            loop {
                match server.listener.accept() {
                    Ok((stream, addr)) => accepted.push((stream, addr)),
                    Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err)
                        if err.kind() == ErrorKind::ConnectionAborted
                            || err.kind() == ErrorKind::ConnectionReset =>
                    {
                        warn!(node = %server.node, ?err, "transient accept error");
                        continue;
                    }
                    Err(err) => {
                        listener_error = Some(err);
                        break;
                    }
                }
            }
        }

        for (stream, addr) in accepted {
            self.accept_stream(stream, addr);
        }

        if let Some(err) = listener_error {
            // A broken listener reports bind down exactly once and goes away.
            if let Some(mut server) = self.tcp_servers.remove(&token) {
                error!(node = %server.node, ?err, "listener failed");
                let _ = self.poll.registry().deregister(&mut server.listener);
                self.node2server.remove(&server.node);
                self.callback.bind_status(&server.node, false);
            }
        }
    }

    fn accept_stream(&mut self, mut stream: TcpStream, addr: std::net::SocketAddr) {
        let node = Endpoint::new(Protocol::Tcp, addr);

        // Remote port reuse: a second flow presenting an endpoint that is
        // already live is rejected silently.
        if self.node2stream.contains_key(&node) {
            debug!(%node, "remote port reuse, rejecting connection");
            return;
        }
        if let Err(err) = self.apply_stream_options(&stream) {
            warn!(%node, ?err, "failed to set options on accepted stream");
            return;
        }
        let token = self.alloc_token();
        if let Err(err) =
            self.poll
                .registry()
                .register(&mut stream, Token(token), Interest::READABLE)
        {
            warn!(%node, ?err, "failed to register accepted stream");
            return;
        }

        info!(%node, "accepted connection");
        let mut conn = TcpConn::new(stream, node, Interest::READABLE);
        let generation = conn.bump_timer();
        self.timers.arm(
            token,
            generation,
            Duration::from_secs(self.settings.tcp_idle_timeout_seconds),
            TimerRole::Idle,
        );
        self.conns.insert(token, conn);
        self.startup(token);
    }

    fn finish_connect(&mut self, token: usize) {
        self.connecting.remove(&token);
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };
        let node = conn.node.clone();

        let connect_result = match conn.stream.take_error() {
            Ok(None) => Ok(()),
            Ok(Some(err)) | Err(err) => Err(err),
        };
        if let Err(err) = connect_result {
            info!(%node, ?err, "connect failed");
            // Exactly one connection_status(false) for a failed connect.
            self.shutdown_tcp(token, true, false);
            return;
        }

        info!(%node, "connection established");
        conn.interest = Interest::READABLE;
        let generation = conn.bump_timer();
        self.timers.arm(
            token,
            generation,
            Duration::from_secs(self.settings.tcp_idle_timeout_seconds),
            TimerRole::Idle,
        );
        let reregister = self
            .poll
            .registry()
            .reregister(&mut conn.stream, Token(token), Interest::READABLE);
        if reregister.is_err() {
            self.shutdown_tcp(token, true, false);
            return;
        }
        self.startup(token);
    }

    // Makes an accepted or connected stream addressable: insert into
    // node2stream, report the connection up, and flush any payloads that
    // were waiting for the connect.
    fn startup(&mut self, token: usize) {
        let Some(conn) = self.conns.get(&token) else {
            return;
        };
        let node = conn.node.clone();

        if self.node2stream.contains_key(&node) {
            // Remote port reuse detected at startup: the newcomer never
            // becomes addressable and no callback fires for it.
            debug!(%node, "remote port reuse at startup, closing");
            self.remove_conn_silent(token);
            return;
        }
        self.node2stream.insert(node.clone(), token);
        if let Some(conn) = self.conns.get_mut(&token) {
            conn.started = true;
        }
        self.callback.connection_status(&node, true);

        // One gathered write covering the whole waiting queue, in order.
        if let Some(waiting) = self.waiting_send.remove(&node) {
            self.queue_write(token, waiting);
        }
    }

    fn conn_readable(&mut self, token: usize) {
        let callback = self.callback.clone();
        let tracker = self.tracker.clone();

        loop {
            let Some(conn) = self.conns.get_mut(&token) else {
                return;
            };
            let node = conn.node.clone();

            let mut buf = callback.allocate_for_message(&node, RECV_SUGGESTED_SIZE, &tracker);
            if buf.is_empty() {
                callback.deallocate_for_message(&node, buf);
                warn!(%node, "empty receive buffer, shutting connection down");
                self.shutdown_tcp(token, false, false);
                return;
            }

            let Some(conn) = self.conns.get_mut(&token) else {
                callback.deallocate_for_message(&node, buf);
                return;
            };
            match conn.stream.read(buf.as_mut_slice()) {
                Ok(0) => {
                    callback.deallocate_for_message(&node, buf);
                    debug!(%node, "connection closed by peer");
                    self.shutdown_tcp(token, false, false);
                    return;
                }
                Ok(n) => {
                    trace!(%node, len = n, "received data");
                    callback.message(&node, &buf.as_slice()[..n]);
                    callback.deallocate_for_message(&node, buf);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    callback.deallocate_for_message(&node, buf);
                    break;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    callback.deallocate_for_message(&node, buf);
                }
                Err(err) => {
                    callback.deallocate_for_message(&node, buf);
                    warn!(%node, ?err, "read error");
                    self.shutdown_tcp(token, false, false);
                    return;
                }
            }
        }

        // Idle deadline restarts only while nothing is queued and no close
        // is pending.
        if let Some(conn) = self.conns.get_mut(&token) {
            if !conn.close_after_drain && !conn.has_pending_send() {
                let generation = conn.bump_timer();
                self.timers.arm(
                    token,
                    generation,
                    Duration::from_secs(self.settings.tcp_idle_timeout_seconds),
                    TimerRole::Idle,
                );
            }
        }
    }

    fn conn_writable(&mut self, token: usize) {
        loop {
            let Some(conn) = self.conns.get_mut(&token) else {
                return;
            };
            let Some(front) = conn.send_queue.front() else {
                break;
            };
            match conn.stream.write(&front.as_slice()[conn.send_pos..]) {
                Ok(0) => {
                    warn!(node = %conn.node, "write returned zero, shutting connection down");
                    self.drop_send_queue(token);
                    self.shutdown_tcp(token, false, false);
                    return;
                }
                Ok(n) => {
                    conn.send_pos += n;
                    if conn.send_pos == front.len() {
                        // Slot fully written; its memory is released here.
                        conn.send_queue.pop_front();
                        conn.send_pos = 0;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(node = %conn.node, ?err, "write error");
                    // Drop the remaining slots first: a drop delivered
                    // before the down report means the send itself failed.
                    self.drop_send_queue(token);
                    self.shutdown_tcp(token, false, false);
                    return;
                }
            }
        }

        // Queue fully drained.
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };
        if conn.close_after_drain {
            self.shutdown_tcp(token, false, true);
            return;
        }
        let generation = conn.bump_timer();
        self.timers.arm(
            token,
            generation,
            Duration::from_secs(self.settings.tcp_idle_timeout_seconds),
            TimerRole::Idle,
        );
        conn.interest = Interest::READABLE;
        let reregister = self
            .poll
            .registry()
            .reregister(&mut conn.stream, Token(token), Interest::READABLE);
        if reregister.is_err() {
            self.shutdown_tcp(token, false, false);
        }
    }

    fn udp_readable(&mut self, token: usize) {
        let callback = self.callback.clone();
        let tracker = self.tracker.clone();

        loop {
            let Some(server) = self.udp_servers.iter().find(|u| u.token == token) else {
                return;
            };
            let server_node = server.node.clone();
            let mut buf = callback.allocate_for_message(&server_node, RECV_SUGGESTED_SIZE, &tracker);
            if buf.is_empty() {
                callback.deallocate_for_message(&server_node, buf);
                return;
            }
            match server.socket.recv_from(buf.as_mut_slice()) {
                Ok((n, from)) => {
                    let peer = Endpoint::new(Protocol::Udp, from);
                    trace!(node = %peer, len = n, "received datagram");
                    callback.message(&peer, &buf.as_slice()[..n]);
                    callback.deallocate_for_message(&server_node, buf);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    callback.deallocate_for_message(&server_node, buf);
                    return;
                }
                Err(err) => {
                    // Datagram errors (e.g. ICMP-induced) are transient;
                    // the socket stays up.
                    callback.deallocate_for_message(&server_node, buf);
                    debug!(node = %server_node, ?err, "udp receive error");
                    return;
                }
            }
        }
    }

    // ============================================================================
    // Timers
    // ============================================================================

    fn fire_expired_timers(&mut self) {
        if self.timers.is_empty() {
            return;
        }
        let now = Instant::now();
        for (token, generation, role) in self.timers.expired(now) {
            let Some(conn) = self.conns.get(&token) else {
                continue;
            };
            if conn.timer_generation != generation {
                continue; // Stale entry from an earlier arm.
            }
            warn!(node = %conn.node, ?role, "deadline expired, shutting connection down");
            // A connect deadline still owes its exactly-once down report.
            let always_notify = self.connecting.remove(&token);
            self.shutdown_tcp(token, always_notify, false);
        }
    }

    // ============================================================================
    // Write Path Helpers
    // ============================================================================

    // Appends payloads to a connection's send queue, arms the send deadline,
    // and makes sure the stream is waiting for writability. Failures drop the
    // queued payloads and shut the connection down.
    fn queue_write(&mut self, token: usize, bufs: Vec<Buffer>) {
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };
        if bufs.is_empty() {
            return;
        }
        conn.send_queue.extend(bufs);

        let generation = conn.bump_timer();
        self.timers.arm(
            token,
            generation,
            Duration::from_secs(self.settings.tcp_send_timeout_seconds),
            TimerRole::Send,
        );

        if !conn.interest.is_writable() {
            let interest = conn.interest | Interest::WRITABLE;
            let reregister = self
                .poll
                .registry()
                .reregister(&mut conn.stream, Token(token), interest);
            match reregister {
                Ok(()) => conn.interest = interest,
                Err(err) => {
                    warn!(node = %conn.node, ?err, "failed to watch for writability");
                    self.drop_send_queue(token);
                    self.shutdown_tcp(token, false, false);
                }
            }
        }
    }

    // Empties a connection's send queue through dropped() ahead of a
    // shutdown triggered by a send failure.
    fn drop_send_queue(&mut self, token: usize) {
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };
        let node = conn.node.clone();
        let bufs: Vec<Buffer> = conn.send_queue.drain(..).collect();
        for buf in bufs {
            self.callback.dropped(&node, buf.as_slice());
        }
    }

    fn drop_waiting(&mut self, node: &Endpoint) {
        if let Some(waiting) = self.waiting_send.remove(node) {
            for buf in waiting {
                self.callback.dropped(node, buf.as_slice());
            }
        }
    }

    // ============================================================================
    // Shutdown
    // ============================================================================

    /// Idempotent teardown of one TCP connection. Exactly one
    /// `connection_status(node, false)` fires if the peer was started (or
    /// `always_notify` forces the report, used for failed connects). Every
    /// queued or waiting payload comes back through `dropped`. This is the
    /// only place `node2stream` and `waiting_send` shrink for a peer.
    fn shutdown_tcp(&mut self, token: usize, always_notify: bool, graceful: bool) {
        self.connecting.remove(&token);
        let Some(mut conn) = self.conns.remove(&token) else {
            return;
        };
        let node = conn.node.clone();

        let removed = match self.node2stream.get(&node) {
            Some(&mapped) if mapped == token => {
                self.node2stream.remove(&node);
                true
            }
            _ => false,
        };
        if removed || always_notify {
            info!(%node, "connection down");
            self.callback.connection_status(&node, false);
        }

        while let Some(buf) = conn.send_queue.pop_front() {
            self.callback.dropped(&node, buf.as_slice());
        }
        self.drop_waiting(&node);

        let _ = self.poll.registry().deregister(&mut conn.stream);
        if graceful {
            let _ = conn.stream.shutdown(Shutdown::Write);
        }
    }

    // Drops a connection without any callback; used when a startup collision
    // rejects a duplicate remote endpoint.
    fn remove_conn_silent(&mut self, token: usize) {
        self.connecting.remove(&token);
        if let Some(mut conn) = self.conns.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
    }

    // Full teardown on exit: every listener reports bind down, every live or
    // connecting peer reports connection down, and every queued payload -
    // per-peer queues first, then the freshly drained pending queues - comes
    // back through dropped. No commands are accepted past this point.
    fn teardown(&mut self, pending: PendingOps) {
        debug!("network pool loop exiting");

        for (_, mut server) in self.tcp_servers.drain() {
            let _ = self.poll.registry().deregister(&mut server.listener);
            self.callback.bind_status(&server.node, false);
        }
        self.node2server.clear();
        for mut server in self.udp_servers.drain(..) {
            let _ = self.poll.registry().deregister(&mut server.socket);
            self.callback.bind_status(&server.node, false);
        }

        let tokens: Vec<usize> = self.conns.keys().copied().collect();
        for token in tokens {
            let Some(mut conn) = self.conns.remove(&token) else {
                continue;
            };
            let node = conn.node.clone();
            if conn.started || self.connecting.contains(&token) {
                self.callback.connection_status(&node, false);
            }
            while let Some(buf) = conn.send_queue.pop_front() {
                self.callback.dropped(&node, buf.as_slice());
            }
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
        self.node2stream.clear();
        self.connecting.clear();

        for (node, waiting) in std::mem::take(&mut self.waiting_send) {
            for buf in waiting {
                self.callback.dropped(&node, buf.as_slice());
            }
        }

        for (node, _) in pending.bind {
            self.callback.bind_status(&node, false);
        }
        for request in pending.send {
            self.callback.dropped(&request.node, request.data.as_slice());
        }
    }

    // ============================================================================
    // Utilities
    // ============================================================================

    fn apply_stream_options(&self, stream: &TcpStream) -> Result<(), Error> {
        let sock = SockRef::from(stream);
        sock.set_nodelay(self.settings.tcp_enable_nodelay)?;
        if self.settings.tcp_enable_keepalive {
            let keepalive = TcpKeepalive::new()
                .with_time(Duration::from_secs(self.settings.tcp_keepalive_time_seconds));
            sock.set_tcp_keepalive(&keepalive)?;
        }
        // Buffer sizes are a preference; failures are ignored like the
        // timeouts they bound.
        if self.settings.tcp_send_buffer_size != 0 {
            let _ = sock.set_send_buffer_size(self.settings.tcp_send_buffer_size);
        }
        if self.settings.tcp_recv_buffer_size != 0 {
            let _ = sock.set_recv_buffer_size(self.settings.tcp_recv_buffer_size);
        }
        Ok(())
    }

    fn alloc_token(&mut self) -> usize {
        loop {
            self.next_id = self.next_id.checked_add(1).unwrap_or(ID_RANGE_START);
            let id = self.next_id;
            if !self.conns.contains_key(&id)
                && !self.tcp_servers.contains_key(&id)
                && !self.udp_servers.iter().any(|u| u.token == id)
            {
                return id;
            }
        }
    }
}
