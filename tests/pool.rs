use netpool::{Endpoint, NetworkPool, PoolCallback, Protocol};
use std::net::TcpListener;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Message(Endpoint, Vec<u8>),
    Dropped(Endpoint, Vec<u8>),
    Bind(Endpoint, bool),
    Connection(Endpoint, bool),
}

// Forwards every upcall into a channel so tests can assert on ordering.
struct Recorder {
    tx: Mutex<Sender<Event>>,
}

impl Recorder {
    fn create() -> (Arc<Recorder>, Receiver<Event>) {
        let (tx, rx) = channel();
        (
            Arc::new(Recorder { tx: Mutex::new(tx) }),
            rx,
        )
    }

    fn emit(&self, event: Event) {
        // The receiver may be gone once a test finishes early.
        let _ = self.tx.lock().expect("recorder poisoned").send(event);
    }
}

impl PoolCallback for Recorder {
    fn message(&self, node: &Endpoint, data: &[u8]) {
        self.emit(Event::Message(node.clone(), data.to_vec()));
    }
    fn dropped(&self, node: &Endpoint, data: &[u8]) {
        self.emit(Event::Dropped(node.clone(), data.to_vec()));
    }
    fn bind_status(&self, node: &Endpoint, success: bool) {
        self.emit(Event::Bind(node.clone(), success));
    }
    fn connection_status(&self, node: &Endpoint, success: bool) {
        self.emit(Event::Connection(node.clone(), success));
    }
}

fn new_pool(callback: Arc<Recorder>) -> NetworkPool {
    let config = config::Config::default();
    NetworkPool::new(callback, &config).expect("failed to create pool")
}

// Reserves a local port by binding and immediately releasing it.
fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to probe for a free port");
    listener.local_addr().expect("no local addr").port()
}

fn tcp(port: u16) -> Endpoint {
    Endpoint::from_parts(Protocol::Tcp, "127.0.0.1", port).expect("valid endpoint")
}

fn expect_event(rx: &Receiver<Event>, expected: &Event) {
    let event = rx.recv_timeout(WAIT).expect("timed out waiting for event");
    assert_eq!(&event, expected);
}

// Waits for one event matching the predicate, ignoring unrelated ones.
fn wait_for<F: Fn(&Event) -> bool>(rx: &Receiver<Event>, what: &str, predicate: F) -> Event {
    loop {
        match rx.recv_timeout(WAIT) {
            Ok(event) => {
                if predicate(&event) {
                    return event;
                }
            }
            Err(_) => panic!("timed out waiting for {what}"),
        }
    }
}

#[test]
fn bind_and_unbind_report_status() {
    let (recorder, rx) = Recorder::create();
    let pool = new_pool(recorder);

    let node = tcp(0);
    pool.bind(&node, true);
    expect_event(&rx, &Event::Bind(node.clone(), true));

    // Re-binding the same endpoint re-reports success.
    pool.bind(&node, true);
    expect_event(&rx, &Event::Bind(node.clone(), true));

    pool.bind(&node, false);
    expect_event(&rx, &Event::Bind(node.clone(), false));

    // Unbinding something never bound still answers, with failure.
    pool.bind(&node, false);
    expect_event(&rx, &Event::Bind(node, false));
}

#[test]
fn unbound_listener_refuses_connections() {
    let (server_cb, server_rx) = Recorder::create();
    let server = new_pool(server_cb);
    let port = free_port();
    let node = tcp(port);

    server.bind(&node, true);
    expect_event(&server_rx, &Event::Bind(node.clone(), true));
    server.bind(&node, false);
    expect_event(&server_rx, &Event::Bind(node.clone(), false));

    // With the listener gone, a dialing client fails to connect.
    let (client_cb, client_rx) = Recorder::create();
    let client = new_pool(client_cb);
    client.send(&node, b"anyone there?", true);
    wait_for(&client_rx, "connection failure", |e| {
        matches!(e, Event::Connection(n, false) if *n == node)
    });
    wait_for(&client_rx, "payload drop", |e| {
        matches!(e, Event::Dropped(n, data) if *n == node && data == b"anyone there?")
    });
    drop(client);
    drop(server);
}

#[test]
fn echo_round_trip() {
    let (server_cb, server_rx) = Recorder::create();
    let server = new_pool(server_cb);
    let port = free_port();
    let listen = tcp(port);

    server.bind(&listen, true);
    expect_event(&server_rx, &Event::Bind(listen.clone(), true));

    let (client_cb, client_rx) = Recorder::create();
    let client = new_pool(client_cb);
    client.send(&listen, b"ping", true);

    // Server side: connection up, then the payload.
    let up = wait_for(&server_rx, "server connection up", |e| {
        matches!(e, Event::Connection(_, true))
    });
    let Event::Connection(peer, true) = up else {
        unreachable!()
    };
    wait_for(&server_rx, "ping", |e| {
        matches!(e, Event::Message(n, data) if *n == peer && data == b"ping")
    });

    // Client side: its connection to the listener came up.
    wait_for(&client_rx, "client connection up", |e| {
        matches!(e, Event::Connection(n, true) if *n == listen)
    });

    // Server answers and closes gracefully.
    assert!(server.send(&peer, b"pong", false));
    wait_for(&client_rx, "pong", |e| {
        matches!(e, Event::Message(n, data) if *n == listen && data == b"pong")
    });
    server.close(&peer, false);
    wait_for(&server_rx, "server connection down", |e| {
        matches!(e, Event::Connection(n, false) if *n == peer)
    });
    wait_for(&client_rx, "client connection down", |e| {
        matches!(e, Event::Connection(n, false) if *n == listen)
    });

    drop(client);
    drop(server);
}

#[test]
fn auto_connect_failure_reports_down_then_drop() {
    let (recorder, rx) = Recorder::create();
    let pool = new_pool(recorder);

    // Nothing listens on this port.
    let node = tcp(free_port());
    assert!(pool.send(&node, b"hello", true));

    let first = wait_for(&rx, "connection failure", |e| {
        matches!(e, Event::Connection(..) | Event::Dropped(..))
    });
    assert_eq!(first, Event::Connection(node.clone(), false));
    expect_event(&rx, &Event::Dropped(node, b"hello".to_vec()));
}

#[test]
fn send_without_auto_connect_drops_immediately() {
    let (recorder, rx) = Recorder::create();
    let pool = new_pool(recorder);

    let node = tcp(free_port());
    assert!(pool.send(&node, b"lost", false));

    // The payload comes straight back; no connection was attempted.
    expect_event(&rx, &Event::Dropped(node, b"lost".to_vec()));
    assert!(rx.recv_timeout(QUIET).is_err());
}

#[test]
fn close_is_idempotent() {
    let (server_cb, server_rx) = Recorder::create();
    let server = new_pool(server_cb);
    let port = free_port();
    let listen = tcp(port);
    server.bind(&listen, true);
    expect_event(&server_rx, &Event::Bind(listen.clone(), true));

    let (client_cb, client_rx) = Recorder::create();
    let client = new_pool(client_cb);
    client.send(&listen, b"hi", true);
    wait_for(&client_rx, "client connection up", |e| {
        matches!(e, Event::Connection(n, true) if *n == listen)
    });

    client.close(&listen, false);
    client.close(&listen, false);
    client.close(&listen, true);

    wait_for(&client_rx, "client connection down", |e| {
        matches!(e, Event::Connection(n, false) if *n == listen)
    });
    // Repeated closes produce no second down report.
    assert!(!client_rx
        .recv_timeout(QUIET)
        .is_ok_and(|e| matches!(e, Event::Connection(_, false))));

    drop(client);
    drop(server);
}

#[test]
fn teardown_reports_listeners_and_connections_down() {
    let (server_cb, server_rx) = Recorder::create();
    let server = new_pool(server_cb);
    let port = free_port();
    let listen = tcp(port);
    server.bind(&listen, true);
    expect_event(&server_rx, &Event::Bind(listen.clone(), true));

    let (client_cb, client_rx) = Recorder::create();
    let client = new_pool(client_cb);
    client.send(&listen, b"hello", true);
    wait_for(&server_rx, "server connection up", |e| {
        matches!(e, Event::Connection(_, true))
    });

    // Dropping the server pool reports everything down on its way out.
    drop(server);
    wait_for(&server_rx, "bind down at teardown", |e| {
        matches!(e, Event::Bind(n, false) if *n == listen)
    });
    wait_for(&server_rx, "connection down at teardown", |e| {
        matches!(e, Event::Connection(_, false))
    });

    drop(client);
    let _ = client_rx;
}

fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("failed to probe for a udp port");
    socket.local_addr().expect("no local addr").port()
}

fn udp(port: u16) -> Endpoint {
    Endpoint::from_parts(Protocol::Udp, "127.0.0.1", port).expect("valid endpoint")
}

#[test]
fn udp_round_trip() {
    let (server_cb, server_rx) = Recorder::create();
    let server = new_pool(server_cb);
    let listen = udp(free_udp_port());
    server.bind(&listen, true);
    expect_event(&server_rx, &Event::Bind(listen.clone(), true));

    // Egress requires a bound UDP socket on the sending side too.
    let (client_cb, client_rx) = Recorder::create();
    let client = new_pool(client_cb);
    client.bind(&udp(0), true);
    wait_for(&client_rx, "client udp bind", |e| {
        matches!(e, Event::Bind(_, true))
    });

    assert!(client.send(&listen, b"datagram", false));
    let received = wait_for(&server_rx, "datagram", |e| matches!(e, Event::Message(..)));
    let Event::Message(peer, data) = received else {
        unreachable!()
    };
    assert_eq!(peer.protocol(), Protocol::Udp);
    assert_eq!(data, b"datagram");

    // Unbind tears the socket down with a status report.
    server.bind(&listen, false);
    expect_event(&server_rx, &Event::Bind(listen, false));

    drop(client);
    drop(server);
}

#[test]
fn udp_send_without_sender_is_silent() {
    let (recorder, rx) = Recorder::create();
    let pool = new_pool(recorder);

    // No UDP socket bound: the datagram vanishes without any upcall.
    assert!(pool.send(&udp(free_udp_port()), b"void", false));
    assert!(rx.recv_timeout(QUIET).is_err());
}

#[test]
fn tracker_returns_to_baseline_after_traffic() {
    let (server_cb, server_rx) = Recorder::create();
    let server = new_pool(server_cb);
    let server_tracker = server.tracker().clone();
    let port = free_port();
    let listen = tcp(port);
    server.bind(&listen, true);
    expect_event(&server_rx, &Event::Bind(listen.clone(), true));

    const CLIENTS: usize = 8;
    const SENDS: usize = 4;
    let payload = vec![0x2au8; 1024];

    let mut clients = Vec::new();
    for _ in 0..CLIENTS {
        let (client_cb, client_rx) = Recorder::create();
        let client = new_pool(client_cb);
        client.send(&listen, &payload, true);
        wait_for(&client_rx, "client connection up", |e| {
            matches!(e, Event::Connection(n, true) if *n == listen)
        });
        for _ in 1..SENDS {
            assert!(client.send(&listen, &payload, false));
        }
        clients.push((client, client_rx));
    }

    // Every payload arrives: CLIENTS * SENDS KiB in total, in order per
    // connection (possibly coalesced by TCP, so count bytes, not messages).
    let mut received = 0usize;
    while received < CLIENTS * SENDS * payload.len() {
        let event = server_rx.recv_timeout(WAIT).expect("waiting for traffic");
        if let Event::Message(_, data) = event {
            assert!(data.iter().all(|&b| b == 0x2a));
            received += data.len();
        }
    }
    assert_eq!(received, CLIENTS * SENDS * payload.len());

    drop(clients);
    drop(server);

    assert_eq!(server_tracker.live_bytes(), 0);
    assert_eq!(server_tracker.live_objects(), 0);
}
