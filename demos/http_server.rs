//! Minimal HTTP/1.1 server built on the pool.
//!
//! One `HttpContext` per connection frames incoming requests on the loop
//! thread; request handling runs on a `WorkQueue` and publishes the response
//! through a `PoolHandle`. Keep-alive connections are reused via
//! `reinit_for_next`, everything else closes after the response drains.
//!
//! Run with `cargo run --example http_server`, then:
//!
//! ```text
//! curl -v http://127.0.0.1:8080/
//! ```

use netpool::{
    Endpoint, HttpContext, NetworkPool, PoolCallback, PoolHandle, Protocol, Task, WorkQueue,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

const LISTEN_ADDR: &str = "127.0.0.1";
const LISTEN_PORT: u16 = 8080;
const WORKER_THREADS: usize = 4;

// One parsed request, handled off the loop thread.
struct RequestTask {
    handle: PoolHandle,
    node: Endpoint,
    method: String,
    uri: String,
    keep_alive: bool,
}

impl Task for RequestTask {
    fn run(&mut self) {
        println!("http req: '{}' '{}'", self.method, self.uri);
        let body = format!("you asked for {} via {}\n", self.uri, self.method);
        let connection = if self.keep_alive { "Keep-Alive" } else { "Close" };
        let response = format!(
            "HTTP/1.1 200 OK\r\nConnection: {}\r\nContent-Length: {}\r\n\r\n{}",
            connection,
            body.len(),
            body
        );
        self.handle.send(&self.node, response.as_bytes(), false);
        if !self.keep_alive {
            self.handle.close(&self.node, false);
        }
    }
}

struct HttpServer {
    contexts: Mutex<HashMap<Endpoint, HttpContext>>,
    workers: WorkQueue,
    handle: OnceLock<PoolHandle>,
}

impl HttpServer {
    fn new(workers: usize) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            workers: WorkQueue::new(workers),
            handle: OnceLock::new(),
        }
    }

    fn attach(&self, handle: PoolHandle) {
        let _ = self.handle.set(handle);
    }

    fn handle(&self) -> &PoolHandle {
        self.handle.get().expect("pool handle attached at startup")
    }
}

impl PoolCallback for HttpServer {
    fn message(&self, node: &Endpoint, data: &[u8]) {
        let mut contexts = self.contexts.lock().expect("context map poisoned");
        let Some(ctx) = contexts.get_mut(node) else {
            return;
        };
        if !ctx.append(data) {
            // Request exceeded the frame cap.
            self.handle().close(node, true);
            return;
        }
        // A single read can complete several pipelined requests.
        while ctx.parse() {
            if !ctx.is_good() {
                self.handle().close(node, false);
                return;
            }
            let Some((method, uri, _version)) = ctx.first_line() else {
                self.handle().close(node, false);
                return;
            };
            let keep_alive = ctx.is_keep_alive();
            self.workers.push(Box::new(RequestTask {
                handle: self.handle().clone(),
                node: node.clone(),
                method,
                uri,
                keep_alive,
            }));
            if !ctx.reinit_for_next() {
                // Response drains first; close is graceful.
                self.handle().close(node, false);
                return;
            }
        }
    }

    fn dropped(&self, node: &Endpoint, data: &[u8]) {
        println!("pkt drop: {} ({} bytes)", node, data.len());
    }

    fn bind_status(&self, node: &Endpoint, success: bool) {
        println!("bind: {} {}", node, if success { "success" } else { "fail" });
    }

    fn connection_status(&self, node: &Endpoint, success: bool) {
        println!(
            "connection: {} {}",
            node,
            if success { "up" } else { "down" }
        );
        let mut contexts = self.contexts.lock().expect("context map poisoned");
        if success {
            contexts.insert(node.clone(), HttpContext::new(self.handle().tracker()));
        } else {
            contexts.remove(node);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = Arc::new(HttpServer::new(WORKER_THREADS));
    let config = config::Config::default();
    let pool = NetworkPool::new(server.clone(), &config)?;
    server.attach(pool.handle());

    let listener = Endpoint::from_parts(Protocol::Tcp, LISTEN_ADDR, LISTEN_PORT)?;
    pool.bind(&listener, true);
    println!("serving on http://{}:{}/", LISTEN_ADDR, LISTEN_PORT);

    loop {
        std::thread::park();
    }
}
