//! Fixed-size worker pool for CPU-bound request handling.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::debug;

/// A unit of work executed on a pool thread.
///
/// The box is dropped right after `run` returns, on the worker thread, so a
/// task can carry owned resources (buffers, handles) and release them there.
pub trait Task: Send {
    fn run(&mut self);
}

struct QueueState {
    exit: bool,
    tasks: VecDeque<Box<dyn Task>>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    available: Condvar,
}

/// A fixed-size pool of worker threads draining a FIFO task queue.
///
/// Workers run in parallel with each other but never with the reactor; a
/// task that needs the network publishes through the pool's thread-safe
/// handle. Dropping the queue stops the workers: tasks already dequeued
/// finish, the rest are dropped unexecuted.
pub struct WorkQueue {
    inner: Arc<QueueInner>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkQueue {
    /// Spawns `threads` workers.
    pub fn new(threads: usize) -> Self {
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState {
                exit: false,
                tasks: VecDeque::new(),
            }),
            available: Condvar::new(),
        });

        let threads = (0..threads)
            .map(|index| {
                let inner = inner.clone();
                std::thread::Builder::new()
                    .name(format!("netpool-worker-{index}"))
                    .spawn(move || worker_loop(inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { inner, threads }
    }

    /// Queues a task and signals one waiting worker.
    pub fn push(&self, task: Box<dyn Task>) {
        let mut state = self.inner.state.lock().expect("work queue poisoned");
        if state.exit {
            return; // Dropped unexecuted, like the undispatched tail.
        }
        state.tasks.push_back(task);
        self.inner.available.notify_one();
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock().expect("work queue poisoned");
            state.exit = true;
            self.inner.available.notify_all();
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        // Undispatched tasks drop here without running.
        let mut state = self.inner.state.lock().expect("work queue poisoned");
        let undispatched = state.tasks.len();
        if undispatched > 0 {
            debug!(undispatched, "dropping undispatched tasks");
            state.tasks.clear();
        }
    }
}

fn worker_loop(inner: Arc<QueueInner>) {
    loop {
        let mut task = {
            let mut state = inner.state.lock().expect("work queue poisoned");
            loop {
                if state.exit {
                    return;
                }
                if let Some(task) = state.tasks.pop_front() {
                    break task;
                }
                state = inner.available.wait(state).expect("work queue poisoned");
            }
        };
        task.run();
        // Task dropped here, on the worker thread.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    struct CountingTask {
        counter: Arc<AtomicUsize>,
        done: mpsc::Sender<()>,
    }

    impl Task for CountingTask {
        fn run(&mut self) {
            self.counter.fetch_add(1, Ordering::SeqCst);
            let _ = self.done.send(());
        }
    }

    #[test]
    fn runs_every_pushed_task() {
        let queue = WorkQueue::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..32 {
            queue.push(Box::new(CountingTask {
                counter: counter.clone(),
                done: tx.clone(),
            }));
        }
        for _ in 0..32 {
            rx.recv_timeout(Duration::from_secs(5))
                .expect("task did not complete");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    struct DropProbe {
        dropped: Arc<AtomicUsize>,
    }

    impl Task for DropProbe {
        fn run(&mut self) {}
    }

    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn drop_releases_undispatched_tasks() {
        let dropped = Arc::new(AtomicUsize::new(0));
        {
            let queue = WorkQueue::new(1);
            for _ in 0..8 {
                queue.push(Box::new(DropProbe {
                    dropped: dropped.clone(),
                }));
            }
        }
        // Each task was either executed-then-dropped or dropped unexecuted;
        // either way all eight are gone.
        assert_eq!(dropped.load(Ordering::SeqCst), 8);
    }
}
