use std::thread;

use crossbeam_channel::{unbounded, Sender};
use tracing::debug;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads drawing from one FIFO queue.
///
/// Sessions are long-lived tasks, so each accepted connection occupies one
/// worker for its whole lifetime; size the pool to the number of concurrent
/// clients you expect.
///
/// [`WorkerPool::submit`] never blocks. Once shutdown has begun, further
/// submissions are silently discarded; workers finish whatever is already
/// queued and then exit.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers. `size` must be non-zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "worker pool needs at least one thread");
        let (sender, receiver) = unbounded::<Task>();
        let workers = (0..size)
            .map(|i| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || {
                        // recv fails only once the channel is closed and drained
                        while let Ok(task) = receiver.recv() {
                            task();
                        }
                        debug!("worker exiting");
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Queues a task for the next free worker. Discarded if the pool is
    /// shutting down.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(task));
        }
    }

    /// Closes the queue and joins every worker once the queue is drained.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
