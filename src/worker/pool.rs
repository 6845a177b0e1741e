//! Bounded Worker Pool
//!
//! A fixed number of Tokio tasks drain one bounded job queue.
//!
//! ```text
//!  Session ──submit──┐
//!  Session ──submit──┼──> [ bounded mpsc queue (capacity M) ] ──> Worker 0..N
//!  Session ──submit──┘            (blocks when full)
//! ```
//!
//! ## Backpressure
//!
//! [`WorkerPool::submit`] waits while the queue is full. Only the session
//! that is submitting stalls; other connections keep being served.
//!
//! ## Shutdown
//!
//! [`WorkerPool::shutdown`] closes the queue, lets the workers drain the
//! jobs still queued, and waits for every worker to exit.

use crate::worker::Job;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Number of workers in the reference deployment
pub const DEFAULT_WORKERS: usize = 50;

/// Job queue capacity in the reference deployment
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Errors returned by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The queue has been closed; the job is handed back
    #[error("job queue is closed")]
    Closed(Job),
}

/// A fixed set of workers consuming a bounded job queue.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    capacity: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("queued", &self.queued())
            .finish()
    }
}

impl WorkerPool {
    /// Spawns `size` workers sharing a queue of `capacity` jobs.
    ///
    /// Each worker runs `handler` on one job at a time, to completion,
    /// before taking the next.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (see [`mpsc::channel`]).
    pub fn start<F, Fut>(size: usize, capacity: usize, handler: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let handler = Arc::new(handler);

        let workers = (0..size)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&handler),
                ))
            })
            .collect();

        debug!(workers = size, capacity, "Worker pool started");

        Self {
            sender: Mutex::new(Some(sender)),
            workers: tokio::sync::Mutex::new(workers),
            size,
            capacity,
        }
    }

    /// Queues a job, waiting for a free slot if the queue is full.
    pub async fn submit(&self, job: Job) -> Result<(), PoolError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match sender {
            Some(sender) => sender.send(job).await.map_err(|e| PoolError::Closed(e.0)),
            None => Err(PoolError::Closed(job)),
        }
    }

    /// Closes the queue. Jobs already queued will still run.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Returns true once [`WorkerPool::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Closes the queue and waits for every worker to finish.
    pub async fn shutdown(&self) {
        self.close();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task failed");
            }
        }

        debug!("Worker pool stopped");
    }

    /// Returns the number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|sender| self.capacity - sender.capacity())
            .unwrap_or(0)
    }
}

async fn worker_loop<F, Fut>(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    handler: Arc<F>,
) where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        // Lock only while waiting for the next job, never while running it.
        let job = receiver.lock().await.recv().await;

        match job {
            Some(job) => {
                trace!(worker = id, client = %job.client_id, kind = job.message.kind(), "Running job");
                handler(job).await;
            }
            None => break,
        }
    }

    trace!(worker = id, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn job(n: usize) -> Job {
        Job::new(format!("client-{}", n), Message::file_request())
    }

    #[tokio::test]
    async fn test_all_jobs_run_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let pool = WorkerPool::start(4, 16, move |_job| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        for n in 0..100 {
            pool.submit(job(n)).await.unwrap();
        }
        pool.shutdown().await;

        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_submit_blocks_when_queue_full() {
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(AtomicUsize::new(0));

        let g = Arc::clone(&gate);
        let s = Arc::clone(&started);
        let pool = Arc::new(WorkerPool::start(1, 2, move |_job| {
            let g = Arc::clone(&g);
            let s = Arc::clone(&s);
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                let _permit = g.acquire().await.unwrap();
            }
        }));

        // One job occupies the worker, two more fill the queue.
        pool.submit(job(0)).await.unwrap();
        while started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        pool.submit(job(1)).await.unwrap();
        pool.submit(job(2)).await.unwrap();
        assert_eq!(pool.queued(), 2);

        let blocked = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.submit(job(3)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        // Free the worker; the blocked submit goes through and nothing is lost.
        gate.add_permits(10);
        blocked.await.unwrap().unwrap();
        pool.shutdown().await;

        assert_eq!(started.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let pool = WorkerPool::start(2, 50, move |_job| {
            let c = Arc::clone(&c);
            async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        for n in 0..20 {
            pool.submit(job(n)).await.unwrap();
        }
        pool.shutdown().await;

        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_submit_after_close_returns_job() {
        let pool = WorkerPool::start(1, 4, |_job| async {});
        pool.close();
        assert!(pool.is_closed());

        match pool.submit(job(7)).await {
            Err(PoolError::Closed(returned)) => assert_eq!(returned.client_id, "client-7"),
            other => panic!("expected closed error, got {:?}", other),
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_submitters_do_not_deadlock() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let pool = Arc::new(WorkerPool::start(3, 2, move |_job| {
            let c = Arc::clone(&c);
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                c.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let submitters: Vec<_> = (0..8)
            .map(|s| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    for n in 0..10 {
                        pool.submit(job(s * 10 + n)).await.unwrap();
                    }
                })
            })
            .collect();

        for submitter in submitters {
            tokio::time::timeout(Duration::from_secs(5), submitter)
                .await
                .expect("submitter deadlocked")
                .unwrap();
        }
        pool.shutdown().await;

        assert_eq!(counter.load(Ordering::SeqCst), 80);
    }
}
