//! Worker Pool Module
//!
//! File requests are too slow to run on a connection's read loop, so the
//! session turns them into [`Job`]s and hands them to a fixed pool of
//! workers.
//!
//! - `job`: The `Job` type and the function that executes one
//! - `pool`: The bounded queue and the worker tasks draining it
//!
//! ## Example
//!
//! ```ignore
//! use filecast::worker::{run_job, Job, WorkerPool};
//!
//! let ctx = Arc::new(ServerContext::new(&config));
//! let pool = WorkerPool::start(50, 1000, {
//!     let ctx = Arc::clone(&ctx);
//!     move |job| run_job(Arc::clone(&ctx), job)
//! });
//!
//! pool.submit(Job::new(client_id, Message::file_request())).await?;
//! pool.shutdown().await;
//! ```

pub mod job;
pub mod pool;

// Re-export commonly used types
pub use job::{run_job, Job};
pub use pool::{PoolError, WorkerPool, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
