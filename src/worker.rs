//! Long-lived pool for CPU-bound codec work
//!
//! Jobs run on a dedicated rayon pool, sized independently of the tokio
//! runtime, and their results are handed back to async callers through a
//! oneshot channel. The pool is created once and shared by every caller.

use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),

    #[error("worker dropped the job before completing it")]
    Canceled,
}

/// Shared handle to the codec worker pool
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
}

impl WorkerPool {
    /// Builds a pool with `threads` workers; `0` means one per CPU.
    pub fn new(name: &str, threads: usize) -> Result<Self, PoolError> {
        let prefix = name.to_string();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            // Without a handler rayon aborts the process on a panicking job
            .panic_handler(|_| error!("Worker job panicked"))
            .build()?;

        info!(pool = %name, threads = %pool.current_num_threads(), "Worker pool started");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Runs `job` on the pool and waits for its result without blocking the
    /// calling task.
    pub async fn run<F, R>(&self, job: F) -> Result<R, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            // Receiver gone means the caller was cancelled; nothing to report
            let _ = tx.send(job());
        });

        rx.await.map_err(|_| PoolError::Canceled)
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .finish()
    }
}
