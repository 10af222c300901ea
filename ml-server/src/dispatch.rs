//! Offloads blocking work (model loads, inference, index operations) from the
//! async request handlers.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// Runs blocking jobs either on a bounded worker pool or inline.
///
/// With `threads > 0` jobs run on tokio's blocking pool, with at most
/// `threads` of them in flight; further jobs wait for a permit. With
/// `threads == 0` jobs run directly on the calling task.
#[derive(Clone)]
pub struct Dispatcher {
    permits: Option<Arc<Semaphore>>,
    threads: usize,
}

impl Dispatcher {
    pub fn new(threads: usize) -> Self {
        Self {
            permits: (threads > 0).then(|| Arc::new(Semaphore::new(threads))),
            threads,
        }
    }

    /// Number of worker threads, 0 when running inline.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `job` and return its result.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let Some(permits) = &self.permits else {
            return job();
        };

        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("Worker pool closed: {}", e)))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| Error::Internal(format!("Worker task failed: {}", e)))?
    }
}
