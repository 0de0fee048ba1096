//! Bounded start/stop executor.
//!
//! Unit activation is synchronous and may block on I/O, so work runs on
//! tokio's blocking threads with a semaphore capping how many jobs of one
//! host run at once.

use crate::error::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

/// A named pool allowing at most `size` concurrent jobs.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: String,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// A pool of `size` slots; zero is treated as one.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name: name.into(),
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently held by a running job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on a blocking thread once a slot is free.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("pool '{}' is closed: {}", self.name, e))?;
        trace!(pool = %self.name, available = self.permits.available_permits(), "Job admitted");
        let output = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await?;
        Ok(output)
    }
}
