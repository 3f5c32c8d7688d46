//! # Worker Pool
//!
//! The executor shared by every node of one reader tree. It runs on the tokio
//! multi-thread runtime that is current when the root opens, and keeps abort
//! handles for the tasks it spawned so the owning root can tear them all down.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::error::{BatchError, BatchResult};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: String,
    handle: Handle,
    tasks: Arc<Mutex<Vec<AbortHandle>>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Attach to the current runtime; a current-thread runtime is rejected because
    /// batches and child readers must run in parallel
    pub fn from_current(name: impl Into<String>) -> BatchResult<Self> {
        let handle = Handle::try_current().map_err(|e| {
            BatchError::WorkerPool(format!("no tokio runtime available: {e}"))
        })?;
        if matches!(handle.runtime_flavor(), RuntimeFlavor::CurrentThread) {
            return Err(BatchError::WorkerPool(
                "reader trees require a multi-thread tokio runtime".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            handle,
            tasks: Arc::new(Mutex::new(Vec::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn spawn<F>(&self, future: F) -> BatchResult<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(BatchError::WorkerPool(format!(
                "worker pool {} has been shut down",
                self.name
            )));
        }
        let task = self.handle.spawn(future);
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task.abort_handle());
        Ok(task)
    }

    /// Tasks spawned through this pool that have not finished yet
    pub fn active_tasks(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Abort every outstanding task; later spawns are rejected
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let outstanding = tasks.iter().filter(|t| !t.is_finished()).count();
        if outstanding > 0 {
            warn!(pool = %self.name, outstanding, "Aborting unfinished reader tasks");
        }
        for task in tasks {
            task.abort();
        }
        debug!(pool = %self.name, "Worker pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawned_tasks_complete() {
        let pool = WorkerPool::from_current("test").unwrap();
        let handle = pool.spawn(async { 21 * 2 }).unwrap();
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_aborts_and_rejects() {
        let pool = WorkerPool::from_current("test").unwrap();
        let handle = pool
            .spawn(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            })
            .unwrap();
        assert_eq!(pool.active_tasks(), 1);

        pool.shutdown();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(pool.spawn(async {}).is_err());
    }

    #[tokio::test]
    async fn current_thread_runtime_is_rejected() {
        assert!(matches!(
            WorkerPool::from_current("test"),
            Err(BatchError::WorkerPool(_))
        ));
    }

    #[test]
    fn requires_a_runtime() {
        assert!(WorkerPool::from_current("test").is_err());
    }
}
