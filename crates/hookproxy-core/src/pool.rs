//! Pool of worker processes executing hook invocations.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::backend::RemoteInvoker;
use crate::error::{Error, Result};
use crate::invocation::Invocation;
use crate::ipc::{InvokeRequest, WorkerHandle};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker binary. Located with `WorkerHandle::locate` when unset.
    pub worker_path: Option<PathBuf>,
    /// Maximum number of idle workers kept for reuse.
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_path: None,
            max_idle: thread::available_parallelism().map_or(4, |n| n.get()),
        }
    }
}

impl PoolConfig {
    pub fn worker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_path = Some(path.into());
        self
    }

    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }
}

/// Pool of reusable worker processes.
///
/// Workers are spawned on demand and returned to the pool after each
/// invocation. A worker is checked out by exactly one invocation at a time,
/// so concurrent invocations never share a worker's directory or
/// environment. Workers that crash are discarded and replaced on the next
/// submission.
///
/// Cloning the pool shares the same workers.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    /// Available workers ready for use.
    idle: Mutex<Vec<WorkerHandle>>,
}

impl WorkerPool {
    /// Create a pool; no worker is started until the first submission.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::with_capacity(config.max_idle)),
                config,
            }),
        }
    }

    /// Create a pool and pre-warm it with up to `warm_count` workers.
    pub fn with_warm_workers(config: PoolConfig, warm_count: usize) -> Result<Self> {
        let pool = Self::new(config);
        let worker_path = pool.inner.worker_path()?;
        for _ in 0..warm_count.min(pool.inner.config.max_idle) {
            let worker = WorkerHandle::spawn(&worker_path)?;
            pool.inner.idle().push(worker);
        }
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Submit an invocation and return a handle to its eventual result.
    ///
    /// The invocation runs on a dispatch thread that checks out a worker,
    /// so several submissions can be in flight at once.
    pub fn submit(&self, invoker: &RemoteInvoker, invocation: &Invocation) -> PendingInvocation {
        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel();

        match invoker.to_request(&id, invocation) {
            Ok(request) => {
                let inner = Arc::clone(&self.inner);
                let spawned = thread::Builder::new()
                    .name(format!("hookproxy-{}", invocation.hook))
                    .spawn(move || {
                        let result = inner.run(&request);
                        let _ = sender.send(result);
                    });
                if let Err(e) = spawned {
                    tracing::warn!("Failed to start dispatch thread for {}: {}", id, e);
                }
            }
            Err(e) => {
                let _ = sender.send(Err(e));
            }
        }

        PendingInvocation { id, receiver }
    }

    /// Get the number of idle workers.
    pub fn available_count(&self) -> usize {
        self.inner.idle().len()
    }

    /// Shut down all idle workers.
    ///
    /// Workers busy with an invocation are returned afterwards and shut
    /// down when the pool is dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("idle", &self.available_count())
            .finish()
    }
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, Vec<WorkerHandle>> {
        // The idle list stays consistent even if a holder panicked.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker_path(&self) -> Result<PathBuf> {
        match &self.config.worker_path {
            Some(path) => Ok(path.clone()),
            None => WorkerHandle::locate(),
        }
    }

    /// Get a worker from the pool, spawning if necessary.
    fn checkout(&self) -> Result<WorkerHandle> {
        while let Some(mut worker) = self.idle().pop() {
            if worker.is_reusable() {
                return Ok(worker);
            }
            tracing::debug!("Dropping dead idle worker {}", worker.pid());
        }

        let worker = WorkerHandle::spawn(&self.worker_path()?)?;
        tracing::info!("Spawned worker {}", worker.pid());
        Ok(worker)
    }

    /// Return a worker to the pool for reuse.
    ///
    /// If the pool is full or the worker is unusable, it is dropped (killed).
    fn checkin(&self, mut worker: WorkerHandle) {
        if !worker.is_reusable() {
            tracing::warn!("Discarding worker {} after a failed invocation", worker.pid());
            return;
        }

        let mut idle = self.idle();
        if idle.len() < self.config.max_idle {
            idle.push(worker);
        }
    }

    fn run(&self, request: &InvokeRequest) -> Result<Value> {
        let mut worker = self.checkout()?;
        tracing::debug!(
            "Dispatching {} ({}) to worker {}",
            request.hook,
            request.id,
            worker.pid()
        );
        let result = worker.invoke(request);
        self.checkin(worker);
        result
    }

    fn shutdown(&self) {
        let workers: Vec<WorkerHandle> = self.idle().drain(..).collect();
        for worker in workers {
            let pid = worker.pid();
            if let Err(e) = worker.shutdown() {
                tracing::warn!("Worker {} did not shut down cleanly: {}", pid, e);
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a submitted invocation.
///
/// Waiting is the only suspension point; there is no timeout or
/// cancellation.
#[derive(Debug)]
pub struct PendingInvocation {
    id: String,
    receiver: Receiver<Result<Value>>,
}

impl PendingInvocation {
    /// Invocation id, also sent to the worker.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Block until the invocation finishes.
    pub fn wait(self) -> Result<Value> {
        self.receiver.recv().unwrap_or_else(|_| {
            Err(Error::Worker(format!(
                "Invocation {} was dropped before it produced a result",
                self.id
            )))
        })
    }

    /// Block until the invocation finishes and decode its value.
    pub fn wait_as<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.wait()?;
        serde_json::from_value(value)
            .map_err(|e| Error::Serialization(format!("Failed to decode hook result: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_pool_starts_empty() {
        let pool = WorkerPool::new(PoolConfig::default().max_idle(2));
        assert_eq!(pool.available_count(), 0);
        assert_eq!(pool.config().max_idle, 2);
    }

    #[test]
    fn test_unstartable_worker_resolves_to_worker_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let pool = WorkerPool::new(
            PoolConfig::default().worker_path(temp.path().join("missing-worker")),
        );
        let invoker = RemoteInvoker::new(temp.path(), BTreeMap::new(), "sample.build_meta");

        let pending = pool.submit(&invoker, &Invocation::new("build_wheel"));
        assert!(!pending.id().is_empty());

        let err = pending.wait().unwrap_err();
        assert!(err.is_infrastructure());

        // The pool is still usable afterwards.
        let err = pool
            .submit(&invoker, &Invocation::new("build_sdist"))
            .wait()
            .unwrap_err();
        assert!(matches!(err, Error::Worker(_)));
        assert_eq!(pool.available_count(), 0);
    }
}
