//! Client-side handle to a build backend running in worker processes.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::address::BackendAddress;
use crate::backend::RemoteInvoker;
use crate::error::{Error, Result};
use crate::invocation::Invocation;
use crate::pool::{PendingInvocation, PoolConfig, WorkerPool};

/// Names that belong to the proxy's own construction parameters.
pub const RESERVED_NAMES: [&str; 3] = ["cwd", "env", "backend_name"];

/// A build backend presented as an object with any hook as a method.
///
/// `hook(name)` accepts any name and only the worker decides whether the
/// backend actually has it. Every call blocks until the worker answers, and
/// the caller's own working directory and environment are never changed.
///
/// ```no_run
/// use hookproxy_core::{BackendAddress, BackendProxy};
///
/// let backend = BackendProxy::new(BackendAddress::new("."));
/// let requires: Vec<String> = backend
///     .hook("get_requires_for_build_wheel")?
///     .call_as(vec![], Default::default())?;
/// # Ok::<(), hookproxy_core::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct BackendProxy {
    address: BackendAddress,
    pool: WorkerPool,
}

impl BackendProxy {
    /// Create a proxy with its own worker pool.
    pub fn new(address: BackendAddress) -> Self {
        Self::with_config(address, PoolConfig::default())
    }

    /// Create a proxy with its own worker pool built from `config`.
    pub fn with_config(address: BackendAddress, config: PoolConfig) -> Self {
        Self::with_pool(address, WorkerPool::new(config))
    }

    /// Create a proxy that submits to a shared pool.
    pub fn with_pool(address: BackendAddress, pool: WorkerPool) -> Self {
        Self { address, pool }
    }

    pub fn address(&self) -> &BackendAddress {
        &self.address
    }

    pub fn cwd(&self) -> &Path {
        self.address.working_directory()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        self.address.environment()
    }

    pub fn backend_name(&self) -> &str {
        self.address.backend()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// A callable for the hook `name`.
    ///
    /// Fails only for names reserved by the proxy; unknown hooks surface as
    /// `Error::HookNotFound` when called.
    pub fn hook(&self, name: &str) -> Result<Hook<'_>> {
        if RESERVED_NAMES.contains(&name) {
            return Err(Error::ReservedHookName(name.to_string()));
        }
        Ok(Hook {
            proxy: self,
            name: name.to_string(),
        })
    }

    /// Call hook `name` and wait for its value.
    pub fn call(&self, name: &str, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value> {
        self.hook(name)?.call(args, kwargs)
    }

    /// Call hook `name` and decode its value.
    pub fn call_as<T: DeserializeOwned>(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<T> {
        self.hook(name)?.call_as(args, kwargs)
    }
}

/// A single named hook on a `BackendProxy`.
#[derive(Debug, Clone)]
pub struct Hook<'a> {
    proxy: &'a BackendProxy,
    name: String,
}

impl Hook<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit the call without waiting for it.
    ///
    /// The working directory is resolved against the caller's current
    /// directory now, at submission time.
    pub fn submit(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<PendingInvocation> {
        let invoker = RemoteInvoker::for_address(&self.proxy.address)?;
        let invocation = Invocation::with_arguments(&self.name, args, kwargs);
        tracing::debug!(
            "Calling {} on {} in {}",
            self.name,
            invoker.backend(),
            invoker.working_directory().display()
        );
        Ok(self.proxy.pool.submit(&invoker, &invocation))
    }

    /// Call the hook and block until it returns.
    pub fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value> {
        self.submit(args, kwargs)?.wait()
    }

    /// Call the hook and decode its value into `T`.
    pub fn call_as<T: DeserializeOwned>(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<T> {
        self.submit(args, kwargs)?.wait_as()
    }
}
