//! The unit of work executed inside a worker process.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::{BackendRegistry, HookCall};
use crate::address::BackendAddress;
use crate::directory::DirectoryContext;
use crate::environment::EnvironmentOverlay;
use crate::error::{Error, Result};
use crate::invocation::{HookFailure, Invocation};
use crate::ipc::protocol::{EnvVar, InvokeRequest, path_from_bytes, path_to_bytes};

/// Execution context for a hook call, sent to the worker as plain data.
///
/// Building or transmitting an invoker has no side effects; the directory
/// change, environment overlay and name resolution all happen in `invoke`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInvoker {
    working_directory: PathBuf,
    environment: BTreeMap<String, String>,
    backend: String,
}

impl RemoteInvoker {
    pub fn new(
        working_directory: impl Into<PathBuf>,
        environment: BTreeMap<String, String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            working_directory: working_directory.into(),
            environment,
            backend: backend.into(),
        }
    }

    /// Build an invoker for `address`, resolving its working directory
    /// against the caller's current directory.
    pub fn for_address(address: &BackendAddress) -> Result<Self> {
        let working_directory =
            address
                .absolute_working_directory()
                .map_err(|e| Error::Context {
                    path: address.working_directory().to_path_buf(),
                    message: e.to_string(),
                })?;
        Ok(Self::new(
            working_directory,
            address.environment().clone(),
            address.backend(),
        ))
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Encode this invoker and `invocation` for the wire.
    pub fn to_request(&self, id: impl Into<String>, invocation: &Invocation) -> Result<InvokeRequest> {
        let args_json = serde_json::to_vec(&invocation.args)
            .map_err(|e| Error::Serialization(format!("Failed to encode hook arguments: {}", e)))?;
        let kwargs_json = serde_json::to_vec(&invocation.kwargs).map_err(|e| {
            Error::Serialization(format!("Failed to encode hook keyword arguments: {}", e))
        })?;

        Ok(InvokeRequest {
            id: id.into(),
            working_directory: path_to_bytes(&self.working_directory)?,
            environment: self
                .environment
                .iter()
                .map(|(key, value)| EnvVar {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            backend: self.backend.clone(),
            hook: invocation.hook.clone(),
            args_json,
            kwargs_json,
        })
    }

    /// Rebuild the invoker and invocation a request describes.
    pub fn from_request(request: &InvokeRequest) -> Result<(Self, Invocation)> {
        let args: Vec<Value> = serde_json::from_slice(&request.args_json)
            .map_err(|e| Error::Serialization(format!("Failed to decode hook arguments: {}", e)))?;
        let kwargs: Map<String, Value> = serde_json::from_slice(&request.kwargs_json).map_err(|e| {
            Error::Serialization(format!("Failed to decode hook keyword arguments: {}", e))
        })?;

        let working_directory = path_from_bytes(&request.working_directory)?;
        let environment = request
            .environment
            .iter()
            .map(|var| (var.key.clone(), var.value.clone()))
            .collect();

        Ok((
            Self::new(working_directory, environment, &request.backend),
            Invocation::with_arguments(&request.hook, args, kwargs),
        ))
    }

    /// Run `invocation` in this invoker's context.
    ///
    /// Enters the working directory, applies the environment overlay,
    /// resolves the backend and then the hook by name, and calls it. The
    /// previous directory and environment are restored before returning,
    /// since the worker process is reused for later invocations.
    pub fn invoke(&self, registry: &mut BackendRegistry, invocation: &Invocation) -> Result<Value> {
        let _directory =
            DirectoryContext::enter(&self.working_directory).map_err(|e| Error::Context {
                path: self.working_directory.clone(),
                message: e.to_string(),
            })?;
        // An overlay the OS cannot represent fails the call like the hook
        // raising, not the worker.
        let _overlay = EnvironmentOverlay::apply(&self.environment).map_err(|failure| {
            Error::HookExecution {
                hook: invocation.hook.clone(),
                failure,
            }
        })?;

        let backend = registry.resolve(&self.backend)?;
        let hook = backend.resolve(&invocation.hook)?;

        tracing::debug!(
            "Running hook {} on {} in {}",
            invocation.hook,
            self.backend,
            self.working_directory.display()
        );

        let call = HookCall::new(invocation, &self.working_directory, &self.environment);
        match panic::catch_unwind(AssertUnwindSafe(|| hook(&call))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(failure)) => Err(Error::HookExecution {
                hook: invocation.hook.clone(),
                failure,
            }),
            Err(payload) => Err(Error::HookExecution {
                hook: invocation.hook.clone(),
                failure: HookFailure::from_panic(payload.as_ref()),
            }),
        }
    }
}
