//! Build backends as seen from inside a worker process.
//!
//! A worker owns a `BackendRegistry` mapping backend names to `Backend`s.
//! Each backend maps hook names to plain functions taking a `HookCall`.
//! Names are resolved late, at invocation time, so an unknown backend or
//! hook is only discovered when a call actually executes.

mod invoker;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::invocation::{HookFailure, Invocation};

pub use invoker::RemoteInvoker;

/// Signature shared by every hook.
pub type HookFn = dyn Fn(&HookCall<'_>) -> std::result::Result<Value, HookFailure> + Send + Sync;

type Loader = dyn Fn() -> std::result::Result<Backend, HookFailure> + Send + Sync;

/// A named set of hooks.
pub struct Backend {
    name: String,
    hooks: FxHashMap<String, Box<HookFn>>,
}

impl Backend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hooks: FxHashMap::default(),
        }
    }

    /// Register a hook under `name`, replacing any previous one.
    pub fn hook<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&HookCall<'_>) -> std::result::Result<Value, HookFailure> + Send + Sync + 'static,
    {
        self.hooks.insert(name.into(), Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hook names in sorted order.
    pub fn hook_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.hooks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Look up a hook by name.
    pub fn resolve(&self, hook: &str) -> Result<&HookFn> {
        self.hooks
            .get(hook)
            .map(|hook| hook.as_ref())
            .ok_or_else(|| Error::HookNotFound {
                backend: self.name.clone(),
                hook: hook.to_string(),
            })
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("hooks", &self.hook_names())
            .finish()
    }
}

struct RegistryEntry {
    backend: Option<Backend>,
    loader: Option<Box<Loader>>,
}

/// Backends available to a worker, by name.
///
/// Backends are either registered ready-made or through a loader that runs
/// on first use. A loader that fails is retried on the next resolution,
/// the way a failed import is retried.
#[derive(Default)]
pub struct BackendRegistry {
    entries: FxHashMap<String, RegistryEntry>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready-made backend under its own name.
    pub fn register(&mut self, backend: Backend) -> &mut Self {
        self.entries.insert(
            backend.name().to_string(),
            RegistryEntry {
                backend: Some(backend),
                loader: None,
            },
        );
        self
    }

    /// Register a backend built lazily on first resolution.
    pub fn register_loader<F>(&mut self, name: impl Into<String>, loader: F) -> &mut Self
    where
        F: Fn() -> std::result::Result<Backend, HookFailure> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            RegistryEntry {
                backend: None,
                loader: Some(Box::new(loader)),
            },
        );
        self
    }

    /// Registered backend names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a backend by name, running its loader if needed.
    pub fn resolve(&mut self, name: &str) -> Result<&Backend> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::BackendResolution {
                backend: name.to_string(),
                message: "no backend with this name is registered in the worker".to_string(),
            })?;

        if entry.backend.is_none()
            && let Some(loader) = &entry.loader
        {
            let backend = loader().map_err(|failure| Error::BackendResolution {
                backend: name.to_string(),
                message: failure.to_string(),
            })?;
            tracing::debug!("Loaded build backend {}", name);
            entry.backend = Some(backend);
        }

        entry.backend.as_ref().ok_or_else(|| Error::BackendResolution {
            backend: name.to_string(),
            message: "backend has no loader".to_string(),
        })
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

/// Arguments and context of one hook call, as seen by the hook.
///
/// Argument lookup follows keyword-call conventions: a parameter may be
/// passed positionally at `index` or by `name`, but not both.
#[derive(Debug, Clone, Copy)]
pub struct HookCall<'a> {
    hook: &'a str,
    args: &'a [Value],
    kwargs: &'a Map<String, Value>,
    working_directory: &'a Path,
    overlay: &'a BTreeMap<String, String>,
}

impl<'a> HookCall<'a> {
    pub fn new(
        invocation: &'a Invocation,
        working_directory: &'a Path,
        overlay: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            hook: &invocation.hook,
            args: &invocation.args,
            kwargs: &invocation.kwargs,
            working_directory,
            overlay,
        }
    }

    /// Name the hook was invoked under.
    pub fn hook(&self) -> &str {
        self.hook
    }

    pub fn args(&self) -> &[Value] {
        self.args
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        self.kwargs
    }

    /// The invocation's working directory (already the current directory).
    pub fn working_directory(&self) -> &Path {
        self.working_directory
    }

    /// A variable from the invocation's environment overlay.
    pub fn overlay_var(&self, key: &str) -> Option<&str> {
        self.overlay.get(key).map(String::as_str)
    }

    fn lookup(&self, index: usize, name: &str) -> std::result::Result<Option<&Value>, HookFailure> {
        match (self.args.get(index), self.kwargs.get(name)) {
            (Some(_), Some(_)) => Err(HookFailure::type_error(format!(
                "{}() got multiple values for argument '{}'",
                self.hook, name
            ))),
            (Some(value), None) | (None, Some(value)) => Ok(Some(value)),
            (None, None) => Ok(None),
        }
    }

    /// A required argument.
    pub fn arg<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
    ) -> std::result::Result<T, HookFailure> {
        let value = self.lookup(index, name)?.ok_or_else(|| {
            HookFailure::type_error(format!(
                "{}() missing required argument '{}'",
                self.hook, name
            ))
        })?;
        self.convert(name, value)
    }

    /// An optional argument; an absent argument and an explicit `null` are both `None`.
    pub fn optional_arg<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
    ) -> std::result::Result<Option<T>, HookFailure> {
        match self.lookup(index, name)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => self.convert(name, value).map(Some),
        }
    }

    fn convert<T: DeserializeOwned>(
        &self,
        name: &str,
        value: &Value,
    ) -> std::result::Result<T, HookFailure> {
        T::deserialize(value).map_err(|e| {
            HookFailure::type_error(format!(
                "{}() argument '{}' has the wrong type: {}",
                self.hook, name, e
            ))
        })
    }
}
