//! Invocation records and hook failure payloads.
//!
//! Everything in this module crosses the process boundary, so it only holds
//! plain JSON values and strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single hook call: the hook name plus its positional and named arguments.
///
/// Created fresh for every call and discarded once the result is delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Name of the hook to resolve on the backend.
    pub hook: String,
    /// Positional arguments, in order.
    pub args: Vec<Value>,
    /// Named arguments.
    pub kwargs: Map<String, Value>,
}

impl Invocation {
    /// Create an invocation of `hook` with no arguments.
    pub fn new(hook: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Create an invocation with explicit argument lists.
    pub fn with_arguments(
        hook: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Self {
        Self {
            hook: hook.into(),
            args,
            kwargs,
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a named argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }
}

/// Failure raised by a hook, carried back to the caller.
///
/// Mirrors what an in-process caller would see: the kind of failure (an error
/// type name, `panic`, or a backend-chosen label such as `ValueError`), its
/// message, and a reconstructed traceback made of the error's source chain.
///
/// Any `std::error::Error` converts into a `HookFailure`, so hooks can use `?`
/// on I/O and serialization errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFailure {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl HookFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    /// Failure for a hook called with missing or mistyped arguments.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// Failure for a panic caught while running a hook.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "hook panicked with a non-string payload".to_string()
        };
        Self::new("panic", message)
    }

    /// Append a line to the traceback.
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.traceback.push(frame.into());
        self
    }
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl<E> From<E> for HookFailure
where
    E: std::error::Error,
{
    fn from(err: E) -> Self {
        let mut traceback = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            traceback.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            traceback,
        }
    }
}
