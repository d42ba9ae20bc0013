//! Error types for hookproxy-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::invocation::HookFailure;

/// Result type for hookproxy-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while invoking a hook.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured backend could not be resolved or failed while loading.
    #[error("failed to resolve build backend `{backend}`: {message}")]
    BackendResolution { backend: String, message: String },

    /// The backend has no hook with the requested name.
    #[error("build backend `{backend}` has no hook named `{hook}`")]
    HookNotFound { backend: String, hook: String },

    /// The hook ran and failed.
    #[error("hook `{hook}` failed: {failure}")]
    HookExecution { hook: String, failure: HookFailure },

    /// The invocation's working directory could not be entered.
    #[error("failed to enter working directory {}: {message}", path.display())]
    Context { path: PathBuf, message: String },

    /// The worker process could not be started, crashed, or the transport failed.
    #[error("worker error: {0}")]
    Worker(String),

    /// The name belongs to the proxy itself and is never forwarded.
    #[error("`{0}` is reserved by the backend proxy and cannot be used as a hook name")]
    ReservedHookName(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is an infrastructure failure rather than a hook-level one.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Worker(_) | Self::Serialization(_) | Self::Io(_))
    }

    /// The hook's own failure payload, if the hook ran and failed.
    pub fn hook_failure(&self) -> Option<&HookFailure> {
        match self {
            Self::HookExecution { failure, .. } => Some(failure),
            _ => None,
        }
    }
}
