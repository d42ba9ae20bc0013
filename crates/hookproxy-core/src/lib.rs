//! Process-isolated invocation of build backend hooks.
//!
//! This crate provides:
//! - `BackendProxy`, a handle that forwards any named hook to a worker process
//! - `RemoteInvoker`, the unit of work executed inside a worker
//! - `WorkerPool`, on-demand pool of worker processes
//! - `DirectoryContext`, scoped working-directory changes
//!
//! Hooks mutate process-global state (current directory, environment), so
//! every call runs inside a separate worker process and only plain JSON
//! values cross the boundary.

pub mod address;
pub mod backend;
pub mod directory;
pub mod environment;
pub mod error;
pub mod invocation;
pub mod ipc;
pub mod pool;
pub mod proxy;

pub use address::BackendAddress;
pub use backend::{Backend, BackendRegistry, HookCall, RemoteInvoker};
pub use directory::DirectoryContext;
pub use environment::EnvironmentOverlay;
pub use error::{Error, Result};
pub use invocation::{HookFailure, Invocation};
pub use pool::{PendingInvocation, PoolConfig, WorkerPool};
pub use proxy::{BackendProxy, Hook};
