//! Inter-process communication for hookproxy worker processes.
//!
//! This module provides the protocol and utilities for communicating
//! with isolated worker processes that run build backend hooks.

pub mod protocol;
mod serve;
mod worker;

pub use protocol::{
    EnvVar, FailureStage, InvokeRequest, RaisedFailure, WorkerCommand, WorkerResponse,
    expect_message, path_from_bytes, path_to_bytes, read_message, write_message,
};
pub use serve::{handle_invoke, serve, serve_on};
pub use worker::{WORKER_BINARY, WORKER_PATH_ENV, WorkerHandle};
