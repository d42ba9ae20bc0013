//! Worker process management for hook invocation.
//!
//! Provides `WorkerHandle` for spawning and communicating with an isolated
//! worker process.

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde_json::Value;

use crate::error::{Error, Result};

use super::protocol::{InvokeRequest, WorkerCommand, WorkerResponse, expect_message, write_message};

/// Environment variable naming the worker binary explicitly.
pub const WORKER_PATH_ENV: &str = "HOOKPROXY_WORKER_PATH";

/// File name of the bundled worker binary.
pub const WORKER_BINARY: &str = "hookproxy-worker";

/// Handle to a worker process.
///
/// A worker runs one invocation at a time. Once the transport fails the
/// handle is marked broken and must not be reused.
pub struct WorkerHandle {
    /// The child process.
    child: Child,
    /// Buffered stdin writer.
    stdin: BufWriter<ChildStdin>,
    /// Buffered stdout reader.
    stdout: BufReader<ChildStdout>,
    /// Whether the worker has been killed.
    killed: bool,
    /// Whether the transport failed mid-conversation.
    broken: bool,
}

impl WorkerHandle {
    /// Spawn a worker process from `worker_path` and wait for its handshake.
    ///
    /// Workers start in the system temp directory rather than the caller's
    /// current directory, which may be a scratch project deleted while the
    /// worker sits idle.
    pub fn spawn(worker_path: &Path) -> Result<Self> {
        // Relative program paths would resolve against the new directory.
        let worker_path = std::path::absolute(worker_path).map_err(|e| {
            Error::Worker(format!(
                "Failed to resolve worker path '{}': {}",
                worker_path.display(),
                e
            ))
        })?;
        let mut child = Command::new(&worker_path)
            .current_dir(std::env::temp_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Let worker stderr pass through for debugging
            .spawn()
            .map_err(|e| {
                Error::Worker(format!(
                    "Failed to spawn worker process '{}': {}",
                    worker_path.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Worker("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Worker("Failed to get worker stdout".to_string()))?;

        let mut handle = Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            killed: false,
            broken: false,
        };

        handle.send_command(&WorkerCommand::Ping)?;
        match handle.recv_response()? {
            WorkerResponse::Pong => {
                tracing::debug!("Worker {} ready", handle.pid());
                Ok(handle)
            }
            other => Err(Error::Worker(format!(
                "Unexpected response from worker: {:?}",
                other
            ))),
        }
    }

    /// Find the worker binary.
    ///
    /// Looks in the following order:
    /// 1. `HOOKPROXY_WORKER_PATH` environment variable
    /// 2. Directory of the current executable, then its parent
    ///    (test binaries live in `target/<profile>/deps`)
    /// 3. System PATH
    /// 4. `target/debug` or `target/release` of the workspace
    pub fn locate() -> Result<PathBuf> {
        let worker_name = format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX);

        if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
            tracing::warn!(
                "{} points at {}, which does not exist",
                WORKER_PATH_ENV,
                path.display()
            );
        }

        if let Ok(exe_path) = std::env::current_exe() {
            for dir in exe_path.ancestors().skip(1).take(2) {
                let candidate = dir.join(&worker_name);
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }

        if let Ok(path) = which::which(&worker_name) {
            return Ok(path);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            for profile in ["debug", "release"] {
                let path = PathBuf::from(&manifest_dir)
                    .join("..")
                    .join("..")
                    .join("target")
                    .join(profile)
                    .join(&worker_name);
                if path.exists() {
                    return Ok(path.canonicalize().unwrap_or(path));
                }
            }
        }

        Err(Error::Worker(format!(
            "Could not find {} binary. Set {} or ensure it's in PATH.",
            WORKER_BINARY, WORKER_PATH_ENV
        )))
    }

    /// Send a command to the worker.
    pub fn send_command(&mut self, cmd: &WorkerCommand) -> Result<()> {
        if self.killed {
            return Err(Error::Worker("Worker has been killed".to_string()));
        }
        write_message(&mut self.stdin, cmd).inspect_err(|_| self.broken = true)
    }

    /// Receive a response from the worker.
    pub fn recv_response(&mut self) -> Result<WorkerResponse> {
        if self.killed {
            return Err(Error::Worker("Worker has been killed".to_string()));
        }
        expect_message(&mut self.stdout).inspect_err(|_| self.broken = true)
    }

    /// Run one invocation and wait for its result.
    pub fn invoke(&mut self, request: &InvokeRequest) -> Result<Value> {
        let pid = self.pid();

        let response = self
            .send_command(&WorkerCommand::Invoke(request.clone()))
            .and_then(|()| self.recv_response())
            .map_err(|e| self.describe_failure(e))?;

        match response {
            WorkerResponse::Returned { id, value_json } => {
                self.check_id(&id, request)?;
                serde_json::from_slice(&value_json).map_err(|e| {
                    Error::Serialization(format!(
                        "Failed to decode result of hook {} from worker {}: {}",
                        request.hook, pid, e
                    ))
                })
            }
            WorkerResponse::Raised { id, failure } => {
                self.check_id(&id, request)?;
                Err(failure.into_error(request))
            }
            other => {
                self.broken = true;
                Err(Error::Worker(format!(
                    "Unexpected response when invoking {}: {:?}",
                    request.hook, other
                )))
            }
        }
    }

    fn check_id(&mut self, id: &str, request: &InvokeRequest) -> Result<()> {
        if id == request.id {
            return Ok(());
        }
        self.broken = true;
        Err(Error::Worker(format!(
            "Worker {} answered invocation {} while {} was pending",
            self.pid(),
            id,
            request.id
        )))
    }

    /// Attach the worker's exit status to a transport error, if it has exited.
    fn describe_failure(&mut self, err: Error) -> Error {
        match self.child.try_wait() {
            Ok(Some(status)) => Error::Worker(format!(
                "Worker process {} exited unexpectedly ({}): {}",
                self.pid(),
                status,
                err
            )),
            _ => err,
        }
    }

    /// Kill the worker process immediately.
    pub fn kill(&mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }

        self.killed = true;

        if let Err(e) = self.child.kill() {
            // InvalidInput means the process already exited, which is fine
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill worker: {}", e);
            }
        }

        // Wait to reap zombie
        let _ = self.child.wait();

        Ok(())
    }

    /// Check if the worker process is still running.
    pub fn is_alive(&mut self) -> bool {
        if self.killed {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Whether the worker can take another invocation.
    pub fn is_reusable(&mut self) -> bool {
        !self.broken && self.is_alive()
    }

    /// Get the process ID of the worker.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Graceful shutdown - ask worker to exit cleanly.
    pub fn shutdown(mut self) -> Result<()> {
        if self.killed || self.broken {
            return self.kill();
        }

        self.send_command(&WorkerCommand::Shutdown)?;
        if !matches!(self.recv_response(), Ok(WorkerResponse::ShuttingDown)) {
            tracing::debug!("Worker {} did not acknowledge shutdown", self.pid());
        }

        match self.child.wait() {
            Ok(status) => {
                self.killed = true;
                if status.success() {
                    Ok(())
                } else {
                    Err(Error::Worker(format!(
                        "Worker exited with status: {}",
                        status
                    )))
                }
            }
            Err(e) => Err(Error::Worker(format!("Failed to wait for worker: {}", e))),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Ensure worker is killed when handle is dropped
        let _ = self.kill();
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("pid", &self.pid())
            .field("killed", &self.killed)
            .field("broken", &self.broken)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_missing_binary_is_worker_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = WorkerHandle::spawn(&temp.path().join("no-such-worker")).unwrap_err();
        assert!(err.is_infrastructure());
        assert!(err.to_string().contains("Failed to spawn worker process"));
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_non_worker_binary_fails_handshake() {
        // `true` exits immediately without answering the ping.
        let Ok(path) = which::which("true") else {
            return;
        };
        let err = WorkerHandle::spawn(&path).unwrap_err();
        assert!(matches!(err, Error::Worker(_)));
    }
}
