//! IPC protocol messages for hookproxy worker processes.
//!
//! Uses length-prefixed rkyv messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + rkyv-encoded message.
//! Hook arguments and results travel as JSON bytes inside the envelope.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::invocation::HookFailure;

/// Largest message either side accepts (100MB).
const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// One environment overlay entry.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// Everything a worker needs to rebuild and run one invocation.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Invocation id, echoed in the response.
    pub id: String,
    /// Absolute working directory for the hook, as raw path bytes.
    pub working_directory: Vec<u8>,
    /// Environment overlay.
    pub environment: Vec<EnvVar>,
    /// Backend name to resolve in the worker's registry.
    pub backend: String,
    /// Hook name to resolve on the backend.
    pub hook: String,
    /// Positional arguments as a JSON array.
    pub args_json: Vec<u8>,
    /// Named arguments as a JSON object.
    pub kwargs_json: Vec<u8>,
}

/// Command sent from parent to worker process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Run one hook invocation.
    Invoke(InvokeRequest),

    /// Shutdown the worker process gracefully.
    Shutdown,

    /// Ping to check if worker is alive.
    Ping,
}

/// Where in the invocation a failure was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum FailureStage {
    /// Entering the working directory.
    Context,
    /// Resolving the backend by name.
    Resolve,
    /// Resolving the hook on the backend.
    Lookup,
    /// Running the hook.
    Execute,
    /// Decoding the request or encoding the result inside the worker.
    Transport,
}

/// Failure payload relayed from worker to parent.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct RaisedFailure {
    pub stage: FailureStage,
    pub kind: String,
    pub message: String,
    pub traceback: Vec<String>,
}

impl RaisedFailure {
    /// Describe a worker-side error for the parent.
    pub fn from_error(err: &Error) -> Self {
        let (stage, kind, message, traceback) = match err {
            Error::Context { message, .. } => {
                (FailureStage::Context, "Context".to_string(), message.clone(), Vec::new())
            }
            Error::BackendResolution { message, .. } => (
                FailureStage::Resolve,
                "BackendResolution".to_string(),
                message.clone(),
                Vec::new(),
            ),
            Error::HookNotFound { .. } => (
                FailureStage::Lookup,
                "HookNotFound".to_string(),
                err.to_string(),
                Vec::new(),
            ),
            Error::HookExecution { failure, .. } => (
                FailureStage::Execute,
                failure.kind.clone(),
                failure.message.clone(),
                failure.traceback.clone(),
            ),
            other => (
                FailureStage::Transport,
                "Worker".to_string(),
                other.to_string(),
                Vec::new(),
            ),
        };
        Self {
            stage,
            kind,
            message,
            traceback,
        }
    }

    /// Rebuild the caller-side error for the request this failure answers.
    pub fn into_error(self, request: &InvokeRequest) -> Error {
        match self.stage {
            FailureStage::Context => Error::Context {
                path: path_from_bytes(&request.working_directory).unwrap_or_else(|_| {
                    PathBuf::from(String::from_utf8_lossy(&request.working_directory).into_owned())
                }),
                message: self.message,
            },
            FailureStage::Resolve => Error::BackendResolution {
                backend: request.backend.clone(),
                message: self.message,
            },
            FailureStage::Lookup => Error::HookNotFound {
                backend: request.backend.clone(),
                hook: request.hook.clone(),
            },
            FailureStage::Execute => Error::HookExecution {
                hook: request.hook.clone(),
                failure: HookFailure {
                    kind: self.kind,
                    message: self.message,
                    traceback: self.traceback,
                },
            },
            FailureStage::Transport => Error::Worker(self.message),
        }
    }
}

/// Encode a path for the wire without loss.
#[cfg(unix)]
pub fn path_to_bytes(path: &Path) -> Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;

    Ok(path.as_os_str().as_bytes().to_vec())
}

/// Encode a path for the wire; only UTF-8 paths are representable here.
#[cfg(not(unix))]
pub fn path_to_bytes(path: &Path) -> Result<Vec<u8>> {
    path.to_str()
        .map(|s| s.as_bytes().to_vec())
        .ok_or_else(|| Error::Context {
            path: path.to_path_buf(),
            message: "path is not valid UTF-8".to_string(),
        })
}

/// Decode a path produced by `path_to_bytes`.
#[cfg(unix)]
pub fn path_from_bytes(bytes: &[u8]) -> Result<PathBuf> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    Ok(PathBuf::from(OsStr::from_bytes(bytes)))
}

/// Decode a path produced by `path_to_bytes`.
#[cfg(not(unix))]
pub fn path_from_bytes(bytes: &[u8]) -> Result<PathBuf> {
    std::str::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|e| Error::Serialization(format!("Failed to decode working directory: {}", e)))
}

/// Response sent from worker to parent process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerResponse {
    /// Hook returned a value.
    Returned {
        /// Invocation id from the request.
        id: String,
        /// Return value as JSON.
        value_json: Vec<u8>,
    },

    /// Invocation failed inside the worker.
    Raised {
        /// Invocation id from the request.
        id: String,
        failure: RaisedFailure,
    },

    /// Response to Ping command.
    Pong,

    /// Acknowledgement of shutdown request.
    ShuttingDown,
}

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> Result<()> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))?;

    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Worker(format!("IPC message too large: {} bytes", bytes.len())))?;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Worker(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Worker(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Worker(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed rkyv encoding.
///
/// Returns `Ok(None)` when the stream ends cleanly before a new message.
///
/// # Safety
///
/// Uses unchecked deserialization. Only safe when reading from trusted
/// sources (our own parent or worker processes).
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<Option<T>>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(Error::Worker(format!(
                "Failed to read IPC message length: {}",
                e
            )));
        }
    }
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_LEN {
        return Err(Error::Worker(format!("IPC message too large: {} bytes", len)));
    }

    // rkyv needs an aligned buffer to read archived data in place.
    let mut bytes = rkyv::util::AlignedVec::<16>::with_capacity(len);
    bytes.resize(len, 0);
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Worker(format!("Failed to read IPC message body: {}", e)))?;

    // SAFETY: We trust data from our own parent and worker processes.
    let message = unsafe { rkyv::from_bytes_unchecked::<T, rkyv::rancor::Error>(&bytes) }
        .map_err(|e| Error::Serialization(format!("Failed to decode IPC message: {}", e)))?;

    Ok(Some(message))
}

/// Like `read_message`, but a closed stream is an error.
pub fn expect_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    read_message(reader)?.ok_or_else(|| Error::Worker("IPC stream closed unexpectedly".to_string()))
}
