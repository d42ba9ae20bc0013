//! Worker-side command loop.
//!
//! A worker binary builds its `BackendRegistry` and hands it to `serve`,
//! which answers commands from the parent until told to shut down or until
//! the parent closes the channel.

use std::io::{BufReader, BufWriter, Read, Write};

use crate::backend::{BackendRegistry, RemoteInvoker};
use crate::error::{Error, Result};

use super::protocol::{
    InvokeRequest, RaisedFailure, WorkerCommand, WorkerResponse, read_message, write_message,
};

/// Serve IPC commands on this process's stdin/stdout.
///
/// On unix the IPC descriptors are moved aside first: stdout is pointed at
/// stderr and stdin at `/dev/null`, so hooks that print or read cannot
/// corrupt the protocol stream.
pub fn serve(registry: BackendRegistry) -> Result<()> {
    let (reader, writer) = ipc_channel()?;
    serve_on(registry, reader, writer)
}

/// Serve IPC commands on explicit streams.
pub fn serve_on<R: Read, W: Write>(
    mut registry: BackendRegistry,
    reader: R,
    writer: W,
) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);

    tracing::info!(
        "Worker {} serving backends: {}",
        std::process::id(),
        registry.names().join(", ")
    );

    while let Some(command) = read_message::<_, WorkerCommand>(&mut reader)? {
        match command {
            WorkerCommand::Ping => write_message(&mut writer, &WorkerResponse::Pong)?,
            WorkerCommand::Shutdown => {
                write_message(&mut writer, &WorkerResponse::ShuttingDown)?;
                tracing::info!("Worker {} shutting down", std::process::id());
                return Ok(());
            }
            WorkerCommand::Invoke(request) => {
                let response = handle_invoke(&mut registry, &request);
                write_message(&mut writer, &response)?;
            }
        }
    }

    tracing::debug!("Parent closed the IPC channel");
    Ok(())
}

/// Run one request against `registry` and build the response.
pub fn handle_invoke(registry: &mut BackendRegistry, request: &InvokeRequest) -> WorkerResponse {
    let result = RemoteInvoker::from_request(request)
        .and_then(|(invoker, invocation)| invoker.invoke(registry, &invocation))
        .and_then(|value| {
            serde_json::to_vec(&value)
                .map_err(|e| Error::Serialization(format!("Failed to encode hook result: {}", e)))
        });

    match result {
        Ok(value_json) => WorkerResponse::Returned {
            id: request.id.clone(),
            value_json,
        },
        Err(e) => {
            tracing::debug!("Invocation {} of {} failed: {}", request.id, request.hook, e);
            WorkerResponse::Raised {
                id: request.id.clone(),
                failure: RaisedFailure::from_error(&e),
            }
        }
    }
}

type Channel = (Box<dyn Read + Send>, Box<dyn Write + Send>);

#[cfg(unix)]
fn ipc_channel() -> Result<Channel> {
    use std::fs::File;
    use std::os::fd::{AsRawFd, FromRawFd};

    std::io::stdout().flush()?;

    // SAFETY: plain descriptor duplication on descriptors this process owns;
    // the duplicates are wrapped in `File`s that take ownership exactly once.
    unsafe {
        let ipc_in = libc::dup(libc::STDIN_FILENO);
        if ipc_in < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let ipc_in = File::from_raw_fd(ipc_in);

        let ipc_out = libc::dup(libc::STDOUT_FILENO);
        if ipc_out < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let ipc_out = File::from_raw_fd(ipc_out);

        if libc::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO) < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let null = File::open("/dev/null")?;
        if libc::dup2(null.as_raw_fd(), libc::STDIN_FILENO) < 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        Ok((Box::new(ipc_in), Box::new(ipc_out)))
    }
}

#[cfg(not(unix))]
fn ipc_channel() -> Result<Channel> {
    Ok((Box::new(std::io::stdin()), Box::new(std::io::stdout())))
}
