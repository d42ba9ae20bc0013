//! Diagnostic backends used to observe the worker from the outside.

use std::time::Duration;

use hookproxy_core::{Backend, HookFailure};
use serde_json::{Value, json};

/// Name of the introspection backend.
pub const NAME: &str = "sample.probe";

/// Name of the backend whose loader always fails.
pub const BROKEN_NAME: &str = "sample.broken";

pub fn backend() -> Backend {
    Backend::new(NAME)
        .hook("current_directory", |_| {
            let cwd = std::env::current_dir()?;
            Ok(Value::from(cwd.to_string_lossy().into_owned()))
        })
        .hook("environment_variable", |call| {
            let name: String = call.arg(0, "name")?;
            Ok(std::env::var(&name).map_or(Value::Null, Value::from))
        })
        .hook("set_environment_variable", |call| {
            let name: String = call.arg(0, "name")?;
            let value: String = call.arg(1, "value")?;
            if name.is_empty() || name.contains(['=', '\0']) || value.contains('\0') {
                return Err(HookFailure::new("ValueError", "illegal environment variable"));
            }
            // SAFETY: the worker runs one hook at a time on its main thread.
            unsafe { std::env::set_var(&name, &value) };
            Ok(Value::Null)
        })
        .hook("echo", |call| {
            Ok(json!({
                "args": call.args(),
                "kwargs": call.kwargs(),
            }))
        })
        .hook("fail", |call| {
            let kind: Option<String> = call.optional_arg(0, "kind")?;
            let message: Option<String> = call.optional_arg(1, "message")?;
            Err(HookFailure::new(
                kind.unwrap_or_else(|| "RuntimeError".to_string()),
                message.unwrap_or_default(),
            )
            .with_frame(format!("{}.fail", NAME)))
        })
        .hook("panic", |call| {
            let message: Option<String> = call.optional_arg(0, "message")?;
            panic!("{}", message.unwrap_or_else(|| "probe panic".to_string()));
        })
        .hook("exit", |call| {
            let code: Option<i32> = call.optional_arg(0, "code")?;
            tracing::warn!("Exiting worker on request");
            std::process::exit(code.unwrap_or(1));
        })
        .hook("process_id", |_| Ok(Value::from(std::process::id())))
        .hook("sleep", |call| {
            let millis: u64 = call.arg(0, "milliseconds")?;
            std::thread::sleep(Duration::from_millis(millis));
            Ok(Value::from(std::process::id()))
        })
        .hook("print", |call| {
            let text: String = call.arg(0, "text")?;
            // Lands on stderr: stdout is moved aside while serving.
            println!("{}", text);
            Ok(Value::from(text.len()))
        })
}

/// Loader for `sample.broken`, failing the way an import-time error would.
pub fn load_broken() -> Result<Backend, HookFailure> {
    Err(HookFailure::new(
        "ImportError",
        format!("No module named '{}'", BROKEN_NAME),
    ))
}
