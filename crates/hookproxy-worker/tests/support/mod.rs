//! Shared helpers for the end-to-end tests.

#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hookproxy_core::{BackendAddress, BackendProxy, PoolConfig};
use tempfile::TempDir;

pub const SAMPLE_BACKEND: &str = "sample.build_meta";
pub const PROBE_BACKEND: &str = "sample.probe";
pub const BROKEN_BACKEND: &str = "sample.broken";

/// The worker binary built alongside these tests.
pub fn worker_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_hookproxy-worker"))
}

pub fn pool_config() -> PoolConfig {
    PoolConfig::default().worker_path(worker_binary())
}

/// A proxy for `backend` running hooks in `dir`.
pub fn proxy(dir: impl Into<PathBuf>, backend: &str) -> BackendProxy {
    BackendProxy::with_config(
        BackendAddress::new(dir).with_backend(backend),
        pool_config(),
    )
}

/// Write `files` (relative path, contents) under `root`, creating parents.
pub fn build_files(root: &Path, files: &[(&str, &str)]) -> io::Result<()> {
    for (path, contents) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
    }
    Ok(())
}

pub const SETUP_JSON: &str = r#"{
    "name": "foo",
    "py_modules": ["hello"],
    "setup_requires": ["six"],
    "entry_points": {"console_scripts": ["hi = hello.run"]},
    "zip_safe": false
}
"#;

pub const HELLO_PY: &str = "def run():\n    print('hello')\n";

/// A scratch project declaring one module and one setup requirement.
pub fn sample_project() -> TempDir {
    let dir = TempDir::new().expect("create temp dir");
    build_files(
        dir.path(),
        &[("setup.json", SETUP_JSON), ("hello.py", HELLO_PY)],
    )
    .expect("write project files");
    dir
}
