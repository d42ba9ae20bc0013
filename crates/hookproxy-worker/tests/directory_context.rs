//! Relative backend addresses resolved against a scoped working directory.
//!
//! These tests change the test process's current directory, so they live in
//! their own binary and hold a lock for their whole body.

mod support;

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hookproxy_core::{BackendAddress, BackendProxy, DirectoryContext, WorkerPool};
use serde_json::Map;
use tempfile::TempDir;

use support::{PROBE_BACKEND, SAMPLE_BACKEND, pool_config, proxy, sample_project};

static CWD_LOCK: Mutex<()> = Mutex::new(());

fn cwd_lock() -> MutexGuard<'static, ()> {
    CWD_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

#[test]
fn test_relative_address_resolves_at_call_time() {
    let _lock = cwd_lock();
    let project = sample_project();
    let caller_cwd = std::env::current_dir().unwrap();

    let backend = proxy(".", PROBE_BACKEND);
    let seen: String = DirectoryContext::scoped(project.path(), || {
        backend
            .call_as("current_directory", vec![], Map::new())
            .unwrap()
    })
    .unwrap();

    assert_eq!(
        fs::canonicalize(seen).unwrap(),
        fs::canonicalize(project.path()).unwrap()
    );
    assert_eq!(std::env::current_dir().unwrap(), caller_cwd);
}

#[test]
fn test_build_from_scoped_project_directory() {
    let _lock = cwd_lock();
    let project = sample_project();
    let dist_dir = project.path().join("dist");
    fs::create_dir_all(&dist_dir).unwrap();

    let backend = proxy(".", SAMPLE_BACKEND);
    {
        let guard = DirectoryContext::enter(project.path()).unwrap();
        assert_eq!(guard.entered(), project.path());

        let wheel: String = backend
            .call_as("build_wheel", vec!["dist".into()], Map::new())
            .unwrap();
        assert!(dist_dir.join(wheel).is_file());
    }

    // Back in the crate directory, "." no longer names the project.
    let err = backend
        .call("get_requires_for_build_wheel", vec![], Map::new())
        .unwrap_err();
    assert_eq!(
        err.hook_failure().map(|f| f.kind.as_str()),
        Some("FileNotFoundError")
    );
}

#[test]
fn test_pooled_worker_outlives_the_directory_it_was_spawned_from() {
    let _lock = cwd_lock();
    let pool = WorkerPool::new(pool_config().max_idle(1));
    let proxy_in = |dir: &Path| {
        BackendProxy::with_pool(
            BackendAddress::new(dir).with_backend(PROBE_BACKEND),
            pool.clone(),
        )
    };

    let first = TempDir::new().unwrap();
    let first_pid: u32 = DirectoryContext::scoped(first.path(), || {
        proxy_in(Path::new(".")).call_as("process_id", vec![], Map::new()).unwrap()
    })
    .unwrap();
    drop(first);

    let second = TempDir::new().unwrap();
    let backend = proxy_in(second.path());
    let second_pid: u32 = backend.call_as("process_id", vec![], Map::new()).unwrap();
    let seen: String = backend
        .call_as("current_directory", vec![], Map::new())
        .unwrap();

    assert_eq!(first_pid, second_pid, "the idle worker should be reused");
    assert_eq!(
        fs::canonicalize(seen).unwrap(),
        fs::canonicalize(second.path()).unwrap()
    );
}
