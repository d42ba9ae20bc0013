//! Environment overlays applied inside worker processes.

use std::collections::BTreeMap;
use std::ffi::OsString;

use rustc_hash::FxHashMap;

use crate::invocation::HookFailure;

/// Guard that merges variables into the process environment and puts the
/// whole environment back on drop.
///
/// The merge is additive: variables not named by the overlay are untouched,
/// overlay values win on conflict, nothing is removed. On drop every
/// variable is restored to its state before `apply`, including variables a
/// hook set or removed on its own.
///
/// Only worker processes apply overlays. A worker serves one invocation at a
/// time on its main thread, which is what makes the environment mutation
/// sound.
#[derive(Debug)]
pub struct EnvironmentOverlay {
    snapshot: Vec<(OsString, OsString)>,
    applied: usize,
}

impl EnvironmentOverlay {
    /// Apply `overlay` to the current process environment.
    ///
    /// Fails with a `ValueError` without changing anything when a name is
    /// empty or contains `=` or NUL, or a value contains NUL.
    pub fn apply(overlay: &BTreeMap<String, String>) -> Result<Self, HookFailure> {
        for (key, value) in overlay {
            validate(key, value)?;
        }

        let snapshot = std::env::vars_os().collect();
        for (key, value) in overlay {
            // SAFETY: workers are single-threaded while an invocation runs,
            // so nothing reads the environment concurrently.
            unsafe { std::env::set_var(key, value) };
        }
        Ok(Self {
            snapshot,
            applied: overlay.len(),
        })
    }

    /// Number of variables the overlay set.
    pub fn len(&self) -> usize {
        self.applied
    }

    pub fn is_empty(&self) -> bool {
        self.applied == 0
    }
}

fn validate(key: &str, value: &str) -> Result<(), HookFailure> {
    if key.is_empty() || key.contains(['=', '\0']) {
        return Err(HookFailure::new(
            "ValueError",
            format!("illegal environment variable name: {:?}", key),
        ));
    }
    if value.contains('\0') {
        return Err(HookFailure::new(
            "ValueError",
            format!("embedded null byte in value of environment variable {}", key),
        ));
    }
    Ok(())
}

impl Drop for EnvironmentOverlay {
    fn drop(&mut self) {
        let mut current: FxHashMap<OsString, OsString> = std::env::vars_os().collect();

        for (key, value) in self.snapshot.drain(..) {
            if current.remove(&key).as_ref() != Some(&value) {
                // SAFETY: see `apply`.
                unsafe { std::env::set_var(&key, &value) };
            }
        }
        // Whatever is left was added after the snapshot.
        for key in current.into_keys() {
            // SAFETY: see `apply`.
            unsafe { std::env::remove_var(&key) };
        }
    }
}
