//! Scoped working-directory changes.

use std::io;
use std::path::{Path, PathBuf};

/// Guard that changes the current directory and restores it on drop.
///
/// Restoration happens exactly once, on every exit path: normal completion,
/// early return via `?`, or a panic unwinding through the scope.
///
/// If the current directory cannot be read when entering (it was deleted),
/// there is nothing to restore and dropping the guard leaves the process in
/// the entered directory.
///
/// The current directory is process-global. Callers in the test process
/// use this only for setup code (writing a scratch project); hook calls
/// never change the caller's directory.
#[derive(Debug)]
pub struct DirectoryContext {
    entered: PathBuf,
    original: Option<PathBuf>,
}

impl DirectoryContext {
    /// Record the current directory and change into `dir`.
    pub fn enter(dir: impl AsRef<Path>) -> io::Result<Self> {
        let original = std::env::current_dir().ok();
        let entered = dir.as_ref().to_path_buf();
        std::env::set_current_dir(&entered)?;
        Ok(Self { entered, original })
    }

    /// Run `f` with `dir` as the current directory.
    pub fn scoped<T>(dir: impl AsRef<Path>, f: impl FnOnce() -> T) -> io::Result<T> {
        let _guard = Self::enter(dir)?;
        Ok(f())
    }

    /// The directory that was entered.
    pub fn entered(&self) -> &Path {
        &self.entered
    }

    /// The directory restored on drop, if there is one.
    pub fn original(&self) -> Option<&Path> {
        self.original.as_deref()
    }
}

impl Drop for DirectoryContext {
    fn drop(&mut self) {
        let Some(original) = &self.original else {
            return;
        };
        if let Err(e) = std::env::set_current_dir(original) {
            tracing::warn!(
                "Failed to restore working directory {}: {}",
                original.display(),
                e
            );
        }
    }
}

/// Serializes unit tests that touch process-global state.
#[cfg(test)]
pub(crate) fn process_state_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::Mutex;

    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
