//! Addressing a build backend and the context its hooks run in.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Backend used when an address does not name one.
pub const DEFAULT_BACKEND: &str = "sample.build_meta";

/// Which backend a call targets and the execution context it runs in.
///
/// Immutable once built. One address is typically created per test fixture
/// and reused for every hook call in that test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAddress {
    working_directory: PathBuf,
    environment: BTreeMap<String, String>,
    backend: String,
}

impl BackendAddress {
    /// Address the default backend, running hooks in `working_directory`.
    ///
    /// A relative directory is resolved against the caller's current
    /// directory at call time, not here.
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            environment: BTreeMap::new(),
            backend: DEFAULT_BACKEND.to_string(),
        }
    }

    /// Target a different backend by name.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    /// Add one variable to the environment overlay.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Replace the environment overlay.
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// The working directory made absolute against the current directory.
    pub fn absolute_working_directory(&self) -> io::Result<PathBuf> {
        std::path::absolute(&self.working_directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let address = BackendAddress::new("/srv/project");
        assert_eq!(address.backend(), DEFAULT_BACKEND);
        assert!(address.environment().is_empty());
        assert_eq!(address.working_directory(), Path::new("/srv/project"));
    }

    #[test]
    fn test_overlay_later_value_wins() {
        let address = BackendAddress::new(".")
            .with_backend("sample.probe")
            .with_env("SETUPTOOLS_USE_DISTUTILS", "stdlib")
            .with_env("SETUPTOOLS_USE_DISTUTILS", "local");

        assert_eq!(address.backend(), "sample.probe");
        assert_eq!(
            address.environment().get("SETUPTOOLS_USE_DISTUTILS").map(String::as_str),
            Some("local")
        );
    }

    #[test]
    fn test_absolute_working_directory_keeps_absolute_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        let address = BackendAddress::new(dir.path());
        assert_eq!(address.absolute_working_directory().unwrap(), dir.path());
    }
}
