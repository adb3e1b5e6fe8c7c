//! Temporary directory management for tests.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A managed temporary directory for bundle tests.
///
/// The directory and every bundle in it are removed when this is dropped.
///
/// # Example
///
/// ```
/// use starmap_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let bundle = dir.bundle_path("sky");
/// assert!(bundle.ends_with("sky.starmap"));
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Creates a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let inner = TempDir::new().expect("failed to create temp directory");
        Self { inner }
    }

    /// Returns the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Joins a relative path to the temporary directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Returns the path of a bundle file named `name` inside the directory.
    #[must_use]
    pub fn bundle_path(&self, name: &str) -> PathBuf {
        self.join(format!("{name}.starmap"))
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
