//! Shared-library paths as seen inside a build environment.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// File-name prefix of dynamic linkers (`ld-linux-x86-64.so.2`, `ld-musl-x86_64.so.1`).
const LOADER_PREFIX: &str = "ld-";

/// Absolute path of a shared library or dynamic linker inside the build
/// environment.
///
/// Paths are normalized on construction (repeated separators and `.`
/// components removed), so equality and ordering follow the normalized text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LibraryPath(PathBuf);

impl LibraryPath {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(path.as_ref().components().collect())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Final path component, or an empty string for `/`.
    pub fn file_name(&self) -> &str {
        self.0
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Whether the file name marks this as the dynamic linker.
    pub fn is_loader(&self) -> bool {
        self.file_name().starts_with(LOADER_PREFIX)
    }

    /// Location of this library beneath `root` (a sysroot copy of the
    /// environment's filesystem).
    pub fn under(&self, root: &Path) -> PathBuf {
        let relative: PathBuf = self
            .0
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        root.join(relative)
    }
}

impl fmt::Display for LibraryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for LibraryPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
