//! Cross-architecture build environment backed by a sysroot.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fnpack_schema::Arch;

use super::{BuildEnvironment, CommandRunner, parse_dependency_listing};
use crate::error::PackError;
use crate::library::LibraryPath;

/// Resolves dependencies with a cross `ldd` helper run against a sysroot.
///
/// The helper prints the same line shapes as `ldd`, including the C library
/// members, so the base set only adds the target's dynamic linker.
#[derive(Debug)]
pub struct CrossEnvironment {
    arch: Arch,
    sysroot: PathBuf,
    helper: String,
    runner: Arc<dyn CommandRunner>,
}

impl CrossEnvironment {
    /// `helper` defaults to `<gnu-triple>-ldd` when `None`.
    pub fn new(
        arch: Arch,
        sysroot: PathBuf,
        helper: Option<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let helper = helper.unwrap_or_else(|| format!("{}-ldd", arch.gnu_triple()));
        Self {
            arch,
            sysroot,
            helper,
            runner,
        }
    }

    pub fn helper(&self) -> &str {
        &self.helper
    }
}

#[async_trait]
impl BuildEnvironment for CrossEnvironment {
    fn kind(&self) -> &'static str {
        "cross"
    }

    async fn start(&self) -> Result<(), PackError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), PackError> {
        Ok(())
    }

    async fn strip(&self, path: &Path) -> Result<(), PackError> {
        tracing::debug!(path = %path.display(), arch = %self.arch, "cross strip unsupported, skipping");
        Ok(())
    }

    async fn resolve_dynamic_deps(&self, path: &Path) -> Result<BTreeSet<LibraryPath>, PackError> {
        let args = [
            "--root".to_string(),
            self.sysroot.display().to_string(),
            path.display().to_string(),
        ];
        let output = self.runner.run(&self.helper, &args).await?;
        Ok(parse_dependency_listing(&output))
    }

    async fn base_library_set(&self) -> Result<BTreeSet<LibraryPath>, PackError> {
        Ok(BTreeSet::from([LibraryPath::new(self.arch.dynamic_linker())]))
    }

    fn library_root(&self) -> Option<&Path> {
        Some(&self.sysroot)
    }
}
