//! Host build environment.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::{BuildEnvironment, CommandRunner, LibcPackage, parse_dependency_listing};
use crate::error::PackError;
use crate::library::LibraryPath;

/// Package managers probed for the host C library, in order.
const HOST_PACKAGE_TOOLS: [LibcPackage; 3] = [LibcPackage::Dpkg, LibcPackage::Rpm, LibcPackage::Apk];

/// Runs `ldd` and `strip` directly on the host.
#[derive(Debug)]
pub struct NativeEnvironment {
    runner: Arc<dyn CommandRunner>,
    package_tool: Option<LibcPackage>,
}

impl NativeEnvironment {
    /// Create a host environment, probing `PATH` for a package manager.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let package_tool = HOST_PACKAGE_TOOLS
            .into_iter()
            .find(|tool| which::which(tool.query().0).is_ok());
        Self::with_package_tool(runner, package_tool)
    }

    /// Create a host environment with an explicit package manager.
    pub fn with_package_tool(
        runner: Arc<dyn CommandRunner>,
        package_tool: Option<LibcPackage>,
    ) -> Self {
        Self {
            runner,
            package_tool,
        }
    }
}

#[async_trait]
impl BuildEnvironment for NativeEnvironment {
    fn kind(&self) -> &'static str {
        "native"
    }

    async fn start(&self) -> Result<(), PackError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), PackError> {
        Ok(())
    }

    async fn strip(&self, path: &Path) -> Result<(), PackError> {
        self.runner
            .run("strip", &[path.display().to_string()])
            .await
            .map(|_| ())
    }

    async fn resolve_dynamic_deps(&self, path: &Path) -> Result<BTreeSet<LibraryPath>, PackError> {
        let output = self
            .runner
            .run("ldd", &[path.display().to_string()])
            .await?;
        Ok(parse_dependency_listing(&output))
    }

    async fn base_library_set(&self) -> Result<BTreeSet<LibraryPath>, PackError> {
        let Some(tool) = self.package_tool else {
            return Err(PackError::command(
                "libc query",
                "no supported package manager (dpkg-query, rpm, apk) found on PATH",
            ));
        };

        let (program, _) = tool.query();
        let output = self.runner.run(program, &tool.query_args()).await?;

        Ok(tool
            .parse_contents(&output)
            .into_iter()
            .filter(|p| p.exists())
            .map(LibraryPath::new)
            .collect())
    }

    fn library_root(&self) -> Option<&Path> {
        None
    }
}
