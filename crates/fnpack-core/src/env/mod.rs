//! Build environments.
//!
//! A [`BuildEnvironment`] answers two questions about an already-built
//! executable: which shared libraries does it load, and which libraries make
//! up the environment's C library. Three variants exist:
//!
//! | Variant | Selected when | Dependency listing |
//! |---|---|---|
//! | [`ContainerEnvironment`] | an image is configured | `ldd` inside a running container |
//! | [`CrossEnvironment`] | target arch differs from the host | `<triple>-ldd --root <sysroot>` |
//! | [`NativeEnvironment`] | otherwise | host `ldd` |
//!
//! One instance is shared by every entry-point task. [`BuildEnvironment::start`]
//! and [`BuildEnvironment::stop`] are called once by the orchestrator; all
//! other methods may run concurrently.

pub mod command;
pub mod container;
pub mod cross;
pub mod native;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

pub use command::{CommandRunner, SystemRunner};
pub use container::{BollardEngine, ContainerEngine, ContainerEnvironment};
pub use cross::CrossEnvironment;
pub use native::NativeEnvironment;

use crate::config::Settings;
use crate::error::PackError;
use crate::library::LibraryPath;

/// Resolves the runtime library closure of executables.
#[async_trait]
pub trait BuildEnvironment: Send + Sync + fmt::Debug {
    /// Short name for logs (`native`, `cross`, `container`).
    fn kind(&self) -> &'static str;

    /// Acquire environment resources (e.g. launch the container).
    async fn start(&self) -> Result<(), PackError>;

    /// Release environment resources. Calling it more than once, or without a
    /// successful `start`, is a no-op.
    async fn stop(&self) -> Result<(), PackError>;

    /// Strip symbols from `path` in place.
    async fn strip(&self, path: &Path) -> Result<(), PackError>;

    /// Shared libraries `path` loads, including the dynamic linker.
    async fn resolve_dynamic_deps(&self, path: &Path) -> Result<BTreeSet<LibraryPath>, PackError>;

    /// Libraries belonging to the environment's C library.
    async fn base_library_set(&self) -> Result<BTreeSet<LibraryPath>, PackError>;

    /// Local directory that library paths are relative to, when they do not
    /// name files on this host.
    fn library_root(&self) -> Option<&Path>;
}

/// Pick the environment variant for `settings`.
///
/// # Errors
///
/// Returns [`PackError::Command`] if an image is configured and the container
/// engine connection settings are invalid.
pub fn select_environment(
    settings: &Settings,
    runner: Arc<dyn CommandRunner>,
) -> Result<Arc<dyn BuildEnvironment>, PackError> {
    if let Some(image) = &settings.image {
        let engine = BollardEngine::connect()?;
        return Ok(Arc::new(ContainerEnvironment::new(
            image.clone(),
            settings.project_dir.clone(),
            settings.sysroot.clone().unwrap_or_default(),
            Arc::new(engine),
        )));
    }

    if settings.target_arch != fnpack_schema::Arch::current() {
        return Ok(Arc::new(CrossEnvironment::new(
            settings.target_arch,
            settings.sysroot.clone().unwrap_or_default(),
            settings.cross_helper.clone(),
            runner,
        )));
    }

    Ok(Arc::new(NativeEnvironment::new(runner)))
}

/// Extract library paths from `ldd`-style output.
///
/// Each line is trimmed and split on single spaces:
/// - `<path> (<addr>)` with an absolute `<path>` yields `<path>`
/// - `<name> => <path> (<addr>)` with an absolute `<path>` yields `<path>`
///
/// Anything else (the vDSO, headers, statically linked notices) is skipped.
/// Unresolved `<name> => not found` lines are logged.
pub fn parse_dependency_listing(output: &str) -> BTreeSet<LibraryPath> {
    let mut libs = BTreeSet::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.trim().split(' ').collect();
        match parts.as_slice() {
            [path, _addr] if path.starts_with('/') => {
                libs.insert(LibraryPath::new(path));
            }
            // Only `=>` lines qualify, not any four tokens. `not found` lines
            // carry no path and fall through to the arm below.
            [_name, "=>", path, _addr] if path.starts_with('/') => {
                libs.insert(LibraryPath::new(path));
            }
            [name, "=>", "not", "found"] => {
                tracing::warn!(library = %name, "dependency not found by environment");
            }
            _ => {}
        }
    }

    libs
}

static SHARED_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/]+\.so(\.[0-9]+)*$").expect("valid regex"));

/// Whether a file name follows the `lib*.so[.N...]` naming of shared objects.
pub(crate) fn is_shared_object(name: &str) -> bool {
    SHARED_OBJECT.is_match(name)
}

/// Package managers whose C library package contents can be listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibcPackage {
    /// Debian/Ubuntu `libc6`
    Dpkg,
    /// Fedora/RHEL `glibc`
    Rpm,
    /// Alpine `musl`
    Apk,
}

impl LibcPackage {
    /// Program and arguments that list the package's files.
    pub fn query(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Dpkg => ("dpkg-query", &["-L", "libc6"]),
            Self::Rpm => ("rpm", &["-q", "-l", "glibc"]),
            Self::Apk => ("apk", &["info", "--contents", "musl"]),
        }
    }

    pub(crate) fn query_args(self) -> Vec<String> {
        self.query().1.iter().map(ToString::to_string).collect()
    }

    /// Absolute shared-object paths from the package listing.
    ///
    /// `apk` prints a `<pkg> contains:` header followed by root-relative
    /// paths; the other tools print absolute paths, including directories.
    pub fn parse_contents(self, output: &str) -> Vec<PathBuf> {
        let lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
        let paths: Vec<PathBuf> = match self {
            Self::Apk => lines
                .skip(1)
                .map(|l| Path::new("/").join(l.trim_start_matches('/')))
                .collect(),
            Self::Dpkg | Self::Rpm => lines
                .filter(|l| l.starts_with('/'))
                .map(PathBuf::from)
                .collect(),
        };

        paths
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(is_shared_object)
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Canned [`CommandRunner`] keyed by command-line prefix.
    #[derive(Debug, Default)]
    pub(crate) struct FakeRunner {
        responses: Vec<(String, Result<String, String>)>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        pub(crate) fn respond(mut self, prefix: &str, stdout: &str) -> Self {
            self.responses
                .push((prefix.to_string(), Ok(stdout.to_string())));
            self
        }

        pub(crate) fn fail(mut self, prefix: &str, message: &str) -> Self {
            self.responses
                .push((prefix.to_string(), Err(message.to_string())));
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<String, PackError> {
            let line = std::iter::once(program.to_string())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(line.clone());

            match self.responses.iter().find(|(p, _)| line.starts_with(p)) {
                Some((_, Ok(out))) => Ok(out.clone()),
                Some((_, Err(msg))) => Err(PackError::command(program, msg)),
                None => Err(PackError::command(program, format!("unexpected: {line}"))),
            }
        }
    }
}
