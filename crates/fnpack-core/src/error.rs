//! Domain-specific errors for packaging and deployment

use std::path::PathBuf;
use std::time::Duration;

use fnpack_schema::MetadataError;
use thiserror::Error;

/// Failures that abort packaging of a single entry point.
#[derive(Error, Debug)]
pub enum PackError {
    #[error("malformed metadata: {0}")]
    MalformedMetadata(#[from] MetadataError),

    /// Exactly one `ld-*` library must be in the closure so the bootstrap
    /// script can name the loader.
    #[error("expected exactly one ld-* loader in dependency closure, found {}: [{}]", .candidates.len(), display_paths(.candidates))]
    AmbiguousLoader { candidates: Vec<PathBuf> },

    #[error("library {library} not found at {source_path}")]
    MissingLibrary {
        library: PathBuf,
        source_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid executable {path}: {reason}")]
    InvalidExecutable { path: PathBuf, reason: String },

    #[error("{program} failed: {message}")]
    Command { program: String, message: String },

    #[error("{path} is outside the project directory {project}")]
    OutsideProject { path: PathBuf, project: PathBuf },

    #[error("build environment has not been started")]
    EnvironmentNotStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl PackError {
    /// Create a command failure with the program name for context.
    pub fn command(program: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Command {
            program: program.into(),
            message: message.to_string(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures while bringing a deployed function up to date.
#[derive(Error, Debug)]
pub enum DeployError {
    /// The function never left its transitional state. The remote side may be
    /// left mid-update.
    #[error("{function} did not stabilize within {}s", .waited.as_secs())]
    DeploymentTimedOut { function: String, waited: Duration },

    #[error("{operation} failed for {function}: {message}")]
    RemoteApi {
        operation: &'static str,
        function: String,
        message: String,
    },

    #[error("archive for {function} is {size} bytes and must be offloaded, but no bucket is configured")]
    MissingBucket { function: String, size: usize },
}

impl DeployError {
    pub fn remote(
        operation: &'static str,
        function: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::RemoteApi {
            operation,
            function: function.into(),
            message: err.to_string(),
        }
    }
}
