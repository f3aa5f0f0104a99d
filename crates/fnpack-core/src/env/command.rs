//! External command execution.

use std::fmt;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::PackError;

/// Runs an external program and returns its standard output.
///
/// Implementations must be safe to call concurrently: every entry point task
/// issues its own dependency and strip commands against the shared build
/// environment without further locking.
#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Run `program` with `args`, returning stdout on a zero exit status.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Command`] if the program cannot be spawned or
    /// exits unsuccessfully.
    async fn run(&self, program: &str, args: &[String]) -> Result<String, PackError>;
}

/// [`CommandRunner`] backed by real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String, PackError> {
        tracing::debug!(program, ?args, "running command");

        let output = match Command::new(program).args(args).output().await {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PackError::command(program, "not found on PATH"));
            }
            Err(e) => return Err(PackError::command(program, e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(PackError::command(
                program,
                format!("exit status {code}: {}", stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
