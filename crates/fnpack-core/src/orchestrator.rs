//! Per-entry-point packaging and deployment.
//!
//! Every entry point in the manifest gets its own task; all tasks start
//! together and the run waits for every one of them. A failure is confined
//! to its entry point. The shared build environment is started once before
//! the fan-out and stopped once after the join, whatever the tasks did.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use fnpack_schema::EntryPoint;
use futures::future::join_all;

use crate::archive::{self, Archive};
use crate::config::Settings;
use crate::deploy::{DeployAction, Reconciler};
use crate::env::BuildEnvironment;
use crate::error::{DeployError, PackError};
use crate::reporter::Reporter;
use crate::resolver;

/// How one entry point ended.
#[derive(Debug)]
pub enum Outcome {
    /// Archive written; no deployment requested.
    Packaged { archive: PathBuf, size: u64 },
    /// Archive written and the function reconciled.
    Deployed {
        function: String,
        actions: Vec<DeployAction>,
    },
    /// Archive written but reconciliation failed.
    DeployFailed { function: String, error: DeployError },
    /// Packaging failed; nothing was deployed.
    Failed { error: anyhow::Error },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug)]
pub struct EntryResult {
    pub entry: String,
    pub outcome: Outcome,
    pub duration: Duration,
}

#[derive(Debug)]
pub struct RunReport {
    pub results: Vec<EntryResult>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Whether any entry point failed to package. Deployment failures do not
    /// count.
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_failure())
    }
}

/// Drives the packaging pipeline over a manifest's entry points.
#[derive(Clone)]
pub struct Orchestrator {
    settings: Arc<Settings>,
    env: Arc<dyn BuildEnvironment>,
    reconciler: Option<Arc<Reconciler>>,
    reporter: Arc<dyn Reporter>,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<Settings>,
        env: Arc<dyn BuildEnvironment>,
        reconciler: Option<Arc<Reconciler>>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            settings,
            env,
            reconciler,
            reporter,
        }
    }

    /// Package (and optionally deploy) every entry point.
    ///
    /// # Errors
    ///
    /// Returns an error only if the build environment fails to start.
    /// Per-entry failures are reported in the [`RunReport`].
    pub async fn run(&self, entries: Vec<EntryPoint>) -> Result<RunReport, PackError> {
        let started = Instant::now();

        tracing::info!(environment = self.env.kind(), "starting build environment");
        if let Err(e) = self.env.start().await {
            self.stop_environment().await;
            return Err(e);
        }

        self.reporter.section("Packaging");
        let handles: Vec<_> = entries
            .into_iter()
            .map(|entry| {
                let this = self.clone();
                let name = entry.filename.clone();
                (name, tokio::spawn(async move { this.process(entry).await }))
            })
            .collect();

        let (names, tasks): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(tasks).await;

        let results = names
            .into_iter()
            .zip(joined)
            .map(|(entry, joined)| match joined {
                Ok(result) => result,
                Err(e) => {
                    let error = anyhow!("packaging task aborted: {e}");
                    self.reporter.failed(&entry, &error.to_string());
                    EntryResult {
                        entry,
                        outcome: Outcome::Failed { error },
                        duration: started.elapsed(),
                    }
                }
            })
            .collect();

        self.stop_environment().await;

        Ok(RunReport {
            results,
            elapsed: started.elapsed(),
        })
    }

    async fn stop_environment(&self) {
        if let Err(e) = self.env.stop().await {
            tracing::warn!(environment = self.env.kind(), error = %e, "failed to stop build environment");
            self.reporter
                .warning(&format!("failed to stop build environment: {e}"));
        }
    }

    async fn process(&self, entry: EntryPoint) -> EntryResult {
        let started = Instant::now();
        let name = entry.filename.clone();
        self.reporter.packaging(&name);

        let outcome = match self.package(&entry).await {
            Ok((exe, archive, meta)) => self.deploy(&name, &exe, &archive, &meta).await,
            Err(e) => {
                tracing::error!(entry = %name, error = %e, "packaging failed");
                self.reporter.failed(&name, &e.to_string());
                Outcome::Failed { error: e.into() }
            }
        };

        EntryResult {
            entry: name,
            outcome,
            duration: started.elapsed(),
        }
    }

    async fn package(
        &self,
        entry: &EntryPoint,
    ) -> Result<(PathBuf, Archive, fnpack_schema::DeploymentMetadata), PackError> {
        let meta = entry.metadata()?;
        let exe = self.settings.build_dir().join(&entry.filename);
        tracing::debug!(
            entry = %entry.filename,
            identifier = %meta.identifier,
            function = entry.original_function_name.as_deref().unwrap_or("-"),
            "decoded entry point metadata"
        );

        check_executable(&exe).await?;

        if self.settings.strip {
            self.env.strip(&exe).await?;
        }

        let resolved = resolver::resolve(self.env.as_ref(), &exe, self.settings.use_libc).await?;
        tracing::debug!(
            entry = %entry.filename,
            libraries = resolved.libraries.len(),
            loader = %resolved.loader,
            "resolved library closure"
        );

        let sysroot = self.env.library_root().map(Path::to_path_buf);
        let use_libc = self.settings.use_libc;
        let exe_path = exe.clone();
        let archive = tokio::task::spawn_blocking(move || {
            archive::build(&exe_path, &resolved.libraries, sysroot.as_deref(), use_libc)
        })
        .await
        .map_err(|e| PackError::Io(std::io::Error::other(e)))??;

        let archive_path = Archive::path_for(&exe);
        archive.write_to(&archive_path)?;
        tracing::info!(
            entry = %entry.filename,
            archive = %archive_path.display(),
            size = archive.len(),
            hash = %archive.hash,
            "wrote archive"
        );

        Ok((exe, archive, meta))
    }

    async fn deploy(
        &self,
        entry: &str,
        exe: &Path,
        archive: &Archive,
        meta: &fnpack_schema::DeploymentMetadata,
    ) -> Outcome {
        let archive_path = Archive::path_for(exe);
        let size = archive.len() as u64;

        let (Some(reconciler), Some(deploy)) = (&self.reconciler, &self.settings.deploy) else {
            self.reporter
                .packaged(entry, &archive_path.display().to_string(), size);
            return Outcome::Packaged {
                archive: archive_path,
                size,
            };
        };

        let function =
            fnpack_schema::FunctionIdentity::compute(&self.settings.target_name, meta).to_string();
        self.reporter.deploying(entry, &function);

        match reconciler
            .reconcile(&self.settings.target_name, archive, meta, &deploy.role_arn)
            .await
        {
            Ok(report) => {
                let detail = if report.actions.is_empty() {
                    "up to date".to_string()
                } else {
                    report
                        .actions
                        .iter()
                        .map(|a| a.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                self.reporter.deployed(entry, &function, &detail);
                Outcome::Deployed {
                    function,
                    actions: report.actions,
                }
            }
            Err(error) => {
                tracing::error!(entry, function = %function, error = %error, "deployment failed");
                self.reporter.failed(entry, &error.to_string());
                Outcome::DeployFailed { function, error }
            }
        }
    }
}

async fn check_executable(path: &Path) -> Result<(), PackError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| PackError::InvalidExecutable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if !metadata.is_file() || metadata.len() == 0 {
        return Err(PackError::InvalidExecutable {
            path: path.to_path_buf(),
            reason: "not a non-empty regular file".to_string(),
        });
    }
    Ok(())
}
