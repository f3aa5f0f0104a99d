//! `fnpack` - package native entry points into function archives.
//!
//! Reads the build manifest beside a compiled program, bundles every entry
//! point with its shared-library closure and a bootstrap shim, and optionally
//! reconciles the resulting archives with deployed functions.

mod ui;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fnpack_core::env::{CommandRunner, SystemRunner, select_environment};
use fnpack_core::{Orchestrator, Outcome, Overrides, Reporter, RunReport, Settings, deploy, paths};
use fnpack_schema::{Arch, BuildManifest};
use tracing_subscriber::EnvFilter;

use crate::ui::ConsoleReporter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Package native entry points into function archives", long_about = None)]
struct Args {
    /// Compiled program; its manifest is the same path with a `.json` extension
    input: PathBuf,

    /// Local copy of the build image or target root filesystem
    #[arg(long)]
    sysroot: Option<PathBuf>,

    /// Project directory mounted into the build container (defaults to the input's directory)
    #[arg(long)]
    project: Option<PathBuf>,

    /// Build image to resolve dependencies in
    #[arg(long)]
    image: Option<String>,

    /// Cross `ldd` helper (defaults to `<triple>-ldd`)
    #[arg(long)]
    cross_ldd: Option<String>,

    /// Rely on the runtime's C library instead of bundling one
    #[arg(long, default_value_t = false)]
    no_libc: bool,

    /// Target architecture (`x86_64` or arm64); defaults to the host
    #[arg(long)]
    arch: Option<Arch>,

    /// Strip symbols from entry-point binaries before packaging
    #[arg(long, default_value_t = false)]
    strip: bool,

    /// Reconcile archives with deployed functions
    #[arg(long, default_value_t = false)]
    deploy: bool,

    /// Log the deployment plan without applying it
    #[arg(long, default_value_t = false, requires = "deploy")]
    dry_run: bool,

    /// Execution role ARN for created functions
    #[arg(long)]
    role: Option<String>,

    /// Bucket for archives too large to upload inline
    #[arg(long)]
    bucket: Option<String>,

    #[arg(long)]
    region: Option<String>,

    /// S3-compatible endpoint override
    #[arg(long)]
    endpoint_url: Option<String>,

    /// Profile in ~/.fnpack/config.toml
    #[arg(long)]
    profile: Option<String>,

    /// Function name prefix (defaults to the input's file stem)
    #[arg(long)]
    name: Option<String>,

    /// Runtime for created functions
    #[arg(long)]
    runtime: Option<String>,

    /// Seconds to wait for a function to finish updating
    #[arg(long)]
    max_wait: Option<u64>,

    /// Maximum concurrent platform API calls
    #[arg(long)]
    max_inflight: Option<usize>,

    /// Debug logging (overridden by `RUST_LOG`)
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn into_overrides(self) -> Overrides {
        Overrides {
            binary: self.input,
            sysroot: self.sysroot,
            project_dir: self.project,
            image: self.image,
            cross_helper: self.cross_ldd,
            no_libc: self.no_libc,
            arch: self.arch,
            strip: self.strip,
            deploy: self.deploy,
            dry_run: self.dry_run,
            role_arn: self.role,
            bucket: self.bucket,
            region: self.region,
            endpoint_url: self.endpoint_url,
            profile: self.profile,
            name: self.name,
            runtime: self.runtime,
            max_wait: self.max_wait.map(Duration::from_secs),
            max_inflight: self.max_inflight,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let profile_path = paths::profile_config_path();
    let settings = Settings::resolve(
        args.into_overrides(),
        |key| std::env::var(key).ok(),
        profile_path.as_deref(),
    )
    .context("Invalid configuration")?;
    let settings = Arc::new(settings);

    let manifest = BuildManifest::from_file(&settings.manifest_path).with_context(|| {
        format!(
            "Failed to load manifest {}",
            settings.manifest_path.display()
        )
    })?;
    tracing::info!(
        manifest = %settings.manifest_path.display(),
        entries = manifest.entry_points.len(),
        "loaded build manifest"
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let env = select_environment(&settings, runner)
        .context("Failed to connect to the container engine")?;

    let reconciler = match &settings.deploy {
        Some(deploy_settings) => Some(Arc::new(
            deploy::connect(deploy_settings, settings.target_arch).await,
        )),
        None => None,
    };

    let reporter = Arc::new(ConsoleReporter);
    reporter.info(&format!(
        "{} entry points, {} environment, {}",
        manifest.entry_points.len(),
        env.kind(),
        settings.target_arch
    ));

    let orchestrator = Orchestrator::new(settings.clone(), env, reconciler, reporter.clone());
    let report = orchestrator
        .run(manifest.entry_points)
        .await
        .context("Build environment failed to start")?;

    print_summary(&report, reporter.as_ref());

    if report.has_failures() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_summary(report: &RunReport, reporter: &dyn Reporter) {
    let mut packaged = 0;
    let mut deployed = 0;
    let mut deploy_failed = 0;
    let mut failed = 0;

    println!();
    println!("  summary");
    for result in &report.results {
        let secs = result.duration.as_secs_f64();
        match &result.outcome {
            Outcome::Packaged { .. } => {
                packaged += 1;
                println!("    packaged {} ({secs:.1}s)", result.entry);
            }
            Outcome::Deployed { function, actions } => {
                deployed += 1;
                println!(
                    "    deployed {} as {function} ({} actions, {secs:.1}s)",
                    result.entry,
                    actions.len()
                );
            }
            Outcome::DeployFailed { function, error } => {
                deploy_failed += 1;
                println!("    deploy failed {} as {function}: {error}", result.entry);
            }
            Outcome::Failed { error } => {
                failed += 1;
                println!("    failed {}: {error:#}", result.entry);
            }
        }
    }

    reporter.summary(
        report.results.len(),
        &format!(
            "entry points ({packaged} packaged, {deployed} deployed, {deploy_failed} deploy failed, {failed} failed)"
        ),
        report.elapsed.as_secs_f64(),
    );
}
