//! Integration tests for the fnpack-core orchestrator.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use fnpack_core::deploy::{
    CodePayload, ConfigUpdate, CreateFunction, DeployAction, FunctionPlatform, ObjectStore,
    ReconcileOptions, Reconciler, RemoteFunction,
};
use fnpack_core::env::BuildEnvironment;
use fnpack_core::{
    DeployError, LibraryPath, NullReporter, Orchestrator, Outcome, Overrides, PackError, RunReport,
    Settings,
};
use fnpack_schema::{Arch, BuildManifest, EntryPoint, Value, encode};
use tempfile::TempDir;

/// Environment whose dependency closure is a fixed set of files on disk.
#[derive(Debug)]
struct DiskEnv {
    libraries: BTreeSet<LibraryPath>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_start: bool,
    /// File name whose dependency listing fails.
    fail_deps_for: Option<&'static str>,
}

impl DiskEnv {
    fn new(libraries: BTreeSet<LibraryPath>) -> Self {
        Self {
            libraries,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            fail_start: false,
            fail_deps_for: None,
        }
    }
}

#[async_trait]
impl BuildEnvironment for DiskEnv {
    fn kind(&self) -> &'static str {
        "disk"
    }

    async fn start(&self) -> Result<(), PackError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(PackError::command("docker", "daemon not running"));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), PackError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn strip(&self, _path: &Path) -> Result<(), PackError> {
        Ok(())
    }

    async fn resolve_dynamic_deps(&self, path: &Path) -> Result<BTreeSet<LibraryPath>, PackError> {
        if self
            .fail_deps_for
            .is_some_and(|name| path.file_name().is_some_and(|f| f == name))
        {
            return Err(PackError::command("ldd", "not a dynamic executable"));
        }
        Ok(self.libraries.clone())
    }

    async fn base_library_set(&self) -> Result<BTreeSet<LibraryPath>, PackError> {
        Ok(BTreeSet::new())
    }

    fn library_root(&self) -> Option<&Path> {
        None
    }
}

#[derive(Debug, Default)]
struct RecordingPlatform {
    created: Mutex<Vec<String>>,
}

#[async_trait]
impl FunctionPlatform for RecordingPlatform {
    async fn get_function(&self, _name: &str) -> Result<Option<RemoteFunction>, DeployError> {
        Ok(None)
    }

    async fn create_function(&self, request: &CreateFunction) -> Result<(), DeployError> {
        if request.memory > 1024 {
            return Err(DeployError::remote("CreateFunction", &request.name, "memory quota"));
        }
        self.created.lock().unwrap().push(request.name.clone());
        Ok(())
    }

    async fn update_function_code(&self, _: &str, _: &CodePayload) -> Result<(), DeployError> {
        Ok(())
    }

    async fn update_function_configuration(&self, _: &str, _: &ConfigUpdate) -> Result<(), DeployError> {
        Ok(())
    }

    async fn is_stable(&self, _: &str) -> Result<bool, DeployError> {
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct NoStore;

#[async_trait]
impl ObjectStore for NoStore {
    async fn put_object(&self, _: &str, _: &str, _: Vec<u8>) -> Result<(), DeployError> {
        Ok(())
    }
}

struct Project {
    dir: TempDir,
    libraries: BTreeSet<LibraryPath>,
}

impl Project {
    /// A build directory with a libc, a loader, and entry binaries `app-1`..`app-3`.
    fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let libs = dir.path().join("libs");
        std::fs::create_dir_all(&libs).unwrap();
        std::fs::write(libs.join("libc.so.6"), b"libc").unwrap();
        std::fs::write(libs.join("ld-linux-x86-64.so.2"), b"loader").unwrap();

        let build = dir.path().join("build");
        std::fs::create_dir_all(&build).unwrap();
        std::fs::write(build.join("app"), b"\x7fELF main").unwrap();
        for i in 1..=3 {
            std::fs::write(build.join(format!("app-{i}")), format!("\x7fELF entry {i}")).unwrap();
        }

        let libraries = BTreeSet::from([
            LibraryPath::new(libs.join("libc.so.6")),
            LibraryPath::new(libs.join("ld-linux-x86-64.so.2")),
        ]);
        Self { dir, libraries }
    }

    fn binary(&self) -> PathBuf {
        self.dir.path().join("build/app")
    }

    fn settings(&self, deploy: bool) -> Arc<Settings> {
        let overrides = Overrides {
            binary: self.binary(),
            arch: Some(Arch::current()),
            deploy,
            role_arn: deploy.then(|| "arn:aws:iam::123456789012:role/fn".to_string()),
            region: deploy.then(|| "us-east-1".to_string()),
            ..Overrides::default()
        };
        Arc::new(Settings::resolve(overrides, |_| None, None).unwrap())
    }
}

fn user_meta(identifier: &str, memory: u32) -> String {
    let value = Value::Map(vec![
        (Value::Str("identifier".into()), Value::Str(identifier.into())),
        (Value::Str("memory".into()), Value::U32(memory)),
        (Value::Str("timeout".into()), Value::U32(30)),
        (Value::Str("ephemeral_storage".into()), Value::U32(512)),
    ]);
    STANDARD.encode(encode(&value))
}

fn entries() -> Vec<EntryPoint> {
    vec![
        EntryPoint {
            filename: "app-1".into(),
            user_meta: user_meta("first", 256),
            original_function_name: Some("main::first".into()),
        },
        EntryPoint {
            filename: "app-2".into(),
            // Tag 9 is not a valid value tag.
            user_meta: STANDARD.encode([9u8, 0, 0]),
            original_function_name: None,
        },
        EntryPoint {
            filename: "app-3".into(),
            user_meta: user_meta("third", 2048),
            original_function_name: None,
        },
    ]
}

fn outcome<'a>(report: &'a RunReport, entry: &str) -> &'a Outcome {
    report
        .results
        .iter()
        .find(|r| r.entry == entry)
        .map(|r| &r.outcome)
        .unwrap()
}

#[tokio::test]
async fn malformed_entry_does_not_block_others() {
    let project = Project::new();
    let env = Arc::new(DiskEnv::new(project.libraries.clone()));
    let orchestrator = Orchestrator::new(project.settings(false), env.clone(), None, Arc::new(NullReporter));

    let report = orchestrator.run(entries()).await.unwrap();

    assert_eq!(report.results.len(), 3);
    assert!(report.has_failures());
    assert_eq!(env.starts.load(Ordering::SeqCst), 1);
    assert_eq!(env.stops.load(Ordering::SeqCst), 1);

    for ok in ["app-1", "app-3"] {
        match outcome(&report, ok) {
            Outcome::Packaged { archive, size } => {
                assert!(archive.exists(), "{ok}: archive missing");
                assert_eq!(std::fs::metadata(archive).unwrap().len(), *size);
            }
            other => panic!("{ok}: unexpected outcome {other:?}"),
        }
    }

    match outcome(&report, "app-2") {
        Outcome::Failed { error } => assert!(matches!(
            error.downcast_ref::<PackError>(),
            Some(PackError::MalformedMetadata(_))
        )),
        other => panic!("app-2: unexpected outcome {other:?}"),
    }
    assert!(!project.dir.path().join("build/app-2.zip").exists());
}

#[tokio::test]
async fn archives_are_reproducible_across_runs() {
    let project = Project::new();
    let env = Arc::new(DiskEnv::new(project.libraries.clone()));
    let orchestrator = Orchestrator::new(project.settings(false), env, None, Arc::new(NullReporter));
    let archive = project.dir.path().join("build/app-1.zip");

    orchestrator.run(entries()).await.unwrap();
    let first = std::fs::read(&archive).unwrap();
    orchestrator.run(entries()).await.unwrap();
    let second = std::fs::read(&archive).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn deploy_failure_does_not_fail_the_run() {
    let project = Project::new();
    let env = Arc::new(DiskEnv::new(project.libraries.clone()));
    let platform = Arc::new(RecordingPlatform::default());
    let reconciler = Reconciler::new(
        platform.clone(),
        Arc::new(NoStore),
        4,
        ReconcileOptions {
            poll_interval: Duration::from_millis(1),
            ..ReconcileOptions::default()
        },
    );
    let orchestrator = Orchestrator::new(
        project.settings(true),
        env,
        Some(Arc::new(reconciler)),
        Arc::new(NullReporter),
    );

    let entries: Vec<EntryPoint> = entries().into_iter().filter(|e| e.filename != "app-2").collect();
    let report = orchestrator.run(entries).await.unwrap();

    assert!(!report.has_failures());
    match &report.results[0].outcome {
        Outcome::Deployed { function, actions } => {
            assert!(function.starts_with("app-"));
            assert_eq!(actions, &vec![DeployAction::Create]);
            assert_eq!(*platform.created.lock().unwrap(), vec![function.clone()]);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(
        &report.results[1].outcome,
        Outcome::DeployFailed { error: DeployError::RemoteApi { .. }, .. }
    ));
}

#[tokio::test]
async fn missing_executable_is_invalid() {
    let project = Project::new();
    std::fs::remove_file(project.dir.path().join("build/app-1")).unwrap();
    let env = Arc::new(DiskEnv::new(project.libraries.clone()));
    let orchestrator = Orchestrator::new(project.settings(false), env, None, Arc::new(NullReporter));

    let report = orchestrator.run(entries()).await.unwrap();
    match &report.results[0].outcome {
        Outcome::Failed { error } => assert!(matches!(
            error.downcast_ref::<PackError>(),
            Some(PackError::InvalidExecutable { .. })
        )),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn dependency_failure_is_isolated_to_its_entry() {
    let project = Project::new();
    let env = Arc::new(DiskEnv {
        fail_deps_for: Some("app-3"),
        ..DiskEnv::new(project.libraries.clone())
    });
    let orchestrator = Orchestrator::new(project.settings(false), env.clone(), None, Arc::new(NullReporter));

    let entries: Vec<EntryPoint> = entries().into_iter().filter(|e| e.filename != "app-2").collect();
    let report = orchestrator.run(entries).await.unwrap();

    assert!(report.has_failures());
    assert!(matches!(outcome(&report, "app-1"), Outcome::Packaged { .. }));
    match outcome(&report, "app-3") {
        Outcome::Failed { error } => assert!(matches!(
            error.downcast_ref::<PackError>(),
            Some(PackError::Command { .. })
        )),
        other => panic!("app-3: unexpected outcome {other:?}"),
    }
    assert!(!project.dir.path().join("build/app-3.zip").exists());
    assert_eq!(env.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn start_failure_still_stops_environment() {
    let project = Project::new();
    let env = Arc::new(DiskEnv {
        fail_start: true,
        ..DiskEnv::new(project.libraries.clone())
    });
    let orchestrator = Orchestrator::new(project.settings(false), env.clone(), None, Arc::new(NullReporter));

    assert!(orchestrator.run(entries()).await.is_err());
    assert_eq!(env.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn manifest_sits_beside_binary() {
    let project = Project::new();
    let settings = project.settings(false);
    assert_eq!(settings.manifest_path, BuildManifest::path_for(&project.binary()));
    assert_eq!(settings.target_name, "app");
}
