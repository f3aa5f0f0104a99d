//! Containerized build environment.
//!
//! A long-running container is started from the build image with the project
//! directory bind-mounted at [`CONTAINER_MOUNT`]. Every operation is proxied
//! through an exec in that container, with local paths translated to their
//! location under the mount. Libraries are later read from the local sysroot
//! copy of the image, not from the container.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::Mutex;

use super::{BuildEnvironment, LibcPackage, parse_dependency_listing};
use crate::error::PackError;
use crate::library::LibraryPath;

/// Mount point of the project directory inside the container.
pub const CONTAINER_MOUNT: &str = "/usr/src/project";

/// C library package queried inside the build image.
const IMAGE_LIBC: LibcPackage = LibcPackage::Apk;

/// Keeps the container alive between execs.
const IDLE_COMMAND: [&str; 3] = ["tail", "-f", "/dev/null"];

/// Container operations the environment needs from the engine.
///
/// Implementations must allow concurrent `exec` calls against one container.
#[async_trait]
pub trait ContainerEngine: Send + Sync + fmt::Debug {
    /// Create and start a container from `image` with one bind mount
    /// (`<host>:<container>:rw`), returning its id.
    async fn launch(&self, image: &str, bind: &str) -> Result<String, PackError>;

    /// Run `cmd` in the container and return its stdout.
    async fn exec(&self, container: &str, cmd: &[String]) -> Result<String, PackError>;

    /// Force-remove the container.
    async fn remove(&self, container: &str) -> Result<(), PackError>;
}

/// [`ContainerEngine`] talking to the Docker API (or a compatible socket,
/// selected with `DOCKER_HOST`).
#[derive(Debug, Clone)]
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    /// Connect using the local defaults (`DOCKER_HOST` or the default socket).
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Command`] if the connection settings are invalid.
    pub fn connect() -> Result<Self, PackError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| PackError::command("docker connect", e))?;
        Ok(Self { docker })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), PackError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        tracing::info!(image, "pulling build image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            tag: pull_tag(image).unwrap_or_default().to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| PackError::command("docker pull", e))?;
        Ok(())
    }
}

/// Tag to pull when `image` names none, so the API does not fetch every tag.
fn pull_tag(image: &str) -> Option<&'static str> {
    let last = image.rsplit('/').next().unwrap_or(image);
    if image.contains('@') || last.contains(':') {
        None
    } else {
        Some("latest")
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn launch(&self, image: &str, bind: &str) -> Result<String, PackError> {
        self.ensure_image(image).await?;

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(IDLE_COMMAND.iter().map(ToString::to_string).collect()),
            host_config: Some(HostConfig {
                binds: Some(vec![bind.to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| PackError::command("docker create", e))?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(cleanup) = self.remove(&created.id).await {
                tracing::warn!(container = %created.id, error = %cleanup, "failed to remove unstarted container");
            }
            return Err(PackError::command("docker start", e));
        }

        Ok(created.id)
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> Result<String, PackError> {
        let program = cmd.first().map_or("exec", String::as_str);
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| PackError::command(program, e))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| PackError::command(program, e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(msg) = output.next().await {
                match msg.map_err(|e| PackError::command(program, e))? {
                    LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| PackError::command(program, e))?;
        match inspect.exit_code {
            Some(0) | None => Ok(stdout),
            Some(code) => Err(PackError::command(
                program,
                format!("exit status {code}: {}", stderr.trim()),
            )),
        }
    }

    async fn remove(&self, container: &str) -> Result<(), PackError> {
        self.docker
            .remove_container(
                container,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| PackError::command("docker rm", e))
    }
}

/// Runs dependency listing and stripping inside a build-image container.
#[derive(Debug)]
pub struct ContainerEnvironment {
    image: String,
    project_dir: PathBuf,
    sysroot: PathBuf,
    engine: Arc<dyn ContainerEngine>,
    container: Mutex<Option<String>>,
}

impl ContainerEnvironment {
    pub fn new(
        image: String,
        project_dir: PathBuf,
        sysroot: PathBuf,
        engine: Arc<dyn ContainerEngine>,
    ) -> Self {
        Self {
            image,
            project_dir,
            sysroot,
            engine,
            container: Mutex::new(None),
        }
    }

    /// Translate a local path inside the project to its container path.
    pub fn container_path(&self, local: &Path) -> Result<PathBuf, PackError> {
        let relative = local
            .strip_prefix(&self.project_dir)
            .map_err(|_| PackError::OutsideProject {
                path: local.to_path_buf(),
                project: self.project_dir.clone(),
            })?;
        Ok(Path::new(CONTAINER_MOUNT).join(relative))
    }

    /// `<project>:<mount>:rw`. A relative host side would name a volume.
    fn bind_mount(&self) -> Result<String, PackError> {
        if !self.project_dir.is_absolute() {
            return Err(PackError::command(
                "bind mount",
                format!(
                    "project directory {} is not absolute",
                    self.project_dir.display()
                ),
            ));
        }
        Ok(format!(
            "{}:{CONTAINER_MOUNT}:rw",
            self.project_dir.display()
        ))
    }

    async fn exec(&self, program: &str, args: &[String]) -> Result<String, PackError> {
        let id = self
            .container
            .lock()
            .await
            .clone()
            .ok_or(PackError::EnvironmentNotStarted)?;

        let mut cmd = Vec::with_capacity(args.len() + 1);
        cmd.push(program.to_string());
        cmd.extend_from_slice(args);
        self.engine.exec(&id, &cmd).await
    }
}

#[async_trait]
impl BuildEnvironment for ContainerEnvironment {
    fn kind(&self) -> &'static str {
        "container"
    }

    async fn start(&self) -> Result<(), PackError> {
        let mut container = self.container.lock().await;
        if container.is_some() {
            return Ok(());
        }

        let bind = self.bind_mount()?;
        let id = self.engine.launch(&self.image, &bind).await?;
        tracing::info!(image = %self.image, container = %id, "started build container");
        *container = Some(id);
        Ok(())
    }

    async fn stop(&self) -> Result<(), PackError> {
        let Some(id) = self.container.lock().await.take() else {
            return Ok(());
        };

        tracing::debug!(container = %id, "removing build container");
        self.engine.remove(&id).await
    }

    async fn strip(&self, path: &Path) -> Result<(), PackError> {
        let target = self.container_path(path)?;
        self.exec("strip", &[target.display().to_string()])
            .await
            .map(|_| ())
    }

    async fn resolve_dynamic_deps(&self, path: &Path) -> Result<BTreeSet<LibraryPath>, PackError> {
        let target = self.container_path(path)?;
        let output = self.exec("ldd", &[target.display().to_string()]).await?;
        Ok(parse_dependency_listing(&output))
    }

    async fn base_library_set(&self) -> Result<BTreeSet<LibraryPath>, PackError> {
        let (program, _) = IMAGE_LIBC.query();
        let output = self.exec(program, &IMAGE_LIBC.query_args()).await?;
        Ok(IMAGE_LIBC
            .parse_contents(&output)
            .into_iter()
            .map(LibraryPath::new)
            .collect())
    }

    fn library_root(&self) -> Option<&Path> {
        Some(&self.sysroot)
    }
}

impl Drop for ContainerEnvironment {
    fn drop(&mut self) {
        let Some(id) = self.container.get_mut().take() else {
            return;
        };

        tracing::warn!(container = %id, "build container was not stopped, removing");
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(container = %id, "no runtime to remove build container; remove it manually");
            return;
        };
        let engine = Arc::clone(&self.engine);
        handle.spawn(async move {
            if let Err(e) = engine.remove(&id).await {
                tracing::error!(container = %id, error = %e, "failed to remove build container");
            }
        });
    }
}
