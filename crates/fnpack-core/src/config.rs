//! Run settings.
//!
//! Everything a run needs is resolved once into an immutable [`Settings`].
//! Each field is taken from the first source that provides it:
//!
//! 1. command-line flag ([`Overrides`])
//! 2. environment variable
//! 3. the selected profile in `~/.fnpack/config.toml`
//! 4. built-in default
//!
//! ```toml
//! [profiles.default]
//! region = "eu-west-1"
//! role_arn = "arn:aws:iam::123456789012:role/fn-exec"
//! bucket = "fn-artifacts"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use fnpack_schema::{Arch, BuildManifest};
use serde::Deserialize;

use crate::deploy::{INLINE_PAYLOAD_LIMIT, ReconcileOptions};

pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_RUNTIME: &str = "provided.al2";
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_INFLIGHT: usize = 8;

/// Values supplied on the command line. `None` defers to later sources.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub binary: PathBuf,
    pub sysroot: Option<PathBuf>,
    pub project_dir: Option<PathBuf>,
    pub image: Option<String>,
    pub cross_helper: Option<String>,
    pub no_libc: bool,
    pub arch: Option<Arch>,
    pub strip: bool,
    pub deploy: bool,
    pub dry_run: bool,
    pub role_arn: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub profile: Option<String>,
    pub name: Option<String>,
    pub runtime: Option<String>,
    pub max_wait: Option<Duration>,
    pub max_inflight: Option<usize>,
}

/// One `[profiles.<name>]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub role_arn: Option<String>,
    pub bucket: Option<String>,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileFile {
    profiles: BTreeMap<String, Profile>,
}

/// Static credentials; when absent the SDK default chain is used.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Remote deployment settings, present only when deploying.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub region: String,
    pub role_arn: String,
    pub bucket: Option<String>,
    pub endpoint_url: Option<String>,
    pub credentials: Option<StaticCredentials>,
    pub runtime: String,
    pub max_wait: Duration,
    pub max_inflight: usize,
    pub dry_run: bool,
}

impl DeploySettings {
    /// Shared AWS configuration for the Lambda and S3 clients.
    pub async fn sdk_config(&self) -> aws_config::SdkConfig {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region.clone()));

        if let Some(creds) = &self.credentials {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                creds.session_token.clone(),
                None,
                "fnpack",
            ));
        }
        if let Some(url) = &self.endpoint_url {
            loader = loader.endpoint_url(url);
        }

        loader.load().await
    }

    pub fn reconcile_options(&self, arch: Arch) -> ReconcileOptions {
        ReconcileOptions {
            runtime: self.runtime.clone(),
            arch,
            bucket: self.bucket.clone(),
            inline_limit: INLINE_PAYLOAD_LIMIT,
            poll_interval: Duration::from_secs(1),
            max_wait: self.max_wait,
            dry_run: self.dry_run,
        }
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// The built program whose manifest lists the entry points.
    pub binary: PathBuf,
    pub manifest_path: PathBuf,
    /// Prefix of every function name.
    pub target_name: String,
    pub sysroot: Option<PathBuf>,
    pub project_dir: PathBuf,
    pub image: Option<String>,
    pub cross_helper: Option<String>,
    pub use_libc: bool,
    pub target_arch: Arch,
    pub strip: bool,
    pub deploy: Option<DeploySettings>,
}

impl Settings {
    /// Resolve settings from flags, an environment lookup, and a profile file.
    ///
    /// A missing profile file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile file is malformed, an explicitly named
    /// profile does not exist, or the combination of settings is invalid.
    pub fn resolve(
        overrides: Overrides,
        env: impl Fn(&str) -> Option<String>,
        profile_file: Option<&Path>,
    ) -> Result<Self> {
        let named_profile = overrides.profile.clone().or_else(|| env("FNPACK_PROFILE"));
        let profile_name = named_profile.as_deref().unwrap_or(DEFAULT_PROFILE);
        let profile = load_profile(profile_file, profile_name, named_profile.is_some())?;

        let binary = std::path::absolute(&overrides.binary)
            .with_context(|| format!("cannot resolve {}", overrides.binary.display()))?;
        let target_name = match overrides.name {
            Some(name) => name,
            None => binary
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .with_context(|| format!("cannot derive a function name from {}", binary.display()))?,
        };
        // Container bind mounts and path translation need absolute paths.
        let project_dir = match overrides.project_dir {
            Some(dir) => std::path::absolute(&dir)
                .with_context(|| format!("cannot resolve project directory {}", dir.display()))?,
            None => binary
                .parent()
                .map_or_else(|| PathBuf::from("/"), Path::to_path_buf),
        };
        let sysroot = overrides
            .sysroot
            .map(|dir| {
                std::path::absolute(&dir)
                    .with_context(|| format!("cannot resolve sysroot {}", dir.display()))
            })
            .transpose()?;
        let target_arch = overrides.arch.unwrap_or_else(Arch::current);

        if overrides.image.is_some() && sysroot.is_none() {
            bail!("--image requires --sysroot: libraries are read from a local copy of the image");
        }
        if overrides.image.is_none()
            && target_arch != Arch::current()
            && sysroot.is_none()
        {
            bail!(
                "building for {target_arch} on a {} host requires --sysroot",
                Arch::current()
            );
        }

        let deploy = if overrides.deploy {
            let region = overrides
                .region
                .or_else(|| env("AWS_REGION"))
                .or_else(|| env("AWS_DEFAULT_REGION"))
                .or(profile.region)
                .context("deploying requires a region (--region, AWS_REGION, or profile)")?;
            let role_arn = overrides
                .role_arn
                .or_else(|| env("FNPACK_ROLE_ARN"))
                .or(profile.role_arn)
                .context("deploying requires a role ARN (--role, FNPACK_ROLE_ARN, or profile)")?;

            let access_key_id = env("AWS_ACCESS_KEY_ID").or(profile.access_key_id);
            let secret_access_key = env("AWS_SECRET_ACCESS_KEY").or(profile.secret_access_key);
            let credentials = match (access_key_id, secret_access_key) {
                (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                    access_key_id,
                    secret_access_key,
                    session_token: env("AWS_SESSION_TOKEN").or(profile.session_token),
                }),
                _ => None,
            };

            Some(DeploySettings {
                region,
                role_arn,
                bucket: overrides
                    .bucket
                    .or_else(|| env("FNPACK_BUCKET"))
                    .or(profile.bucket),
                endpoint_url: overrides
                    .endpoint_url
                    .or_else(|| env("FNPACK_ENDPOINT_URL"))
                    .or(profile.endpoint_url),
                credentials,
                runtime: overrides
                    .runtime
                    .unwrap_or_else(|| DEFAULT_RUNTIME.to_string()),
                max_wait: overrides.max_wait.unwrap_or(DEFAULT_MAX_WAIT),
                max_inflight: overrides.max_inflight.unwrap_or(DEFAULT_MAX_INFLIGHT).max(1),
                dry_run: overrides.dry_run,
            })
        } else {
            None
        };

        Ok(Self {
            manifest_path: BuildManifest::path_for(&binary),
            binary,
            target_name,
            sysroot,
            project_dir,
            image: overrides.image,
            cross_helper: overrides.cross_helper,
            use_libc: !overrides.no_libc,
            target_arch,
            strip: overrides.strip,
            deploy,
        })
    }

    /// Directory holding the manifest and entry-point binaries.
    pub fn build_dir(&self) -> &Path {
        self.manifest_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

fn load_profile(path: Option<&Path>, name: &str, required: bool) -> Result<Profile> {
    let file = match path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<ProfileFile>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
        _ => ProfileFile::default(),
    };

    match file.profiles.get(name) {
        Some(profile) => Ok(profile.clone()),
        None if required => bail!("profile '{name}' not found"),
        None => Ok(Profile::default()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn overrides() -> Overrides {
        Overrides {
            binary: PathBuf::from("/work/build/app"),
            arch: Some(Arch::current()),
            ..Overrides::default()
        }
    }

    fn deploy_overrides() -> Overrides {
        Overrides {
            deploy: true,
            ..overrides()
        }
    }

    const PROFILES: &str = r#"
[profiles.default]
region = "eu-west-1"
role_arn = "arn:aws:iam::1:role/profile"
bucket = "profile-bucket"

[profiles.staging]
region = "us-west-2"
role_arn = "arn:aws:iam::1:role/staging"
access_key_id = "AKIASTAGING"
secret_access_key = "staging-secret"
"#;

    fn profile_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, PROFILES).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_for_local_packaging() {
        let settings = Settings::resolve(overrides(), env(&[]), None).unwrap();
        assert_eq!(settings.target_name, "app");
        assert_eq!(settings.manifest_path, PathBuf::from("/work/build/app.json"));
        assert_eq!(settings.project_dir, PathBuf::from("/work/build"));
        assert_eq!(settings.build_dir(), Path::new("/work/build"));
        assert!(settings.use_libc);
        assert!(settings.deploy.is_none());
    }

    #[test]
    fn name_flag_overrides_stem() {
        let settings = Settings::resolve(
            Overrides {
                name: Some("orders".into()),
                ..overrides()
            },
            env(&[]),
            None,
        )
        .unwrap();
        assert_eq!(settings.target_name, "orders");
    }

    #[test]
    fn flag_beats_env_beats_profile() {
        let (_dir, path) = profile_file();

        let from_profile =
            Settings::resolve(deploy_overrides(), env(&[]), Some(path.as_path())).unwrap();
        let deploy = from_profile.deploy.unwrap();
        assert_eq!(deploy.region, "eu-west-1");
        assert_eq!(deploy.role_arn, "arn:aws:iam::1:role/profile");
        assert_eq!(deploy.bucket.as_deref(), Some("profile-bucket"));
        assert!(deploy.credentials.is_none());

        let from_env = Settings::resolve(
            deploy_overrides(),
            env(&[("AWS_REGION", "ap-south-1"), ("FNPACK_ROLE_ARN", "arn:env")]),
            Some(path.as_path()),
        )
        .unwrap();
        let deploy = from_env.deploy.unwrap();
        assert_eq!(deploy.region, "ap-south-1");
        assert_eq!(deploy.role_arn, "arn:env");

        let from_flag = Settings::resolve(
            Overrides {
                region: Some("sa-east-1".into()),
                role_arn: Some("arn:flag".into()),
                ..deploy_overrides()
            },
            env(&[("AWS_REGION", "ap-south-1"), ("FNPACK_ROLE_ARN", "arn:env")]),
            Some(path.as_path()),
        )
        .unwrap();
        let deploy = from_flag.deploy.unwrap();
        assert_eq!(deploy.region, "sa-east-1");
        assert_eq!(deploy.role_arn, "arn:flag");
    }

    #[test]
    fn default_region_env_is_fallback() {
        let settings = Settings::resolve(
            deploy_overrides(),
            env(&[("AWS_DEFAULT_REGION", "eu-central-1"), ("FNPACK_ROLE_ARN", "arn:r")]),
            None,
        )
        .unwrap();
        assert_eq!(settings.deploy.unwrap().region, "eu-central-1");
    }

    #[test]
    fn named_profile_supplies_credentials() {
        let (_dir, path) = profile_file();
        let settings = Settings::resolve(
            deploy_overrides(),
            env(&[("FNPACK_PROFILE", "staging")]),
            Some(path.as_path()),
        )
        .unwrap();
        let deploy = settings.deploy.unwrap();
        assert_eq!(deploy.region, "us-west-2");
        let creds = deploy.credentials.unwrap();
        assert_eq!(creds.access_key_id, "AKIASTAGING");
        assert!(!format!("{creds:?}").contains("staging-secret"));
    }

    #[test]
    fn unknown_named_profile_is_error() {
        let (_dir, path) = profile_file();
        let err = Settings::resolve(
            Overrides {
                profile: Some("prod".into()),
                ..overrides()
            },
            env(&[]),
            Some(path.as_path()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("profile 'prod' not found"));
    }

    #[test]
    fn missing_profile_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings =
            Settings::resolve(overrides(), env(&[]), Some(dir.path().join("none.toml").as_path()));
        assert!(settings.is_ok());
    }

    #[test]
    fn malformed_profile_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[profiles.default\nregion = ").unwrap();
        assert!(Settings::resolve(overrides(), env(&[]), Some(path.as_path())).is_err());
    }

    #[test]
    fn deploy_requires_role_and_region() {
        let err = Settings::resolve(deploy_overrides(), env(&[("FNPACK_ROLE_ARN", "arn:r")]), None)
            .unwrap_err();
        assert!(err.to_string().contains("region"));

        let err = Settings::resolve(deploy_overrides(), env(&[("AWS_REGION", "us-east-1")]), None)
            .unwrap_err();
        assert!(err.to_string().contains("role"));
    }

    #[test]
    fn image_requires_sysroot() {
        let err = Settings::resolve(
            Overrides {
                image: Some("builder".into()),
                ..overrides()
            },
            env(&[]),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--sysroot"));
    }

    #[test]
    fn cross_arch_requires_sysroot() {
        let other = match Arch::current() {
            Arch::X86_64 => Arch::Arm64,
            Arch::Arm64 => Arch::X86_64,
        };
        let result = Settings::resolve(
            Overrides {
                arch: Some(other),
                ..overrides()
            },
            env(&[]),
            None,
        );
        assert!(result.is_err());

        let settings = Settings::resolve(
            Overrides {
                arch: Some(other),
                sysroot: Some("/sysroot".into()),
                ..overrides()
            },
            env(&[]),
            None,
        )
        .unwrap();
        assert_eq!(settings.target_arch, other);
    }

    #[test]
    fn relative_paths_become_absolute() {
        let cwd = std::env::current_dir().unwrap();
        let settings = Settings::resolve(
            Overrides {
                binary: PathBuf::from("build/app"),
                image: Some("builder".into()),
                sysroot: Some("sysroot".into()),
                ..overrides()
            },
            env(&[]),
            None,
        )
        .unwrap();

        assert_eq!(settings.binary, cwd.join("build/app"));
        assert_eq!(settings.project_dir, cwd.join("build"));
        assert_eq!(settings.sysroot, Some(cwd.join("sysroot")));
        assert_eq!(settings.build_dir(), cwd.join("build"));
        assert!(settings.project_dir.is_absolute());
    }

    #[test]
    fn relative_binary_stays_inside_absolute_project() {
        let cwd = std::env::current_dir().unwrap();
        let settings = Settings::resolve(
            Overrides {
                binary: PathBuf::from("build/app"),
                project_dir: Some(cwd.clone()),
                ..overrides()
            },
            env(&[]),
            None,
        )
        .unwrap();

        assert!(settings.build_dir().starts_with(&settings.project_dir));
    }

    #[test]
    fn deploy_defaults() {
        let settings = Settings::resolve(
            deploy_overrides(),
            env(&[("AWS_REGION", "us-east-1"), ("FNPACK_ROLE_ARN", "arn:r")]),
            None,
        )
        .unwrap();
        let deploy = settings.deploy.unwrap();
        assert_eq!(deploy.runtime, "provided.al2");
        assert_eq!(deploy.max_wait, Duration::from_secs(300));
        assert_eq!(deploy.max_inflight, 8);
        let options = deploy.reconcile_options(Arch::Arm64);
        assert_eq!(options.inline_limit, 50 * 1024 * 1024);
        assert_eq!(options.arch, Arch::Arm64);
    }
}
