use std::sync::Arc;
use std::time::Duration;

use fnpack_schema::{Arch, DeploymentMetadata, FunctionIdentity};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;

use super::platform::{CodePayload, ConfigUpdate, CreateFunction, FunctionPlatform, ObjectStore};
use super::{DeployAction, INLINE_PAYLOAD_LIMIT, object_key, plan};
use crate::archive::Archive;
use crate::error::DeployError;

/// Tunables for one deployment run.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub runtime: String,
    pub arch: Arch,
    /// Bucket for archives above `inline_limit`.
    pub bucket: Option<String>,
    pub inline_limit: usize,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    /// Compute and log the plan without calling mutating APIs.
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            runtime: "provided.al2".to_string(),
            arch: Arch::default(),
            bucket: None,
            inline_limit: INLINE_PAYLOAD_LIMIT,
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(300),
            dry_run: false,
        }
    }
}

/// What a reconciliation did for one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub function: FunctionIdentity,
    pub actions: Vec<DeployAction>,
}

/// Applies deployment plans, shared by all entry-point tasks.
///
/// Platform calls across all tasks are bounded by one semaphore.
#[derive(Debug)]
pub struct Reconciler {
    platform: Arc<dyn FunctionPlatform>,
    store: Arc<dyn ObjectStore>,
    permits: Semaphore,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(
        platform: Arc<dyn FunctionPlatform>,
        store: Arc<dyn ObjectStore>,
        max_inflight: usize,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            platform,
            store,
            permits: Semaphore::new(max_inflight.max(1)),
            options,
        }
    }

    /// Bring the function for `meta` up to date with `archive`.
    ///
    /// The first failing action aborts the rest for this function, since the
    /// remote side may be left half-updated.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError`] from the lookup, the upload, any action, or the
    /// wait for the function to stabilize.
    pub async fn reconcile(
        &self,
        target_name: &str,
        archive: &Archive,
        meta: &DeploymentMetadata,
        role: &str,
    ) -> Result<DeployReport, DeployError> {
        let function = FunctionIdentity::compute(target_name, meta);
        let name = function.as_str();

        let remote = {
            let _permit = self.permit(name).await?;
            self.platform.get_function(name).await?
        };
        let actions = plan(remote.as_ref(), &archive.hash, role, meta);

        if actions.is_empty() {
            tracing::info!(function = name, "function is up to date");
            return Ok(DeployReport { function, actions });
        }

        let planned: Vec<&str> = actions.iter().map(|a| a.as_str()).collect();
        if self.options.dry_run {
            tracing::info!(function = name, actions = ?planned, "dry run, not applying");
            return Ok(DeployReport { function, actions });
        }
        tracing::info!(function = name, actions = ?planned, "applying deployment plan");

        let payload = if actions.iter().any(|a| a.needs_code()) {
            Some(self.payload(name, archive).await?)
        } else {
            None
        };

        for action in &actions {
            if let Err(e) = self
                .apply(*action, name, payload.as_ref(), meta, role)
                .await
            {
                tracing::error!(function = name, action = %action, error = %e, "deploy action failed");
                return Err(e);
            }
            self.wait_until_stable(name).await?;
        }

        Ok(DeployReport { function, actions })
    }

    async fn apply(
        &self,
        action: DeployAction,
        name: &str,
        payload: Option<&CodePayload>,
        meta: &DeploymentMetadata,
        role: &str,
    ) -> Result<(), DeployError> {
        let _permit = self.permit(name).await?;
        let code = || {
            payload
                .cloned()
                .ok_or_else(|| DeployError::remote(action.as_str(), name, "archive payload missing"))
        };

        match action {
            DeployAction::Create => {
                let request = CreateFunction {
                    name: name.to_string(),
                    runtime: self.options.runtime.clone(),
                    role: role.to_string(),
                    code: code()?,
                    timeout: meta.timeout,
                    memory: meta.memory,
                    ephemeral_storage: meta.ephemeral_storage,
                    arch: self.options.arch,
                };
                self.platform.create_function(&request).await
            }
            DeployAction::UpdateCode => self.platform.update_function_code(name, &code()?).await,
            DeployAction::UpdateRole => {
                let update = ConfigUpdate {
                    role: Some(role.to_string()),
                    ..ConfigUpdate::default()
                };
                self.platform
                    .update_function_configuration(name, &update)
                    .await
            }
            DeployAction::UpdateConfig => {
                let update = ConfigUpdate {
                    timeout: Some(meta.timeout),
                    memory: Some(meta.memory),
                    role: None,
                };
                self.platform
                    .update_function_configuration(name, &update)
                    .await
            }
        }
    }

    /// Inline bytes, or an object-store reference when above the limit.
    async fn payload(&self, name: &str, archive: &Archive) -> Result<CodePayload, DeployError> {
        if archive.len() <= self.options.inline_limit {
            return Ok(CodePayload::Inline(archive.bytes.clone()));
        }

        let bucket = self
            .options
            .bucket
            .clone()
            .ok_or_else(|| DeployError::MissingBucket {
                function: name.to_string(),
                size: archive.len(),
            })?;
        let key = object_key(name, &archive.hash);

        tracing::info!(function = name, bucket = %bucket, key = %key, size = archive.len(), "uploading archive");
        {
            let _permit = self.permit(name).await?;
            self.store
                .put_object(&bucket, &key, archive.bytes.clone())
                .await?;
        }

        Ok(CodePayload::ObjectStore { bucket, key })
    }

    async fn wait_until_stable(&self, name: &str) -> Result<(), DeployError> {
        let started = Instant::now();
        loop {
            let stable = {
                let _permit = self.permit(name).await?;
                self.platform.is_stable(name).await?
            };
            if stable {
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= self.options.max_wait {
                return Err(DeployError::DeploymentTimedOut {
                    function: name.to_string(),
                    waited,
                });
            }
            tracing::debug!(function = name, waited_ms = waited.as_millis(), "waiting for function to stabilize");
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    async fn permit(&self, name: &str) -> Result<SemaphorePermit<'_>, DeployError> {
        self.permits
            .acquire()
            .await
            .map_err(|e| DeployError::remote("acquire", name, e))
    }
}
