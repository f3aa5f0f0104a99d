//! Deployment reconciliation.
//!
//! A function's remote state is compared with the locally built archive and
//! metadata, and only the differing parts are pushed:
//!
//! | Remote state | Actions |
//! |---|---|
//! | missing | `create` |
//! | code hash differs | `update-code` |
//! | role differs | `update-role` |
//! | timeout or memory differs | `update-config` (one combined call) |
//! | everything matches | none |

pub mod lambda;
pub mod platform;
pub mod reconciler;
pub mod storage;

use std::fmt;
use std::sync::Arc;

use fnpack_schema::{Arch, CodeHash, DeploymentMetadata};

pub use lambda::LambdaPlatform;
pub use platform::{
    CodePayload, ConfigUpdate, CreateFunction, FunctionPlatform, ObjectStore, RemoteFunction,
};
pub use reconciler::{DeployReport, ReconcileOptions, Reconciler};
pub use storage::S3ObjectStore;

use crate::config::DeploySettings;

/// Archives larger than this are uploaded to object storage first.
pub const INLINE_PAYLOAD_LIMIT: usize = 50 * 1024 * 1024;

/// One remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeployAction {
    Create,
    UpdateCode,
    UpdateRole,
    UpdateConfig,
}

impl DeployAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::UpdateCode => "update-code",
            Self::UpdateRole => "update-role",
            Self::UpdateConfig => "update-config",
        }
    }

    /// Whether the action ships archive bytes.
    pub fn needs_code(self) -> bool {
        matches!(self, Self::Create | Self::UpdateCode)
    }
}

impl fmt::Display for DeployAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the actions that bring `remote` in line with the local build.
pub fn plan(
    remote: Option<&RemoteFunction>,
    hash: &CodeHash,
    role: &str,
    meta: &DeploymentMetadata,
) -> Vec<DeployAction> {
    let Some(remote) = remote else {
        return vec![DeployAction::Create];
    };

    let mut actions = Vec::new();
    if !hash.matches_base64(&remote.code_sha256) {
        actions.push(DeployAction::UpdateCode);
    }
    if remote.role != role {
        actions.push(DeployAction::UpdateRole);
    }
    if remote.timeout != Some(meta.timeout) || remote.memory != Some(meta.memory) {
        actions.push(DeployAction::UpdateConfig);
    }
    actions
}

/// Object key for an offloaded archive: `<function>/<sha256-hex>.zip`.
pub fn object_key(function: &str, hash: &CodeHash) -> String {
    format!("{function}/{}.zip", hash.to_hex())
}

/// Build a reconciler backed by Lambda and S3 clients for `settings`.
pub async fn connect(settings: &DeploySettings, arch: Arch) -> Reconciler {
    let sdk = settings.sdk_config().await;
    let platform = Arc::new(LambdaPlatform::new(&sdk));
    let store = Arc::new(S3ObjectStore::new(&sdk, settings.endpoint_url.is_some()));
    Reconciler::new(
        platform,
        store,
        settings.max_inflight,
        settings.reconcile_options(arch),
    )
}
