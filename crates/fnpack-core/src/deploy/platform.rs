//! Seams to the remote compute platform and object storage.

use std::fmt;

use async_trait::async_trait;
use fnpack_schema::Arch;

use crate::error::DeployError;

/// Handler every function is created with; the archive's bootstrap shim.
pub const HANDLER: &str = "bootstrap";

/// The deployed state fields compared during reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFunction {
    /// Base64 SHA-256 of the deployed archive.
    pub code_sha256: String,
    pub role: String,
    pub memory: Option<u32>,
    pub timeout: Option<u32>,
}

/// How archive bytes reach the platform.
#[derive(Clone, PartialEq, Eq)]
pub enum CodePayload {
    Inline(Vec<u8>),
    ObjectStore { bucket: String, key: String },
}

impl fmt::Debug for CodePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
            Self::ObjectStore { bucket, key } => write!(f, "ObjectStore(s3://{bucket}/{key})"),
        }
    }
}

/// Parameters for a new function.
#[derive(Debug, Clone)]
pub struct CreateFunction {
    pub name: String,
    pub runtime: String,
    pub role: String,
    pub code: CodePayload,
    pub timeout: u32,
    pub memory: u32,
    pub ephemeral_storage: u32,
    pub arch: Arch,
}

/// Configuration fields to change; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub timeout: Option<u32>,
    pub memory: Option<u32>,
    pub role: Option<String>,
}

/// Remote function management API.
///
/// Mutations are rejected while a previous one is still being applied, so
/// callers poll [`FunctionPlatform::is_stable`] between them.
#[async_trait]
pub trait FunctionPlatform: Send + Sync + fmt::Debug {
    /// Look up a function. `Ok(None)` means it does not exist.
    async fn get_function(&self, name: &str) -> Result<Option<RemoteFunction>, DeployError>;

    async fn create_function(&self, request: &CreateFunction) -> Result<(), DeployError>;

    async fn update_function_code(&self, name: &str, code: &CodePayload) -> Result<(), DeployError>;

    async fn update_function_configuration(
        &self,
        name: &str,
        update: &ConfigUpdate,
    ) -> Result<(), DeployError>;

    /// Whether the function has finished applying its last change.
    async fn is_stable(&self, name: &str) -> Result<bool, DeployError>;
}

/// Blob storage used for archives too large to send inline.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), DeployError>;
}
