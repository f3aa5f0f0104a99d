//! Deployment parameters carried by each entry point, and the function
//! identity derived from them.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::value::{MetadataError, Value};

/// Number of hex characters of the parameter digest kept in a function name.
const IDENTITY_HASH_LEN: usize = 8;

/// Largest integer the platform's configuration API accepts.
const MAX_PLATFORM_INT: u64 = i32::MAX as u64;

/// Decoded deployment parameters for one entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentMetadata {
    /// Stable identifier of the entry point within its build.
    pub identifier: String,
    /// Memory size in MB.
    pub memory: u32,
    /// Timeout in seconds.
    pub timeout: u32,
    /// Ephemeral `/tmp` storage in MB.
    pub ephemeral_storage: u32,
}

impl DeploymentMetadata {
    /// Interpret a decoded value tree.
    ///
    /// The root must be a map holding a string `identifier` and integer
    /// `memory`, `timeout`, and `ephemeral_storage` fields. Integers may use
    /// either width on the wire but must fit a signed 32-bit integer.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::NotAMap`], [`MetadataError::MissingField`], or
    /// [`MetadataError::WrongType`] when the tree does not have that shape.
    pub fn from_value(value: &Value) -> Result<Self, MetadataError> {
        if !matches!(value, Value::Map(_)) {
            return Err(MetadataError::NotAMap);
        }

        let identifier = value
            .get("identifier")
            .ok_or(MetadataError::MissingField("identifier"))?
            .as_str()
            .ok_or(MetadataError::WrongType {
                field: "identifier",
                expected: "a string",
            })?
            .to_owned();

        Ok(Self {
            identifier,
            memory: int_field(value, "memory")?,
            timeout: int_field(value, "timeout")?,
            ephemeral_storage: int_field(value, "ephemeral_storage")?,
        })
    }

    /// Decode a raw metadata blob straight into deployment parameters.
    ///
    /// # Errors
    ///
    /// Returns any decoding or shape error as a [`MetadataError`].
    pub fn from_bytes(blob: &[u8]) -> Result<Self, MetadataError> {
        Self::from_value(&crate::value::decode(blob)?)
    }
}

fn int_field(value: &Value, field: &'static str) -> Result<u32, MetadataError> {
    let n = value
        .get(field)
        .ok_or(MetadataError::MissingField(field))?
        .as_u64()
        .filter(|n| *n <= MAX_PLATFORM_INT)
        .ok_or(MetadataError::WrongType {
            field,
            expected: "an integer no larger than 2147483647",
        })?;
    Ok(n as u32)
}

/// Name under which an entry point is deployed.
///
/// Formed as `<target>-<h>` where `<h>` is the first eight hex characters of
/// `sha256("<identifier>#<ephemeral_storage>#<memory>#<timeout>")`. Identical
/// parameters always produce the same name, so it is the join key against
/// the functions already deployed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionIdentity(String);

impl FunctionIdentity {
    /// Derive the identity for `metadata` deployed under `target_name`.
    pub fn compute(target_name: &str, metadata: &DeploymentMetadata) -> Self {
        let preimage = format!(
            "{}#{}#{}#{}",
            metadata.identifier, metadata.ephemeral_storage, metadata.memory, metadata.timeout
        );
        let digest = hex::encode(Sha256::digest(preimage.as_bytes()));
        Self(format!("{target_name}-{}", &digest[..IDENTITY_HASH_LEN]))
    }

    /// The function name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FunctionIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
