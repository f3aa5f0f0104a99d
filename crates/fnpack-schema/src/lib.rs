//! Shared types and wire formats for fnpack.
//!
//! Nothing in this crate touches the network or spawns processes. It holds the
//! per-entry-point metadata codec, the build manifest written next to the
//! compiled binaries, and the small value types the packager and the
//! deployment reconciler agree on.

pub mod arch;
pub mod hash;
pub mod manifest;
pub mod metadata;
pub mod value;

// Re-exports
pub use arch::*;
pub use hash::*;
pub use manifest::{BuildManifest, EntryPoint, ManifestError};
pub use metadata::{DeploymentMetadata, FunctionIdentity};
pub use value::{MetadataError, Value, decode, encode};
