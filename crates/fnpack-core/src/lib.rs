//! Core library for fnpack.
//!
//! Packages the entry points of a native build into self-contained function
//! archives and reconciles them with the deployed functions.

pub mod archive;
pub mod bootstrap;
pub mod config;
pub mod deploy;
pub mod env;
pub mod error;
pub mod library;
pub mod orchestrator;
pub mod paths;
pub mod reporter;
pub mod resolver;

pub use archive::Archive;
pub use config::{Overrides, Settings};
pub use error::{DeployError, PackError};
pub use library::LibraryPath;
pub use orchestrator::{EntryResult, Orchestrator, Outcome, RunReport};
pub use reporter::{NullReporter, Reporter};
