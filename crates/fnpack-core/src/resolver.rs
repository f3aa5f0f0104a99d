//! Dependency closure resolution.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::env::BuildEnvironment;
use crate::error::PackError;
use crate::library::LibraryPath;

/// Library closure of one executable, with its dynamic linker identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLibraries {
    pub libraries: BTreeSet<LibraryPath>,
    pub loader: LibraryPath,
}

/// Resolve the libraries `executable` needs at load time.
///
/// With `include_base_libs`, the environment's C library set is merged in.
/// Base entries whose file name is already in the closure are skipped: package
/// listings often name the same library under several directories (`/lib64`
/// and `/usr/lib/<triple>`), and only the copy the linker resolved is wanted.
///
/// # Errors
///
/// Returns [`PackError::AmbiguousLoader`] unless exactly one `ld-*` entry is
/// in the result, or any error from the environment.
pub async fn resolve(
    env: &dyn BuildEnvironment,
    executable: &Path,
    include_base_libs: bool,
) -> Result<ResolvedLibraries, PackError> {
    let mut libraries = env.resolve_dynamic_deps(executable).await?;
    tracing::debug!(
        executable = %executable.display(),
        count = libraries.len(),
        "resolved dynamic dependencies"
    );

    if include_base_libs {
        let present: HashSet<String> = libraries
            .iter()
            .map(|l| l.file_name().to_string())
            .collect();

        for lib in env.base_library_set().await? {
            if !present.contains(lib.file_name()) {
                libraries.insert(lib);
            }
        }
    }

    let loaders: Vec<&LibraryPath> = libraries.iter().filter(|l| l.is_loader()).collect();
    let [loader] = loaders.as_slice() else {
        return Err(PackError::AmbiguousLoader {
            candidates: loaders.iter().map(|l| l.as_path().to_path_buf()).collect(),
        });
    };
    let loader = (*loader).clone();

    Ok(ResolvedLibraries { libraries, loader })
}
