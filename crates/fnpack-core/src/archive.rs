//! Deterministic deployment archives.
//!
//! Layout:
//!
//! ```text
//! bootstrap            0755  generated shim
//! bin/<executable>     0755
//! lib/<library>...     0755 for the loader, 0644 otherwise
//! ```
//!
//! Every entry carries the same fixed timestamp (1980-01-01, the zip epoch) and
//! libraries are written in sorted order, so identical inputs always yield
//! byte-identical archives and therefore identical code hashes.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use fnpack_schema::CodeHash;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::bootstrap;
use crate::error::PackError;
use crate::library::LibraryPath;

const MODE_EXECUTABLE: u32 = 0o755;
const MODE_LIBRARY: u32 = 0o644;

/// Name of the generated handler script.
pub const BOOTSTRAP_ENTRY: &str = "bootstrap";

/// A finished archive held in memory.
#[derive(Debug, Clone)]
pub struct Archive {
    pub bytes: Vec<u8>,
    pub hash: CodeHash,
}

impl Archive {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Where the archive for `executable` is written: `<executable>.zip`.
    pub fn path_for(executable: &Path) -> PathBuf {
        executable.with_extension("zip")
    }

    /// Write the archive to disk.
    pub fn write_to(&self, path: &Path) -> Result<(), PackError> {
        fs::write(path, &self.bytes)?;
        Ok(())
    }
}

/// Assemble the archive for `executable`.
///
/// Library bytes are read from `sysroot` joined with each library path when a
/// sysroot is given, and from the library path itself otherwise. With
/// `use_libc`, the bootstrap invokes the single `ld-*` entry of `libraries`.
///
/// # Errors
///
/// - [`PackError::InvalidExecutable`] if the executable is unreadable or empty
/// - [`PackError::MissingLibrary`] if a library source file cannot be read
/// - [`PackError::AmbiguousLoader`] if `use_libc` and there is not exactly one loader
pub fn build(
    executable: &Path,
    libraries: &BTreeSet<LibraryPath>,
    sysroot: Option<&Path>,
    use_libc: bool,
) -> Result<Archive, PackError> {
    let binary = read_executable(executable)?;
    let binary_name = executable
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PackError::InvalidExecutable {
            path: executable.to_path_buf(),
            reason: "file name is not valid UTF-8".to_string(),
        })?;

    let script = if use_libc {
        let loaders: Vec<&LibraryPath> = libraries.iter().filter(|l| l.is_loader()).collect();
        let [loader] = loaders.as_slice() else {
            return Err(PackError::AmbiguousLoader {
                candidates: loaders.iter().map(|l| l.as_path().to_path_buf()).collect(),
            });
        };
        bootstrap::render_with_loader(loader.file_name(), binary_name)
    } else {
        bootstrap::render_with_search_path(binary_name)
    };

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut written: HashSet<&str> = HashSet::new();

    for lib in libraries {
        let name = lib.file_name();
        if !written.insert(name) {
            tracing::debug!(library = %lib, "skipping library with duplicate file name");
            continue;
        }

        let source_path = sysroot.map_or_else(|| lib.as_path().to_path_buf(), |root| lib.under(root));
        let data = fs::read(&source_path).map_err(|source| PackError::MissingLibrary {
            library: lib.as_path().to_path_buf(),
            source_path: source_path.clone(),
            source,
        })?;

        let mode = if lib.is_loader() {
            MODE_EXECUTABLE
        } else {
            MODE_LIBRARY
        };
        zip.start_file(format!("lib/{name}"), entry_options(mode))?;
        zip.write_all(&data)?;
    }

    zip.start_file(
        format!("bin/{binary_name}"),
        entry_options(MODE_EXECUTABLE),
    )?;
    zip.write_all(&binary)?;

    zip.start_file(BOOTSTRAP_ENTRY, entry_options(MODE_EXECUTABLE))?;
    zip.write_all(script.as_bytes())?;

    let bytes = zip.finish()?.into_inner();
    let hash = CodeHash::compute(&bytes);
    Ok(Archive { bytes, hash })
}

fn entry_options(mode: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(mode)
}

fn read_executable(path: &Path) -> Result<Vec<u8>, PackError> {
    let data = fs::read(path).map_err(|e| PackError::InvalidExecutable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if data.is_empty() {
        return Err(PackError::InvalidExecutable {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    Ok(data)
}
