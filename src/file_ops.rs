//! Filesystem helpers shared by the settings store, server lists and backups
//!
//! The atomic writer stages contents in a temp file next to the target,
//! fsyncs it, then renames it over the target, so a crash leaves either the
//! old file or the new file in place, never a truncated one.

use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Contents fully written and synced to a temp file, waiting to be renamed
/// over their target.
///
/// Dropping a `StagedFile` without calling [`commit`](StagedFile::commit)
/// removes the temp file and leaves the target untouched.
#[derive(Debug)]
pub struct StagedFile {
    temp_file: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    /// Location of the staged temp file (same directory as the target).
    pub fn temp_path(&self) -> &Path {
        self.temp_file.path()
    }

    /// Atomically rename the temp file over the target.
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        self.temp_file.persist(&target).map_err(|e| {
            ConanError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to rename to target file {}", target.display()),
                e,
            )
        })?;
        Ok(())
    }
}

/// Write `contents` to a temp file in the target's directory, creating the
/// directory if needed. Nothing visible changes at `path` until the returned
/// [`StagedFile`] is committed.
pub fn stage_file(path: &Path, contents: &[u8]) -> Result<StagedFile> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!(".{}.", file_name);
    let mut temp_file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| io_error(ErrorCategory::Internal, "failed to create tempfile in", dir, e))?;

    temp_file.write_all(contents).map_err(|e| {
        io_error(
            ErrorCategory::Internal,
            "failed to write tempfile",
            temp_file.path(),
            e,
        )
    })?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file.flush().map_err(|e| {
        io_error(
            ErrorCategory::Internal,
            "failed to flush tempfile",
            temp_file.path(),
            e,
        )
    })?;
    temp_file.as_file().sync_all().map_err(|e| {
        io_error(
            ErrorCategory::Internal,
            "failed to sync file prior to rename",
            temp_file.path(),
            e,
        )
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp_file
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| {
                io_error(
                    ErrorCategory::Internal,
                    "failed to set permissions on",
                    temp_file.path(),
                    e,
                )
            })?;
    }

    Ok(StagedFile {
        temp_file,
        target: path.to_path_buf(),
    })
}

/// Atomically replace `path` with `contents` (tempfile + fsync + rename).
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    stage_file(path, contents)?.commit()
}

/// Read a whole file, mapping failures to a path-carrying error.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| read_error(path, e))
}

pub(crate) fn create_dir_all(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| io_error(ErrorCategory::Internal, "failed to create directory", dir, e))
}

pub(crate) fn read_error(path: &Path, err: io::Error) -> ConanError {
    if err.kind() == io::ErrorKind::NotFound {
        ConanError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::NotFound,
            format!("failed to read from {}: file not found", path.display()),
            err,
        )
    } else {
        io_error(ErrorCategory::Internal, "failed to read from", path, err)
    }
}

pub(crate) fn io_error(
    category: ErrorCategory,
    action: &str,
    path: &Path,
    err: io::Error,
) -> ConanError {
    ConanError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("{} {}: {}", action, path.display(), err),
        err,
    )
}
