//! Reading and rewriting config files
//!
//! Rewrites are atomic: the new content goes to a temp file in the same
//! directory, is fsynced, restricted to mode 0o600 on Unix and then renamed
//! over the target. Readers see either the old file or the new one. A
//! symlinked config is rewritten at the link's target and the link is kept.

use crate::error::{ErrorCategory, ErrorKind, Result, SconfigError};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Read a config file. A missing file is not an error and yields `None`.
pub fn read_config(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
            SconfigError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::FileReadFailed,
                format!("{} is not valid UTF-8", path.display()),
                e,
            )
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(read_error(path, e)),
    }
}

/// Atomically replace `path` with `contents`.
pub fn write_config(path: &Path, contents: &[u8]) -> Result<()> {
    let target = resolve_target(path)?;
    let path = target.as_path();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        SconfigError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::FileWriteFailed,
            format!("failed to create tempfile in {}", dir.display()),
            e,
        )
    })?;

    temp_file
        .write_all(contents)
        .map_err(|e| write_error("failed to write to tempfile", e))?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file
        .flush()
        .map_err(|e| write_error("failed to flush tempfile", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| write_error("failed to sync file prior to rename", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = temp_file
            .as_file()
            .metadata()
            .map_err(|e| write_error("failed to get tempfile metadata", e))?
            .permissions();
        perms.set_mode(0o600);
        temp_file
            .as_file()
            .set_permissions(perms)
            .map_err(|e| write_error("failed to set tempfile permissions", e))?;
    }

    temp_file.persist(path).map_err(|e| {
        SconfigError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::FileWriteFailed,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    tracing::info!(path = %path.display(), "config file rewritten");
    Ok(())
}

/// The file a rewrite must replace: the final target of an existing path,
/// or the path itself when nothing is there yet.
fn resolve_target(path: &Path) -> Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(e) => Err(SconfigError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::FileWriteFailed,
            format!("failed to resolve {}", path.display()),
            e,
        )),
    }
}

fn write_error(msg: &str, err: io::Error) -> SconfigError {
    SconfigError::with_kind_and_source(
        ErrorCategory::Internal,
        ErrorKind::FileWriteFailed,
        msg,
        err,
    )
}

fn read_error(path: &Path, err: io::Error) -> SconfigError {
    let category = if err.kind() == io::ErrorKind::PermissionDenied {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    SconfigError::with_kind_and_source(
        category,
        ErrorKind::FileReadFailed,
        format!("failed to read from {}", path.display()),
        err,
    )
}
