//! Utility functions for path validation and link-file naming

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Maximum number of names tried when looking for a free link-file name
const MAX_NAME_ATTEMPTS: u64 = 100_000;

/// Characters never allowed in a path on the current platform
#[cfg(windows)]
const INVALID_PATH_CHARS: &[char] = &['<', '>', '"', '|', '?', '*', '\0'];
#[cfg(not(windows))]
const INVALID_PATH_CHARS: &[char] = &['\0'];

/// Check that a path is usable as a directory or file location
///
/// Empty paths and paths containing characters the platform forbids are
/// rejected with [`Error::InvalidPath`].
///
/// # Examples
///
/// ```
/// use gallery_sync::utils::validate_path;
/// use std::path::Path;
///
/// assert!(validate_path(Path::new("./packages")).is_ok());
/// assert!(validate_path(Path::new("")).is_err());
/// ```
pub fn validate_path(path: &Path) -> Result<()> {
    let raw = path.to_string_lossy();
    if raw.trim().is_empty() {
        return Err(Error::InvalidPath {
            path: path.to_path_buf(),
            reason: "path can not be empty".to_string(),
        });
    }
    if let Some(bad) = raw.chars().find(|c| INVALID_PATH_CHARS.contains(c)) {
        return Err(Error::InvalidPath {
            path: path.to_path_buf(),
            reason: format!("path contains invalid character {:?}", bad),
        });
    }
    Ok(())
}

/// Find the first free link-file name at or after `start`
///
/// Names follow `{prefix}{index}.{extension}`; an index whose file already
/// exists is skipped. Returns the chosen path and its index.
///
/// # Errors
///
/// Returns [`Error::InvalidPath`] if no free name is found after
/// `MAX_NAME_ATTEMPTS` tries.
pub fn next_unit_path(
    dir: &Path,
    prefix: &str,
    extension: &str,
    start: u64,
) -> Result<(PathBuf, u64)> {
    for index in start..start.saturating_add(MAX_NAME_ATTEMPTS) {
        let candidate = dir.join(format!("{}{}.{}", prefix, index, extension));
        if !candidate.exists() {
            return Ok((candidate, index));
        }
        tracing::info!(
            path = %candidate.display(),
            "Link file already exists, trying the next index"
        );
    }

    Err(Error::InvalidPath {
        path: dir.to_path_buf(),
        reason: format!(
            "could not find a free {}N.{} name after {} attempts",
            prefix, extension, MAX_NAME_ATTEMPTS
        ),
    })
}
