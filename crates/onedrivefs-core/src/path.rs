//! Entry path normalisation
//!
//! The host addresses entries with absolute, `/`-separated paths. Cache
//! and handle keys must be canonical so that `/a//b/` and `/a/b` refer to
//! the same entry, so every path is normalised before it is used.

use std::path::{Path, PathBuf};

use crate::error::PathError;
use crate::{MAX_FILENAME_LEN, MAX_PATH_LEN};

/// Root of the mounted file system
pub const ROOT: &str = "/";

/// Normalise a host-supplied entry path.
///
/// - a leading `/` is added if missing
/// - repeated separators and `.` components are dropped
/// - a trailing `/` is removed (except for the root itself)
/// - `..`, null bytes and over-long paths or names are rejected
pub fn normalize(path: &str) -> Result<String, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }

    if path.contains('\0') {
        return Err(PathError::NullByte);
    }

    if path.len() > MAX_PATH_LEN {
        return Err(PathError::PathTooLong {
            len: path.len(),
            max: MAX_PATH_LEN,
        });
    }

    let mut result = String::with_capacity(path.len() + 1);
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => return Err(PathError::ParentDir),
            name => {
                if name.len() > MAX_FILENAME_LEN {
                    return Err(PathError::NameTooLong {
                        len: name.len(),
                        max: MAX_FILENAME_LEN,
                    });
                }
                result.push('/');
                result.push_str(name);
            }
        }
    }

    if result.is_empty() {
        result.push('/');
    }

    Ok(result)
}

/// Parent of a normalised path, `None` for the root
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last component of a normalised path (empty for the root)
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Append a single name to a normalised directory path
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// True if `path` is `ancestor` itself or lies beneath it.
///
/// Component-aware: `/ab` is not within `/a`.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return true;
    }
    match path.strip_prefix(ancestor) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Resolve a normalised entry path beneath a local base directory.
///
/// Works on non-existent paths; no symlinks are followed.
pub fn resolve_under(base: &Path, entry_path: &str) -> Result<PathBuf, PathError> {
    let normalized = normalize(entry_path)?;
    let mut result = base.to_path_buf();
    for name in normalized.split('/').filter(|c| !c.is_empty()) {
        result.push(name);
    }
    Ok(result)
}
