//! Device path helpers.
//!
//! Paths seen by clients are "logical": absolute, `/`-separated and relative
//! to the filesystem mount point. They are mapped onto the VFS with
//! [`resolve`].

use std::path::{Component, Path, PathBuf};

use crate::error::OtaError;

const MAX_PATH_LEN: usize = 255;

/// Join a parent directory and an entry name with exactly one separator.
pub fn join_path(parent: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    let parent = parent.trim_end_matches('/');
    if name.is_empty() {
        return if parent.is_empty() { "/".to_string() } else { parent.to_string() };
    }
    format!("{parent}/{name}")
}

/// Normalise a client supplied path to the logical form `/a/b`.
///
/// Rejects empty names, `..`, NUL bytes and backslashes.
pub fn validate_upload_path(path: &str) -> Result<String, OtaError> {
    if path.len() > MAX_PATH_LEN {
        return Err(OtaError::InvalidUploadPath(format!(
            "path must be {MAX_PATH_LEN} characters or less"
        )));
    }
    if path.chars().any(|c| matches!(c, '\\' | '\0')) {
        return Err(OtaError::InvalidUploadPath(
            "path contains invalid characters".to_string(),
        ));
    }

    let mut logical = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if segment == ".." {
            return Err(OtaError::InvalidUploadPath(
                "path cannot contain '..'".to_string(),
            ));
        }
        logical.push('/');
        logical.push_str(segment);
    }

    if logical.is_empty() {
        return Err(OtaError::InvalidUploadPath("path cannot be empty".to_string()));
    }
    Ok(logical)
}

/// Map a logical path onto the mount point. The root (`/` or empty) maps to
/// the mount itself.
pub fn resolve(mount: &Path, logical: &str) -> Result<PathBuf, OtaError> {
    let mut resolved = mount.to_path_buf();
    for component in Path::new(logical.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(OtaError::InvalidUploadPath(format!(
                    "{logical} escapes the filesystem"
                )))
            }
        }
    }
    Ok(resolved)
}

/// Directory part of a logical path, `None` for files at the root.
pub fn parent_dir(logical: &str) -> Option<&str> {
    match logical.rfind('/') {
        Some(0) | None => None,
        Some(pos) => logical.get(..pos),
    }
}
