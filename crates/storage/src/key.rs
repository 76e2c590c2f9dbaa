use std::path::{Component, Path};

use crate::StorageError;

/// Validates that a storage key stays inside the backend root.
///
/// Rejects:
/// - Empty keys
/// - Absolute keys (`/x`, `\x`, `C:\x`)
/// - Parent traversal (`..`) and `.` segments
/// - Backslashes and NUL bytes
/// - Empty segments (`a//b`, trailing `/`)
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".into()));
    }

    if key.contains('\\') || key.contains('\0') {
        return Err(StorageError::InvalidKey(format!(
            "illegal character in key: {key:?}"
        )));
    }

    if key.starts_with('/') || Path::new(key).is_absolute() {
        return Err(StorageError::InvalidKey(format!(
            "absolute key not allowed: {key}"
        )));
    }

    for segment in key.split('/') {
        match segment {
            "" => {
                return Err(StorageError::InvalidKey(format!(
                    "empty segment in key: {key}"
                )));
            }
            "." => {
                return Err(StorageError::InvalidKey(format!(
                    "'.' segment not allowed: {key}"
                )));
            }
            _ => {}
        }
    }

    for component in Path::new(key).components() {
        match component {
            Component::ParentDir => {
                return Err(StorageError::InvalidKey(format!(
                    "parent directory traversal not allowed: {key}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(StorageError::InvalidKey(format!(
                    "absolute key not allowed: {key}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}
