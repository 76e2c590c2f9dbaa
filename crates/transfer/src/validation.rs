use crate::TransferError;

/// Longest filename accepted, in bytes.
///
/// Thumbnails are stored as `{tag}_{filename}`; with tags capped at
/// [`MAX_TAG_LEN`](mediavault_thumbnail::MAX_TAG_LEN) every stored name
/// stays within the usual 255-byte file name limit.
pub const MAX_FILENAME_LEN: usize = 200;

/// Validates an untrusted upload filename.
///
/// The name becomes the last segment of a storage key, so it must be a
/// single plain path component.
pub fn validate_filename(name: &str) -> Result<(), TransferError> {
    if name.trim().is_empty() {
        return Err(TransferError::Protocol("filename is empty".into()));
    }

    if name.len() > MAX_FILENAME_LEN {
        return Err(TransferError::Protocol(format!(
            "filename longer than {MAX_FILENAME_LEN} bytes"
        )));
    }

    if name.contains(['/', '\\', '\0']) {
        return Err(TransferError::Protocol(format!(
            "filename contains a path separator or NUL: {name:?}"
        )));
    }

    if name == "." || name == ".." || name.contains("..") {
        return Err(TransferError::Protocol(format!(
            "filename contains '..': {name}"
        )));
    }

    // Drive prefix like `C:`.
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(TransferError::Protocol(format!(
            "filename has a drive prefix: {name}"
        )));
    }

    Ok(())
}
