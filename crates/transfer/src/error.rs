use mediavault_storage::StorageError;
use mediavault_thumbnail::ThumbnailError;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Malformed or inconsistent request. Never retryable.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("checksum mismatch for chunk {index}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        index: u32,
        expected: String,
        actual: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("assembly failed: {0}")]
    Assembly(String),

    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("timed out storing chunk {index}")]
    Timeout { index: u32 },

    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
}

impl TransferError {
    /// Whether the same request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::ChecksumMismatch { .. }
                | TransferError::Storage(_)
                | TransferError::Timeout { .. }
                | TransferError::Assembly(_)
        )
    }
}

impl From<ThumbnailError> for TransferError {
    fn from(e: ThumbnailError) -> Self {
        match e {
            ThumbnailError::UnsupportedMedia(msg) => TransferError::UnsupportedMedia(msg),
            ThumbnailError::Encode(msg) => TransferError::Assembly(msg),
        }
    }
}
