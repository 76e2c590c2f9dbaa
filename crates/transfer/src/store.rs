use std::sync::Arc;

use mediavault_storage::{Backend, StorageError, is_temp_key};
use tracing::{debug, warn};

use crate::TransferError;

/// `{session}/chunks/{index}`
pub fn chunk_key(session_id: &str, index: u32) -> String {
    format!("{session_id}/chunks/{index}")
}

/// `{session}/final/{filename}`
pub fn final_key(session_id: &str, filename: &str) -> String {
    format!("{session_id}/final/{filename}")
}

/// `{session}/thumbnails/{tag}_{filename}`
pub fn thumbnail_key(session_id: &str, tag: &str, filename: &str) -> String {
    format!("{session_id}/thumbnails/{tag}_{filename}")
}

fn chunks_prefix(session_id: &str) -> String {
    format!("{session_id}/chunks")
}

/// Staging area for chunk bytes before assembly.
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn Backend>,
}

impl ChunkStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Stores (or atomically replaces) one chunk.
    pub async fn put(&self, session_id: &str, index: u32, data: &[u8]) -> Result<(), TransferError> {
        self.backend
            .write_atomic(&chunk_key(session_id, index), data)
            .await?;
        debug!(session = session_id, index, size = data.len(), "chunk staged");
        Ok(())
    }

    pub async fn has(&self, session_id: &str, index: u32) -> Result<bool, TransferError> {
        Ok(self.backend.exists(&chunk_key(session_id, index)).await?)
    }

    /// Reads one chunk. An absent chunk is [`TransferError::NotFound`].
    pub async fn read(&self, session_id: &str, index: u32) -> Result<Vec<u8>, TransferError> {
        match self.backend.read(&chunk_key(session_id, index)).await {
            Ok(data) => Ok(data),
            Err(e) if e.is_not_found() => Err(TransferError::NotFound(format!(
                "chunk {index} of session {session_id}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes one chunk. Failures are logged, never returned.
    pub async fn remove(&self, session_id: &str, index: u32) {
        remove_logged(self.backend.as_ref(), &chunk_key(session_id, index)).await;
    }

    /// Removes every staged chunk of a session, including leftovers of
    /// interrupted writes. Returns how many entries were deleted.
    pub async fn remove_all(&self, session_id: &str) -> usize {
        match self.backend.list(&chunks_prefix(session_id)).await {
            Ok(keys) => delete_keys(self.backend.as_ref(), &keys).await,
            Err(e) => {
                warn!(session = session_id, error = %e, "listing staged chunks failed");
                0
            }
        }
    }

    /// Removes staged chunks of every session, plus temp files that
    /// interrupted artifact writes left anywhere in the store.
    pub async fn purge_all(&self) -> usize {
        let keys = match self.backend.list("").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "listing storage for purge failed");
                return 0;
            }
        };
        let staged: Vec<String> = keys
            .into_iter()
            .filter(|k| k.split('/').nth(1) == Some("chunks") || is_temp_key(k))
            .collect();
        delete_keys(self.backend.as_ref(), &staged).await
    }
}

async fn delete_keys(backend: &dyn Backend, keys: &[String]) -> usize {
    let mut removed = 0;
    for key in keys {
        if remove_logged(backend, key).await {
            removed += 1;
        }
    }
    removed
}

/// Deletes `key`, logging failures. Returns `true` if something was deleted.
pub(crate) async fn remove_logged(backend: &dyn Backend, key: &str) -> bool {
    match backend.delete(key).await {
        Ok(()) => true,
        Err(StorageError::NotFound(_)) => false,
        Err(e) => {
            warn!(key, error = %e, "failed to remove staged data");
            false
        }
    }
}
