//! Upload façade: session registry plus download and maintenance helpers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use mediavault_protocol::messages::{
    AbandonUploadRequest, BeginUploadRequest, BeginUploadResponse, ChunkErrorResponse,
};
use mediavault_protocol::{ArtifactInfo, ChunkReceipt, SessionSnapshot};
use mediavault_storage::Backend;
use mediavault_thumbnail::{ThumbnailDeriver, Thumbnailer};
use mediavault_transfer::{
    AssemblyCoordinator, ChecksumVerifier, ChunkStore, ChunkSubmission, TransferError,
    UploadSession,
};
use tracing::{debug, info};

use crate::config::ResourceConfig;

/// Owns every live upload session and routes requests to them.
///
/// Sessions are independent: the registry lock is held only for lookups
/// and inserts, never across storage I/O.
pub struct ResourceManager {
    config: ResourceConfig,
    coordinator: AssemblyCoordinator,
    sessions: RwLock<HashMap<String, Arc<UploadSession>>>,
}

impl ResourceManager {
    /// Creates a manager deriving thumbnails with [`ThumbnailDeriver`].
    pub fn new(backend: Arc<dyn Backend>, config: ResourceConfig) -> Self {
        Self::with_thumbnailer(backend, config, Arc::new(ThumbnailDeriver::new()))
    }

    pub fn with_thumbnailer(
        backend: Arc<dyn Backend>,
        config: ResourceConfig,
        thumbnailer: Arc<dyn Thumbnailer>,
    ) -> Self {
        let coordinator = AssemblyCoordinator::new(
            ChunkStore::new(backend),
            ChecksumVerifier::new(config.digest),
            thumbnailer,
            config.thumbnails.clone(),
        );
        Self {
            config,
            coordinator,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn verifier(&self) -> &ChecksumVerifier {
        self.coordinator.verifier()
    }

    fn backend(&self) -> &dyn Backend {
        self.coordinator.store().backend().as_ref()
    }

    fn session(&self, session_id: &str) -> Result<Arc<UploadSession>, TransferError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .ok_or_else(|| TransferError::NotFound(format!("session {session_id}")))
    }

    fn remove_session(&self, session_id: &str) -> Option<Arc<UploadSession>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }

    fn create_session(
        &self,
        owner: &str,
        filename: &str,
        declared_size: u64,
        chunk_size: u64,
        thumbnails: bool,
    ) -> Result<Arc<UploadSession>, TransferError> {
        let chunk_size = if chunk_size == 0 {
            self.config.chunk_size
        } else {
            chunk_size
        };
        let session =
            UploadSession::new(owner, filename, declared_size, chunk_size)?.with_thumbnails(thumbnails);

        let limit = if session.media_kind().is_image_like() {
            self.config.max_image_size.min(self.config.max_file_size)
        } else {
            self.config.max_file_size
        };
        if declared_size > limit {
            return Err(TransferError::FileTooLarge {
                size: declared_size,
                limit,
            });
        }

        let session = Arc::new(session);
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id().to_string(), Arc::clone(&session));

        info!(
            session = session.id(),
            owner,
            filename,
            declared_size,
            chunk_size,
            chunks = session.expected_chunk_count(),
            "upload session started"
        );
        Ok(session)
    }

    /// Opens a chunked upload and returns its session id.
    ///
    /// `chunk_size` 0 selects the configured default.
    pub fn begin_upload(
        &self,
        owner: &str,
        filename: &str,
        declared_size: u64,
        chunk_size: u64,
    ) -> Result<String, TransferError> {
        let session = self.create_session(owner, filename, declared_size, chunk_size, true)?;
        Ok(session.id().to_string())
    }

    /// Request/response form of [`begin_upload`](Self::begin_upload).
    pub fn begin(
        &self,
        owner: &str,
        req: &BeginUploadRequest,
    ) -> Result<BeginUploadResponse, TransferError> {
        let session =
            self.create_session(owner, &req.filename, req.declared_size, req.chunk_size, true)?;
        Ok(BeginUploadResponse {
            session_id: session.id().to_string(),
            chunk_size: session.chunk_size(),
            expected_chunk_count: session.expected_chunk_count(),
            digest: self.config.digest.to_string(),
        })
    }

    /// Submits one chunk with the configured write timeout.
    pub async fn submit_chunk(&self, chunk: ChunkSubmission) -> Result<ChunkReceipt, TransferError> {
        let session = self.session(&chunk.session_id)?;
        self.coordinator
            .submit(&session, chunk, self.config.chunk_timeout())
            .await
    }

    /// Submits one chunk, bounding its storage write by `timeout`.
    pub async fn submit_chunk_with_timeout(
        &self,
        chunk: ChunkSubmission,
        timeout: Duration,
    ) -> Result<ChunkReceipt, TransferError> {
        let session = self.session(&chunk.session_id)?;
        self.coordinator.submit(&session, chunk, Some(timeout)).await
    }

    /// Returns the assembled artifact.
    pub fn get_artifact(&self, session_id: &str) -> Result<ArtifactInfo, TransferError> {
        let session = self.session(session_id)?;
        session.artifact().ok_or_else(|| {
            TransferError::NotReady(format!(
                "session {session_id} is {:?}",
                session.status()
            ))
        })
    }

    pub fn session_snapshot(&self, session_id: &str) -> Result<SessionSnapshot, TransferError> {
        Ok(self.session(session_id)?.snapshot())
    }

    /// Snapshots of every registered session.
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|s| s.snapshot())
            .collect()
    }

    /// Drops a session and its staged chunks, whatever its state.
    ///
    /// An assembly in flight notices the cancellation and discards its
    /// output. A completed artifact stays in permanent storage.
    pub async fn abandon(&self, session_id: &str) -> Result<(), TransferError> {
        let session = self
            .remove_session(session_id)
            .ok_or_else(|| TransferError::NotFound(format!("session {session_id}")))?;
        let previous = session.cancel();
        let removed = self.coordinator.store().remove_all(session_id).await;
        info!(session = session_id, ?previous, removed, "upload session abandoned");
        Ok(())
    }

    /// Request form of [`abandon`](Self::abandon).
    pub async fn abandon_upload(&self, req: &AbandonUploadRequest) -> Result<(), TransferError> {
        self.abandon(&req.session_id).await
    }

    /// Reads the assembled file.
    pub async fn read_artifact(&self, session_id: &str) -> Result<Vec<u8>, TransferError> {
        let artifact = self.get_artifact(session_id)?;
        Ok(self.backend().read(&artifact.key).await?)
    }

    /// Reads one derived thumbnail by size tag.
    pub async fn read_thumbnail(&self, session_id: &str, tag: &str) -> Result<Vec<u8>, TransferError> {
        let artifact = self.get_artifact(session_id)?;
        let key = artifact.thumbnails.get(tag).ok_or_else(|| {
            TransferError::NotFound(format!("thumbnail {tag} of session {session_id}"))
        })?;
        Ok(self.backend().read(key).await?)
    }

    /// Deletes an assembled artifact, its thumbnails and its session.
    pub async fn delete_artifact(&self, session_id: &str) -> Result<(), TransferError> {
        let artifact = self.get_artifact(session_id)?;
        self.remove_session(session_id);
        self.coordinator.discard(&artifact).await;
        info!(session = session_id, key = %artifact.key, "artifact deleted");
        Ok(())
    }

    /// Stores a whole file in one call through the regular session path.
    pub async fn upload_file(
        &self,
        owner: &str,
        filename: &str,
        data: Vec<u8>,
        derive_thumbnails: bool,
    ) -> Result<ArtifactInfo, TransferError> {
        let size = data.len() as u64;
        let session = self.create_session(owner, filename, size, size.max(1), derive_thumbnails)?;
        let chunk = ChunkSubmission {
            session_id: session.id().to_string(),
            index: 0,
            total_chunks: 1,
            checksum: self.verifier().compute_digest(&data),
            data,
        };

        if let Err(e) = self
            .coordinator
            .submit(&session, chunk, self.config.chunk_timeout())
            .await
        {
            // A one-shot upload has no client to retry chunks; drop it.
            self.remove_session(session.id());
            session.cancel();
            self.coordinator.store().remove_all(session.id()).await;
            return Err(e);
        }
        session
            .artifact()
            .ok_or_else(|| TransferError::Assembly(format!("session {} did not complete", session.id())))
    }

    /// Re-runs assembly for a session whose chunks are all registered.
    pub async fn retry_assembly(&self, session_id: &str) -> Result<ArtifactInfo, TransferError> {
        let session = self.session(session_id)?;
        self.coordinator.retry(&session).await
    }

    /// Incomplete sessions with no activity for longer than `max_idle`.
    pub fn stale_sessions(&self, max_idle: Duration) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut stale: Vec<_> = sessions
            .values()
            .filter(|s| s.status().accepts_chunks() && s.idle_for() > max_idle)
            .map(|s| s.snapshot())
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        stale
    }

    /// Deletes the staged chunks of every session.
    ///
    /// Sessions stay registered. One whose chunks were purged fails its
    /// next assembly, which drops the missing index so it can be resent.
    pub async fn purge_staging(&self) -> usize {
        let removed = self.coordinator.store().purge_all().await;
        if removed > 0 {
            info!(removed, "purged staged chunks");
        } else {
            debug!("no staged chunks to purge");
        }
        removed
    }
}

/// Builds the wire error for a failed chunk submission.
pub fn chunk_error_response(
    session_id: &str,
    index: Option<u32>,
    err: &TransferError,
) -> ChunkErrorResponse {
    ChunkErrorResponse {
        session_id: session_id.to_string(),
        index,
        message: err.to_string(),
        retryable: err.is_retryable(),
    }
}
