//! Chunk acceptance and exactly-once assembly.
//!
//! Chunk writes happen outside any lock. The index-set update and the
//! completion test happen together inside the session mutex, so exactly
//! one submitter observes the incomplete-to-complete transition and owns
//! assembly. Assembly itself runs on a spawned task: a caller that gives
//! up waiting cannot leave a session stuck in `Assembling`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mediavault_protocol::{ArtifactInfo, ChunkReceipt, UploadStatus};
use mediavault_storage::AtomicWrite;
use mediavault_thumbnail::{ThumbnailSize, Thumbnailer};
use tracing::{debug, error, info, warn};

use crate::checksum::ChecksumVerifier;
use crate::session::{Registration, UploadSession};
use crate::store::{ChunkStore, final_key, remove_logged, thumbnail_key};
use crate::types::ChunkSubmission;
use crate::TransferError;

/// Accepts chunks into a [`ChunkStore`] and assembles completed sessions.
#[derive(Clone)]
pub struct AssemblyCoordinator {
    store: ChunkStore,
    verifier: ChecksumVerifier,
    thumbnailer: Arc<dyn Thumbnailer>,
    thumbnail_sizes: Arc<[ThumbnailSize]>,
}

impl AssemblyCoordinator {
    pub fn new(
        store: ChunkStore,
        verifier: ChecksumVerifier,
        thumbnailer: Arc<dyn Thumbnailer>,
        thumbnail_sizes: Vec<ThumbnailSize>,
    ) -> Self {
        let thumbnail_sizes: Vec<_> = thumbnail_sizes
            .into_iter()
            .filter(|size| {
                let valid = size.has_valid_tag();
                if !valid {
                    warn!(tag = %size.tag, "ignoring thumbnail size with unusable tag");
                }
                valid
            })
            .collect();
        Self {
            store,
            verifier,
            thumbnailer,
            thumbnail_sizes: thumbnail_sizes.into(),
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn verifier(&self) -> &ChecksumVerifier {
        &self.verifier
    }

    /// Verifies, stores and registers one chunk.
    ///
    /// A chunk whose checksum does not match is rejected whatever the
    /// session state, even when the session is already complete.
    ///
    /// `timeout` bounds only the chunk write; a write that times out leaves
    /// the session exactly as it was. The caller that completes the set
    /// waits for assembly and receives its outcome.
    pub async fn submit(
        &self,
        session: &Arc<UploadSession>,
        chunk: ChunkSubmission,
        timeout: Option<Duration>,
    ) -> Result<ChunkReceipt, TransferError> {
        let index = chunk.index;
        let sid = session.id();
        session.check_chunk(index, chunk.total_chunks, chunk.data.len())?;

        if !self.verifier.verify(&chunk.data, &chunk.checksum) {
            let actual = self.verifier.compute_digest(&chunk.data);
            warn!(session = sid, index, expected = %chunk.checksum, %actual, "chunk checksum mismatch");
            return Err(TransferError::ChecksumMismatch {
                index,
                expected: chunk.checksum,
                actual,
            });
        }

        match session.status() {
            UploadStatus::Cancelled => return Err(abandoned(sid)),
            status if status.is_complete() => {
                debug!(session = sid, index, "chunk for complete session acknowledged");
                return Ok(self.receipt(session, index));
            }
            _ => {}
        }

        let write = self.store.put(sid, index, &chunk.data);
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(session = sid, index, ?limit, "chunk write timed out");
                    return Err(TransferError::Timeout { index });
                }
            },
            None => write.await?,
        }

        match session.register_chunk(index) {
            Registration::Recorded { received } => {
                debug!(session = sid, index, received, "chunk registered");
                Ok(self.receipt(session, index))
            }
            Registration::NowComplete { received } => {
                info!(session = sid, index, received, "all chunks received, assembling");
                self.assemble(Arc::clone(session)).await?;
                Ok(self.receipt(session, index))
            }
            Registration::AlreadyComplete { status, .. } => {
                // The completing caller's purge may already have run.
                if status == UploadStatus::Completed {
                    self.store.remove(sid, index).await;
                }
                Ok(self.receipt(session, index))
            }
            Registration::Cancelled => {
                self.store.remove(sid, index).await;
                Err(abandoned(sid))
            }
        }
    }

    /// Manually re-runs assembly for a session whose chunks are all
    /// registered. A completed session returns its existing artifact.
    pub async fn retry(&self, session: &Arc<UploadSession>) -> Result<ArtifactInfo, TransferError> {
        if let Some(artifact) = session.artifact() {
            return Ok(artifact);
        }
        if !session.claim_assembly() {
            return Err(TransferError::NotReady(format!(
                "session {} has {}/{} chunks and status {:?}",
                session.id(),
                session.received_count(),
                session.expected_chunk_count(),
                session.status()
            )));
        }
        self.assemble(Arc::clone(session)).await
    }

    /// Runs assembly on its own task and waits for it.
    async fn assemble(&self, session: Arc<UploadSession>) -> Result<ArtifactInfo, TransferError> {
        let coordinator = self.clone();
        let sid = session.id().to_string();
        match tokio::spawn(async move { coordinator.run_assembly(&session).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(session = %sid, error = %e, "assembly task failed");
                Err(TransferError::Assembly(format!("assembly task failed: {e}")))
            }
        }
    }

    async fn run_assembly(&self, session: &UploadSession) -> Result<ArtifactInfo, TransferError> {
        let sid = session.id();
        let key = final_key(sid, session.filename());
        let backend = self.store.backend();

        let mut writer = match backend.begin_write(&key).await {
            Ok(w) => w,
            Err(e) => {
                session.fail_assembly(&e.to_string(), None);
                return Err(e.into());
            }
        };

        let mut digest = self.verifier.digester();
        let mut total: u64 = 0;
        for index in 0..session.expected_chunk_count() {
            if session.is_cancelled() {
                abort_logged(sid, writer).await;
                self.store.remove_all(sid).await;
                return Err(abandoned(sid));
            }

            let data = match self.store.read(sid, index).await {
                Ok(data) => data,
                Err(TransferError::NotFound(_)) => {
                    error!(session = sid, index, "registered chunk missing from storage");
                    let reason = format!("chunk {index} missing from storage");
                    return Err(rollback(session, writer, reason, Some(index)).await);
                }
                Err(e) => {
                    abort_logged(sid, writer).await;
                    session.fail_assembly(&e.to_string(), None);
                    return Err(e);
                }
            };

            if let Err(e) = writer.write(&data).await {
                abort_logged(sid, writer).await;
                session.fail_assembly(&e.to_string(), None);
                return Err(e.into());
            }
            digest.update(&data);
            total += data.len() as u64;
        }

        if total != session.declared_size() {
            error!(
                session = sid,
                declared = session.declared_size(),
                assembled = total,
                "assembled size mismatch"
            );
            let reason = format!(
                "size mismatch: declared {} bytes, assembled {total}",
                session.declared_size()
            );
            return Err(rollback(session, writer, reason, None).await);
        }

        if let Err(e) = writer.commit().await {
            session.fail_assembly(&e.to_string(), None);
            return Err(e.into());
        }
        let checksum = digest.finalize();

        let thumbnails = if session.wants_thumbnails() {
            self.derive_thumbnails(session, &key).await
        } else {
            BTreeMap::new()
        };

        let artifact = ArtifactInfo {
            session_id: sid.to_string(),
            key: key.clone(),
            filename: session.filename().to_string(),
            mime_type: session.mime_type().to_string(),
            size: total,
            checksum,
            thumbnails,
        };

        if !session.finish(artifact.clone()) {
            info!(session = sid, "session abandoned during assembly, discarding output");
            self.discard(&artifact).await;
            self.store.remove_all(sid).await;
            return Err(abandoned(sid));
        }

        let purged = self.store.remove_all(sid).await;
        info!(
            session = sid,
            size = artifact.size,
            checksum = %artifact.checksum,
            thumbnails = artifact.thumbnails.len(),
            purged,
            "assembly complete"
        );
        Ok(artifact)
    }

    /// Derives and stores thumbnails. Failures are logged and skipped.
    async fn derive_thumbnails(&self, session: &UploadSession, key: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if self.thumbnail_sizes.is_empty() {
            return out;
        }
        let sid = session.id();

        let image = match self.store.backend().read(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(session = sid, error = %e, "cannot read artifact for thumbnails");
                return out;
            }
        };

        let thumbnailer = Arc::clone(&self.thumbnailer);
        let sizes = Arc::clone(&self.thumbnail_sizes);
        let derived =
            match tokio::task::spawn_blocking(move || thumbnailer.derive(&image, &sizes)).await {
                Ok(Ok(derived)) => derived,
                Ok(Err(e)) => {
                    warn!(session = sid, error = %e, "thumbnail derivation skipped");
                    return out;
                }
                Err(e) => {
                    warn!(session = sid, error = %e, "thumbnail task failed");
                    return out;
                }
            };

        for (tag, bytes) in derived {
            let thumb_key = thumbnail_key(sid, &tag, session.filename());
            match self.store.backend().write_atomic(&thumb_key, &bytes).await {
                Ok(()) => {
                    out.insert(tag, thumb_key);
                }
                Err(e) => warn!(session = sid, %tag, error = %e, "failed to store thumbnail"),
            }
        }
        out
    }

    /// Deletes a published artifact and its thumbnails.
    pub async fn discard(&self, artifact: &ArtifactInfo) {
        let backend = self.store.backend().as_ref();
        remove_logged(backend, &artifact.key).await;
        for key in artifact.thumbnails.values() {
            remove_logged(backend, key).await;
        }
    }

    fn receipt(&self, session: &UploadSession, index: u32) -> ChunkReceipt {
        let snap = session.snapshot();
        ChunkReceipt {
            session_id: snap.session_id,
            index,
            total_chunks: snap.expected_chunk_count,
            accepted: true,
            is_complete: snap.is_complete,
            received_count: snap.received_count,
        }
    }
}

async fn rollback(
    session: &UploadSession,
    writer: Box<dyn AtomicWrite>,
    reason: String,
    missing: Option<u32>,
) -> TransferError {
    abort_logged(session.id(), writer).await;
    session.fail_assembly(&reason, missing);
    TransferError::Assembly(reason)
}

/// Discards a pending artifact write, logging failures.
async fn abort_logged(session_id: &str, writer: Box<dyn AtomicWrite>) {
    if let Err(e) = writer.abort().await {
        warn!(session = session_id, error = %e, "failed to discard partial artifact");
    }
}

fn abandoned(session_id: &str) -> TransferError {
    TransferError::NotFound(format!("session {session_id} was abandoned"))
}
