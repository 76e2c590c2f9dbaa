use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use mediavault_protocol::{ArtifactInfo, MediaKind, SessionSnapshot, UploadStatus};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::validation::validate_filename;
use crate::{TransferError, expected_chunk_count, mime};

/// Outcome of recording a stored chunk against its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Index recorded; chunks are still outstanding.
    Recorded { received: u32 },
    /// This call completed the set. The caller owns assembly.
    NowComplete { received: u32 },
    /// The session was already complete; nothing was recorded.
    AlreadyComplete { received: u32, status: UploadStatus },
    /// The session was abandoned.
    Cancelled,
}

impl Registration {
    pub fn now_complete(&self) -> bool {
        matches!(self, Registration::NowComplete { .. })
    }
}

/// Bookkeeping for one chunked upload.
///
/// Identity and geometry are fixed at creation. Everything that changes
/// lives behind a single mutex that is never held across an `.await`.
pub struct UploadSession {
    id: String,
    owner: String,
    filename: String,
    mime_type: &'static str,
    media_kind: MediaKind,
    declared_size: u64,
    chunk_size: u64,
    expected_chunk_count: u32,
    thumbnails: bool,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

struct SessionState {
    status: UploadStatus,
    received: BTreeSet<u32>,
    artifact: Option<ArtifactInfo>,
    error: String,
    updated_at: DateTime<Utc>,
    last_activity: Instant,
}

impl UploadSession {
    /// Creates a pending session.
    ///
    /// `chunk_size` must be non-zero; callers substitute their default first.
    pub fn new(
        owner: &str,
        filename: &str,
        declared_size: u64,
        chunk_size: u64,
    ) -> Result<Self, TransferError> {
        validate_filename(filename)?;
        let expected_chunk_count = expected_chunk_count(declared_size, chunk_size)?;
        let (mime_type, media_kind) = mime::classify(filename);
        let now = Utc::now();

        Ok(Self {
            id: generate_session_id(owner, filename, declared_size),
            owner: owner.to_string(),
            filename: filename.to_string(),
            mime_type,
            media_kind,
            declared_size,
            chunk_size,
            expected_chunk_count,
            thumbnails: true,
            created_at: now,
            state: Mutex::new(SessionState {
                status: UploadStatus::Pending,
                received: BTreeSet::new(),
                artifact: None,
                error: String::new(),
                updated_at: now,
                last_activity: Instant::now(),
            }),
        })
    }

    /// Enables or disables thumbnail derivation for this upload.
    pub fn with_thumbnails(mut self, enabled: bool) -> Self {
        self.thumbnails = enabled;
        self
    }

    /// Whether assembly should derive thumbnails.
    pub fn wants_thumbnails(&self) -> bool {
        self.thumbnails && self.media_kind.is_image_like()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn media_kind(&self) -> MediaKind {
        self.media_kind
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn expected_chunk_count(&self) -> u32 {
        self.expected_chunk_count
    }

    /// Checks a submission against the session geometry. Touches no state.
    pub fn check_chunk(&self, index: u32, total_chunks: u32, len: usize) -> Result<(), TransferError> {
        if total_chunks != self.expected_chunk_count {
            return Err(TransferError::Protocol(format!(
                "chunk {index}: total_chunks {total_chunks} does not match expected {}",
                self.expected_chunk_count
            )));
        }
        if index >= self.expected_chunk_count {
            return Err(TransferError::Protocol(format!(
                "chunk {index}: index out of range (expected {} chunks)",
                self.expected_chunk_count
            )));
        }
        if len as u64 > self.chunk_size {
            return Err(TransferError::Protocol(format!(
                "chunk {index}: payload of {len} bytes exceeds chunk size {}",
                self.chunk_size
            )));
        }
        Ok(())
    }

    /// Records a stored chunk and evaluates the completion predicate.
    ///
    /// Exactly one caller observes [`Registration::NowComplete`]; the
    /// session moves to `Assembling` in the same critical section.
    pub fn register_chunk(&self, index: u32) -> Registration {
        let mut s = self.lock();
        match s.status {
            UploadStatus::Cancelled => return Registration::Cancelled,
            status if status.is_complete() => {
                return Registration::AlreadyComplete {
                    received: s.received.len() as u32,
                    status,
                };
            }
            _ => {}
        }

        s.received.insert(index);
        s.touch();
        let received = s.received.len() as u32;
        if received == self.expected_chunk_count {
            s.status = UploadStatus::Assembling;
            s.error.clear();
            Registration::NowComplete { received }
        } else {
            s.status = UploadStatus::InProgress;
            Registration::Recorded { received }
        }
    }

    /// Claims assembly for a session whose chunks are all present but that
    /// is not yet assembling (manual retry). Returns `true` if claimed.
    pub fn claim_assembly(&self) -> bool {
        let mut s = self.lock();
        if !s.status.accepts_chunks() || s.received.len() as u32 != self.expected_chunk_count {
            return false;
        }
        s.status = UploadStatus::Assembling;
        s.error.clear();
        s.touch();
        true
    }

    /// Rolls back a failed assembly so the session can complete again.
    ///
    /// `missing` drops an index whose chunk turned out not to be stored.
    pub fn fail_assembly(&self, reason: &str, missing: Option<u32>) {
        let mut s = self.lock();
        if s.status == UploadStatus::Cancelled {
            return;
        }
        if let Some(index) = missing {
            s.received.remove(&index);
        }
        s.status = UploadStatus::Failed;
        s.error = reason.to_string();
        s.touch();
    }

    /// Publishes the assembled artifact. Returns `false` if the session was
    /// abandoned meanwhile, in which case nothing is recorded.
    pub fn finish(&self, artifact: ArtifactInfo) -> bool {
        let mut s = self.lock();
        if s.status == UploadStatus::Cancelled {
            return false;
        }
        s.status = UploadStatus::Completed;
        s.artifact = Some(artifact);
        s.touch();
        true
    }

    /// Marks the session abandoned and returns the previous status.
    pub fn cancel(&self) -> UploadStatus {
        let mut s = self.lock();
        let previous = s.status;
        s.status = UploadStatus::Cancelled;
        s.touch();
        previous
    }

    pub fn status(&self) -> UploadStatus {
        self.lock().status
    }

    pub fn is_complete(&self) -> bool {
        self.status().is_complete()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == UploadStatus::Cancelled
    }

    pub fn received_count(&self) -> u32 {
        self.lock().received.len() as u32
    }

    /// The assembled artifact, once completed.
    pub fn artifact(&self) -> Option<ArtifactInfo> {
        self.lock().artifact.clone()
    }

    /// Time since the last state change.
    pub fn idle_for(&self) -> Duration {
        self.lock().last_activity.elapsed()
    }

    /// Returns a consistent point-in-time view.
    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.lock();
        SessionSnapshot {
            session_id: self.id.clone(),
            owner: self.owner.clone(),
            filename: self.filename.clone(),
            mime_type: self.mime_type.to_string(),
            media_kind: self.media_kind,
            status: s.status,
            declared_size: self.declared_size,
            chunk_size: self.chunk_size,
            expected_chunk_count: self.expected_chunk_count,
            received_count: s.received.len() as u32,
            is_complete: s.status.is_complete(),
            created_at: self.created_at.to_rfc3339(),
            updated_at: s.updated_at.to_rfc3339(),
            error: s.error.clone(),
        }
    }
}

impl SessionState {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.last_activity = Instant::now();
    }
}

/// Derives a 32-char hex session id.
///
/// Mixes the request identity with the clock and a random UUID so that
/// concurrent identical requests still get distinct ids.
pub fn generate_session_id(owner: &str, filename: &str, size: u64) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update([0u8]);
    hasher.update(filename.as_bytes());
    hasher.update([0u8]);
    hasher.update(size.to_le_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hex::encode(&hasher.finalize()[..16])
}
