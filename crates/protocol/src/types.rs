use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Current state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "assembling")]
    Assembling,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl UploadStatus {
    /// Returns `true` once the session has passed the completion predicate.
    ///
    /// An assembling session is already complete: no other caller may
    /// trigger assembly for it.
    pub fn is_complete(self) -> bool {
        matches!(self, UploadStatus::Assembling | UploadStatus::Completed)
    }

    /// Returns `true` if chunks may still be accepted.
    pub fn accepts_chunks(self) -> bool {
        matches!(
            self,
            UploadStatus::Pending | UploadStatus::InProgress | UploadStatus::Failed
        )
    }
}

/// Broad media category derived from a filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl MediaKind {
    /// Whether artifacts of this kind get thumbnails.
    pub fn is_image_like(self) -> bool {
        matches!(self, MediaKind::Image)
    }
}

/// Point-in-time view of an upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    pub filename: String,
    pub mime_type: String,
    pub media_kind: MediaKind,
    pub status: UploadStatus,
    pub declared_size: u64,
    pub chunk_size: u64,
    pub expected_chunk_count: u32,
    pub received_count: u32,
    pub is_complete: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl SessionSnapshot {
    /// Returns the share of received chunks as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.expected_chunk_count == 0 {
            return 0.0;
        }
        f64::from(self.received_count) / f64::from(self.expected_chunk_count) * 100.0
    }
}

/// Acknowledgement returned for every accepted chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub session_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub accepted: bool,
    pub is_complete: bool,
    pub received_count: u32,
}

/// A fully assembled file in permanent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub session_id: String,
    pub key: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub checksum: String,
    /// Size tag -> storage key of the derived thumbnail.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub thumbnails: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> SessionSnapshot {
        SessionSnapshot {
            session_id: "0123456789abcdef0123456789abcdef".into(),
            owner: "user-7".into(),
            filename: "holiday.png".into(),
            mime_type: "image/png".into(),
            media_kind: MediaKind::Image,
            status: UploadStatus::InProgress,
            declared_size: 2560,
            chunk_size: 1024,
            expected_chunk_count: 3,
            received_count: 1,
            is_complete: false,
            created_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:01Z".into(),
            error: String::new(),
        }
    }

    #[test]
    fn upload_status_serialization() {
        assert_eq!(
            serde_json::to_string(&UploadStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&UploadStatus::Assembling).unwrap(),
            "\"assembling\""
        );
    }

    #[test]
    fn assembling_counts_as_complete() {
        assert!(UploadStatus::Assembling.is_complete());
        assert!(UploadStatus::Completed.is_complete());
        assert!(!UploadStatus::Failed.is_complete());
        assert!(!UploadStatus::Cancelled.accepts_chunks());
        assert!(UploadStatus::Failed.accepts_chunks());
    }

    #[test]
    fn only_images_are_image_like() {
        assert!(MediaKind::Image.is_image_like());
        assert!(!MediaKind::Video.is_image_like());
        assert!(!MediaKind::Other.is_image_like());
    }

    #[test]
    fn snapshot_field_names() {
        let json = serde_json::to_value(sample_snapshot()).unwrap();
        assert_eq!(json["expectedChunkCount"], 3);
        assert_eq!(json["mediaKind"], "image");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn snapshot_percentage() {
        let s = sample_snapshot();
        assert!((s.percentage() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn artifact_omits_empty_thumbnails() {
        let a = ArtifactInfo {
            session_id: "s".into(),
            key: "s/final/a.bin".into(),
            filename: "a.bin".into(),
            mime_type: "application/octet-stream".into(),
            size: 3,
            checksum: "abc".into(),
            thumbnails: BTreeMap::new(),
        };
        let json = serde_json::to_string(&a).unwrap();
        assert!(!json.contains("thumbnails"));
    }
}
