use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a new upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginUploadRequest {
    pub filename: String,
    pub declared_size: u64,
    /// Nominal chunk size; 0 lets the server pick its default.
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub chunk_size: u64,
}

/// Sends one chunk of upload data.
///
/// The `data` field is base64-encoded in JSON. Request layers that can
/// carry raw bytes should use [`crate::frame`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitChunkRequest {
    pub session_id: String,
    pub index: u32,
    pub total_chunks: u32,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub checksum: String,
}

/// Drops an upload and everything staged for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbandonUploadRequest {
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Session parameters the client needs to split its file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginUploadResponse {
    pub session_id: String,
    pub chunk_size: u64,
    pub expected_chunk_count: u32,
    pub digest: String,
}

/// Error body for a failed chunk submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkErrorResponse {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub message: String,
    pub retryable: bool,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_chunk_data_is_base64() {
        let req = SubmitChunkRequest {
            session_id: "s1".into(),
            index: 2,
            total_chunks: 3,
            data: b"Hello".to_vec(),
            checksum: "8b1a9953c4611296a827abf8c47804d7".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["data"], "SGVsbG8=");
        assert_eq!(json["totalChunks"], 3);

        let parsed: SubmitChunkRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn submit_chunk_rejects_bad_base64() {
        let json = r#"{"sessionId":"s","index":0,"totalChunks":1,"data":"@@@","checksum":""}"#;
        assert!(serde_json::from_str::<SubmitChunkRequest>(json).is_err());
    }

    #[test]
    fn begin_upload_chunk_size_optional() {
        let req: BeginUploadRequest =
            serde_json::from_str(r#"{"filename":"a.bin","declaredSize":10}"#).unwrap();
        assert_eq!(req.chunk_size, 0);

        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("chunkSize"));
    }

    #[test]
    fn chunk_error_omits_missing_index() {
        let resp = ChunkErrorResponse {
            session_id: "s".into(),
            index: None,
            message: "unknown session".into(),
            retryable: false,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("index"));
    }
}
