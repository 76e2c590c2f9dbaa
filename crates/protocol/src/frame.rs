//! Binary chunk frames: 4-byte big-endian header length + JSON header + raw payload.

use serde::{Deserialize, Serialize};

/// Header carried in front of a binary chunk payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFrameHeader {
    pub session_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub checksum: String,
}

/// A parsed chunk frame.
#[derive(Debug)]
pub struct ChunkFrame {
    pub header: ChunkFrameHeader,
    pub data: Vec<u8>,
}

/// Parses a raw binary frame into a [`ChunkFrame`].
///
/// Wire format: `[4 bytes: header_len (big-endian)][header_len bytes: JSON][rest: payload]`
pub fn parse_chunk_frame(data: &[u8]) -> Result<ChunkFrame, FrameError> {
    let Some((len_bytes, rest)) = data.split_first_chunk::<4>() else {
        return Err(FrameError::TooShort);
    };
    let header_len = u32::from_be_bytes(*len_bytes) as usize;

    if rest.len() < header_len {
        return Err(FrameError::HeaderTruncated {
            expected: header_len,
            got: rest.len(),
        });
    }

    let (header_bytes, payload) = rest.split_at(header_len);
    let header: ChunkFrameHeader = serde_json::from_slice(header_bytes)
        .map_err(|e| FrameError::InvalidJson(e.to_string()))?;

    Ok(ChunkFrame {
        header,
        data: payload.to_vec(),
    })
}

/// Encodes a chunk frame for sending.
pub fn encode_chunk_frame(
    header: &ChunkFrameHeader,
    payload: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = header_json.len() as u32;

    let mut buf = Vec::with_capacity(4 + header_json.len() + payload.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Errors from frame parsing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short (need at least 4 bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(header: &[u8], payload: &[u8]) -> Vec<u8> {
        let len = header.len() as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(header);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn parse_chunk_frame_from_json_header() {
        let header = serde_json::to_vec(&serde_json::json!({
            "sessionId": "abc",
            "index": 4,
            "totalChunks": 9,
            "checksum": "d41d8cd98f00b204e9800998ecf8427e"
        }))
        .unwrap();
        let payload = b"binary data here";

        let frame = parse_chunk_frame(&make_frame(&header, payload)).unwrap();
        assert_eq!(frame.header.session_id, "abc");
        assert_eq!(frame.header.index, 4);
        assert_eq!(frame.header.total_chunks, 9);
        assert_eq!(frame.data, payload);
    }

    #[test]
    fn encoded_frame_parses_back() {
        let header = ChunkFrameHeader {
            session_id: "s".into(),
            index: 0,
            total_chunks: 1,
            checksum: "00".into(),
        };
        let buf = encode_chunk_frame(&header, b"xyz").unwrap();
        let frame = parse_chunk_frame(&buf).unwrap();
        assert_eq!(frame.header, header);
        assert_eq!(frame.data, b"xyz");
    }

    #[test]
    fn empty_payload_is_allowed() {
        let header = ChunkFrameHeader {
            session_id: "s".into(),
            index: 0,
            total_chunks: 1,
            checksum: String::new(),
        };
        let buf = encode_chunk_frame(&header, &[]).unwrap();
        assert!(parse_chunk_frame(&buf).unwrap().data.is_empty());
    }

    #[test]
    fn parse_too_short() {
        let result = parse_chunk_frame(&[0, 0, 0]);
        assert!(matches!(result, Err(FrameError::TooShort)));
    }

    #[test]
    fn parse_header_truncated() {
        // Header says 100 bytes but only 5 follow.
        let data = [0, 0, 0, 100, 1, 2, 3, 4, 5];
        let result = parse_chunk_frame(&data);
        assert!(matches!(
            result,
            Err(FrameError::HeaderTruncated {
                expected: 100,
                got: 5
            })
        ));
    }

    #[test]
    fn parse_invalid_json() {
        let result = parse_chunk_frame(&make_frame(b"not json", b""));
        assert!(matches!(result, Err(FrameError::InvalidJson(_))));
    }
}
