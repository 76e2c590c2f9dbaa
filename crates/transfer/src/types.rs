use mediavault_protocol::ChunkFrame;
use mediavault_protocol::messages::SubmitChunkRequest;

/// A chunk produced by [`ChunkReader`](crate::ChunkReader), not yet bound
/// to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position within the file.
    pub index: u32,
    /// Number of chunks the file splits into.
    pub total_chunks: u32,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// Hex digest of `data`.
    pub checksum: String,
}

impl Chunk {
    /// Attaches the chunk to an upload session.
    pub fn into_submission(self, session_id: impl Into<String>) -> ChunkSubmission {
        ChunkSubmission {
            session_id: session_id.into(),
            index: self.index,
            total_chunks: self.total_chunks,
            data: self.data,
            checksum: self.checksum,
        }
    }
}

/// One client submission of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSubmission {
    pub session_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub data: Vec<u8>,
    /// Declared hex digest of `data`.
    pub checksum: String,
}

impl From<SubmitChunkRequest> for ChunkSubmission {
    fn from(req: SubmitChunkRequest) -> Self {
        Self {
            session_id: req.session_id,
            index: req.index,
            total_chunks: req.total_chunks,
            data: req.data,
            checksum: req.checksum,
        }
    }
}

impl From<ChunkFrame> for ChunkSubmission {
    fn from(frame: ChunkFrame) -> Self {
        Self {
            session_id: frame.header.session_id,
            index: frame.header.index,
            total_chunks: frame.header.total_chunks,
            data: frame.data,
            checksum: frame.header.checksum,
        }
    }
}
