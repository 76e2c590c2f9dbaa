//! Wire types shared between the upload engine and the request layers
//! that wrap it.

pub mod frame;
pub mod messages;
pub mod types;

pub use frame::{ChunkFrame, ChunkFrameHeader, FrameError, encode_chunk_frame, parse_chunk_frame};
pub use types::{ArtifactInfo, ChunkReceipt, MediaKind, SessionSnapshot, UploadStatus};
