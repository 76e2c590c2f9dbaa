//! Chunk verification, staging and exactly-once assembly.
//!
//! A file arrives as indexed chunks in any order, any number of times.
//! Each chunk is checksum-verified and staged; once every index is
//! present the [`AssemblyCoordinator`] concatenates them in index order
//! into one permanent artifact and purges the staged bytes.

pub mod assembly;
pub mod checksum;
mod chunked;
mod error;
pub mod mime;
pub mod session;
pub mod store;
mod types;
mod validation;

pub use assembly::AssemblyCoordinator;
pub use checksum::{ChecksumVerifier, DigestAlgorithm, Digester};
pub use chunked::{ChunkReader, split_bytes};
pub use error::TransferError;
pub use session::{Registration, UploadSession};
pub use store::ChunkStore;
pub use types::{Chunk, ChunkSubmission};
pub use validation::{MAX_FILENAME_LEN, validate_filename};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Number of chunks a file of `declared_size` bytes splits into.
///
/// A zero-byte file still travels as one (empty) chunk.
pub fn expected_chunk_count(declared_size: u64, chunk_size: u64) -> Result<u32, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::Protocol("chunk size must be positive".into()));
    }
    let count = declared_size.div_ceil(chunk_size).max(1);
    u32::try_from(count).map_err(|_| {
        TransferError::Protocol(format!(
            "{declared_size} bytes in {chunk_size}-byte chunks needs too many chunks"
        ))
    })
}
