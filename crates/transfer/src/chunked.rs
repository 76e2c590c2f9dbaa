use std::io::Read;
use std::path::Path;

use mediavault_storage::StorageError;

use crate::checksum::ChecksumVerifier;
use crate::types::Chunk;
use crate::{DEFAULT_CHUNK_SIZE, TransferError, expected_chunk_count};

/// Reads a file in fixed-size chunks with checksums attached.
///
/// A zero-byte file yields exactly one empty chunk so that the receiving
/// side always sees at least one submission.
pub struct ChunkReader<R = std::fs::File> {
    source: R,
    chunk_size: u64,
    size: u64,
    total_chunks: u32,
    next_index: u32,
    verifier: ChecksumVerifier,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn open(
        path: &Path,
        chunk_size: u64,
        verifier: ChecksumVerifier,
    ) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path).map_err(StorageError::from)?;
        let size = file
            .metadata()
            .map_err(StorageError::from)?
            .len();
        Self::new(file, size, chunk_size, verifier)
    }
}

impl<R: Read> ChunkReader<R> {
    /// Wraps any reader of exactly `size` bytes.
    pub fn new(
        source: R,
        size: u64,
        chunk_size: u64,
        verifier: ChecksumVerifier,
    ) -> Result<Self, TransferError> {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            source,
            chunk_size,
            size,
            total_chunks: expected_chunk_count(size, chunk_size)?,
            next_index: 0,
            verifier,
        })
    }

    /// Reads the next chunk. Returns `None` once every chunk was produced.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.next_index >= self.total_chunks {
            return Ok(None);
        }

        let offset = u64::from(self.next_index) * self.chunk_size;
        let want = self.size.saturating_sub(offset).min(self.chunk_size);
        let mut data = Vec::with_capacity(want as usize);
        (&mut self.source)
            .take(want)
            .read_to_end(&mut data)
            .map_err(StorageError::from)?;

        if (data.len() as u64) != want {
            return Err(TransferError::Protocol(format!(
                "source ended early at chunk {}: wanted {want} bytes, read {}",
                self.next_index,
                data.len()
            )));
        }

        let chunk = Chunk {
            index: self.next_index,
            total_chunks: self.total_chunks,
            checksum: self.verifier.compute_digest(&data),
            data,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn file_size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<Chunk, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// Splits an in-memory buffer into chunks.
pub fn split_bytes(
    data: &[u8],
    chunk_size: u64,
    verifier: ChecksumVerifier,
) -> Result<Vec<Chunk>, TransferError> {
    ChunkReader::new(data, data.len() as u64, chunk_size, verifier)?.collect()
}
