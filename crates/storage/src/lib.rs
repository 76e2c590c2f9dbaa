//! Storage backends for staged chunks and permanent artifacts.
//!
//! Every backend addresses opaque byte blobs by slash-separated keys
//! (`{session}/chunks/{index}`, `{session}/final/{name}`, ...). Writes are
//! all-or-nothing: a reader sees either the previous value or the new one,
//! never a partial file.

mod error;
mod filesystem;
mod key;
mod memory;

use std::future::Future;
use std::pin::Pin;

pub use error::StorageError;
pub use filesystem::{FilesystemBackend, is_temp_key};
pub use key::validate_key;
pub use memory::{FaultPlan, MemoryBackend};

/// A boxed future returned by backend methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// A key/byte-addressable store.
///
/// Methods return boxed futures so backends can be shared as
/// `Arc<dyn Backend>`.
pub trait Backend: Send + Sync + 'static {
    /// Replaces the value at `key` atomically.
    fn write_atomic<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StorageFuture<'a, ()>;

    /// Opens a streaming writer whose content becomes visible at `key`
    /// only on [`AtomicWrite::commit`].
    fn begin_write<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Box<dyn AtomicWrite>>;

    /// Reads the full value at `key`.
    fn read<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Vec<u8>>;

    /// Returns `true` if `key` holds a value.
    fn exists<'a>(&'a self, key: &'a str) -> StorageFuture<'a, bool>;

    /// Deletes `key`. Fails with [`StorageError::NotFound`] if absent.
    fn delete<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()>;

    /// Lists every entry below the directory-like `prefix`, sorted. An
    /// empty prefix lists the whole store.
    ///
    /// Leftovers of interrupted writes are included so that cleanup can
    /// reclaim them.
    fn list<'a>(&'a self, prefix: &'a str) -> StorageFuture<'a, Vec<String>>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// An in-progress atomic write.
pub trait AtomicWrite: Send {
    /// Appends bytes to the pending value.
    fn write<'a>(&'a mut self, data: &'a [u8]) -> StorageFuture<'a, ()>;

    /// Publishes the pending value and returns its length.
    fn commit(self: Box<Self>) -> StorageFuture<'static, u64>;

    /// Discards the pending value.
    fn abort(self: Box<Self>) -> StorageFuture<'static, ()>;
}
