//! In-memory backend with optional fault injection.
//!
//! Used by tests and by embedders that do not need durability. Faults are
//! configured at runtime so a test can flip a backend into a failing
//! state halfway through a scenario.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use crate::{AtomicWrite, Backend, StorageError, StorageFuture, validate_key};

/// Failures to inject into a [`MemoryBackend`].
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Writes to keys starting with this prefix fail with an I/O error.
    pub fail_writes_under: Option<String>,
    /// Reads of keys starting with this prefix fail with an I/O error.
    pub fail_reads_under: Option<String>,
    /// Every delete fails with an I/O error.
    pub fail_deletes: bool,
    /// Every write sleeps this long before taking effect.
    pub write_delay: Option<Duration>,
}

/// Stores values in a sorted map.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    faults: Mutex<FaultPlan>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active fault plan.
    pub fn set_faults(&self, plan: FaultPlan) {
        *lock(&self.inner.faults) = plan;
    }

    /// Clears all injected faults.
    pub fn clear_faults(&self) {
        self.set_faults(FaultPlan::default());
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.inner
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn faults(&self) -> FaultPlan {
        lock(&self.faults).clone()
    }

    fn put(&self, key: &str, data: Vec<u8>) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), data);
    }

    async fn check_write(&self, key: &str) -> Result<(), StorageError> {
        let plan = self.faults();
        if let Some(delay) = plan.write_delay {
            tokio::time::sleep(delay).await;
        }
        if plan
            .fail_writes_under
            .as_deref()
            .is_some_and(|p| key.starts_with(p))
        {
            return Err(injected("write", key));
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn injected(op: &str, key: &str) -> StorageError {
    StorageError::Io(std::io::Error::other(format!(
        "injected {op} failure: {key}"
    )))
}

impl Backend for MemoryBackend {
    fn write_atomic<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            validate_key(key)?;
            self.inner.check_write(key).await?;
            self.inner.put(key, data.to_vec());
            Ok(())
        })
    }

    fn begin_write<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Box<dyn AtomicWrite>> {
        Box::pin(async move {
            validate_key(key)?;
            Ok(Box::new(MemoryWrite {
                inner: Arc::clone(&self.inner),
                key: key.to_string(),
                buf: Vec::new(),
            }) as Box<dyn AtomicWrite>)
        })
    }

    fn read<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Vec<u8>> {
        Box::pin(async move {
            validate_key(key)?;
            if self
                .inner
                .faults()
                .fail_reads_under
                .as_deref()
                .is_some_and(|p| key.starts_with(p))
            {
                return Err(injected("read", key));
            }
            self.inner
                .objects
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            validate_key(key)?;
            Ok(self
                .inner
                .objects
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(key))
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            validate_key(key)?;
            if self.inner.faults().fail_deletes {
                return Err(injected("delete", key));
            }
            self.inner
                .objects
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> StorageFuture<'a, Vec<String>> {
        Box::pin(async move {
            let prefix = prefix.trim_end_matches('/');
            let objects = self
                .inner
                .objects
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if prefix.is_empty() {
                return Ok(objects.keys().cloned().collect());
            }
            let dir = format!("{prefix}/");
            Ok(objects
                .range(dir.clone()..)
                .take_while(|(k, _)| k.starts_with(&dir))
                .map(|(k, _)| k.clone())
                .collect())
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Buffers bytes and inserts them on commit.
struct MemoryWrite {
    inner: Arc<Inner>,
    key: String,
    buf: Vec<u8>,
}

impl AtomicWrite for MemoryWrite {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.buf.extend_from_slice(data);
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StorageFuture<'static, u64> {
        Box::pin(async move {
            self.inner.check_write(&self.key).await?;
            let len = self.buf.len() as u64;
            self.inner.put(&self.key, self.buf);
            Ok(len)
        })
    }

    fn abort(self: Box<Self>) -> StorageFuture<'static, ()> {
        Box::pin(async move {
            drop(self);
            Ok(())
        })
    }
}
