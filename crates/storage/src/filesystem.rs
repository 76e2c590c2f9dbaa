//! Local filesystem backend.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::{AtomicWrite, Backend, StorageError, StorageFuture, validate_key};

/// Suffix of temp file names (`.{uuid}.tmp`).
const TEMP_SUFFIX: &str = ".tmp";

/// Stores each key as a file below `root`.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Opens (and creates if needed) a backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Returns the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn open_temp(&self, key: &str) -> Result<(fs::File, PathBuf, PathBuf), StorageError> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Unique temp name so concurrent writers of the same key never collide.
        let temp_path = temp_path_for(&path);
        let file = fs::File::create(&temp_path).await?;
        Ok((file, temp_path, path))
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    // Fixed length whatever the final name is, so any name that fits the
    // filesystem also fits its temp file.
    path.with_file_name(format!(".{}{TEMP_SUFFIX}", Uuid::new_v4()))
}

/// Returns `true` if `key` names the temp file of an unfinished write.
pub fn is_temp_key(key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(TEMP_SUFFIX))
        .is_some_and(|id| Uuid::parse_str(id).is_ok())
}

impl Backend for FilesystemBackend {
    fn write_atomic<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let (mut file, temp_path, path) = self.open_temp(key).await?;

            let written = async {
                file.write_all(data).await?;
                file.sync_all().await?;
                fs::rename(&temp_path, &path).await
            }
            .await;

            if let Err(e) = written {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e.into());
            }

            debug!(key, size = data.len(), "filesystem write committed");
            Ok(())
        })
    }

    fn begin_write<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Box<dyn AtomicWrite>> {
        Box::pin(async move {
            let (file, temp_path, final_path) = self.open_temp(key).await?;
            Ok(Box::new(FilesystemWrite {
                file,
                temp_path,
                final_path,
                written: 0,
            }) as Box<dyn AtomicWrite>)
        })
    }

    fn read<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let path = self.key_path(key)?;
            fs::read(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Io(e)
                }
            })
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            let path = self.key_path(key)?;
            match fs::metadata(&path).await {
                Ok(meta) => Ok(meta.is_file()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let path = self.key_path(key)?;
            fs::remove_file(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Io(e)
                }
            })
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> StorageFuture<'a, Vec<String>> {
        Box::pin(async move {
            let prefix = prefix.trim_end_matches('/');
            let base = if prefix.is_empty() {
                self.root.clone()
            } else {
                self.key_path(prefix)?
            };
            let mut keys = Vec::new();

            // Iterative walk; async recursion would need boxing per level.
            let mut pending = vec![(base, prefix.to_string())];
            while let Some((dir, dir_key)) = pending.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => continue,
                    Err(e) => return Err(e.into()),
                };

                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let key = if dir_key.is_empty() {
                        name
                    } else {
                        format!("{dir_key}/{name}")
                    };
                    if entry.file_type().await?.is_dir() {
                        pending.push((entry.path(), key));
                    } else {
                        keys.push(key);
                    }
                }
            }

            keys.sort();
            Ok(keys)
        })
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

/// Streaming write into a temp file, renamed into place on commit.
struct FilesystemWrite {
    file: fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    written: u64,
}

impl AtomicWrite for FilesystemWrite {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.file.write_all(data).await?;
            self.written += data.len() as u64;
            Ok(())
        })
    }

    fn commit(mut self: Box<Self>) -> StorageFuture<'static, u64> {
        Box::pin(async move {
            let committed = async {
                self.file.flush().await?;
                self.file.sync_all().await?;
                fs::rename(&self.temp_path, &self.final_path).await
            }
            .await;

            if let Err(e) = committed {
                let _ = fs::remove_file(&self.temp_path).await;
                return Err(e.into());
            }
            Ok(self.written)
        })
    }

    fn abort(self: Box<Self>) -> StorageFuture<'static, ()> {
        Box::pin(async move {
            drop(self.file);
            match fs::remove_file(&self.temp_path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> (tempfile::TempDir, FilesystemBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().join("store")).await.unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn write_then_read() {
        let (_dir, b) = backend().await;
        b.write_atomic("s1/chunks/0", b"hello").await.unwrap();
        assert_eq!(b.read("s1/chunks/0").await.unwrap(), b"hello");
        assert!(b.exists("s1/chunks/0").await.unwrap());
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let (_dir, b) = backend().await;
        b.write_atomic("k/a", b"first value").await.unwrap();
        b.write_atomic("k/a", b"2nd").await.unwrap();
        assert_eq!(b.read("k/a").await.unwrap(), b"2nd");
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let (_dir, b) = backend().await;
        let err = b.read("nope/0").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!b.exists("nope/0").await.unwrap());
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let (_dir, b) = backend().await;
        let err = b.delete("nope/0").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn traversal_rejected() {
        let (_dir, b) = backend().await;
        let err = b.write_atomic("../escape", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn list_walks_nested_dirs_sorted() {
        let (_dir, b) = backend().await;
        b.write_atomic("s/chunks/1", b"b").await.unwrap();
        b.write_atomic("s/chunks/0", b"a").await.unwrap();
        b.write_atomic("s/final/out.bin", b"ab").await.unwrap();
        b.write_atomic("other/chunks/0", b"z").await.unwrap();

        let all = b.list("s").await.unwrap();
        assert_eq!(all, vec!["s/chunks/0", "s/chunks/1", "s/final/out.bin"]);

        let chunks = b.list("s/chunks/").await.unwrap();
        assert_eq!(chunks, vec!["s/chunks/0", "s/chunks/1"]);

        assert!(b.list("missing").await.unwrap().is_empty());
        assert_eq!(b.list("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn streaming_write_invisible_until_commit() {
        let (_dir, b) = backend().await;
        let mut w = b.begin_write("s/final/big.bin").await.unwrap();
        w.write(b"abc").await.unwrap();
        w.write(b"def").await.unwrap();
        assert!(!b.exists("s/final/big.bin").await.unwrap());

        assert_eq!(w.commit().await.unwrap(), 6);
        assert_eq!(b.read("s/final/big.bin").await.unwrap(), b"abcdef");
        // Temp file was renamed, not copied.
        assert_eq!(b.list("s/final").await.unwrap(), vec!["s/final/big.bin"]);
    }

    #[tokio::test]
    async fn aborted_write_leaves_nothing() {
        let (_dir, b) = backend().await;
        let mut w = b.begin_write("s/final/x.bin").await.unwrap();
        w.write(b"partial").await.unwrap();
        w.abort().await.unwrap();

        assert!(!b.exists("s/final/x.bin").await.unwrap());
        assert!(b.list("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn longest_segment_name_fits_with_its_temp_file() {
        let (_dir, b) = backend().await;
        let key = format!("s/final/{}", "n".repeat(255));

        let mut w = b.begin_write(&key).await.unwrap();
        w.write(b"data").await.unwrap();
        w.commit().await.unwrap();
        b.write_atomic(&key, b"again").await.unwrap();
        assert_eq!(b.read(&key).await.unwrap(), b"again");
    }

    #[test]
    fn temp_keys_recognised() {
        let temp = temp_path_for(Path::new("s/final/a.bin"));
        let key = temp.to_string_lossy().replace('\\', "/");
        assert!(is_temp_key(&key));
        assert!(key.starts_with("s/final/."));

        assert!(!is_temp_key("s/final/notes.tmp.txt"));
        assert!(!is_temp_key("s/final/.bashrc.tmp"));
        assert!(!is_temp_key("s/chunks/0"));
    }

    #[tokio::test]
    async fn concurrent_writes_same_key() {
        let (_dir, b) = backend().await;
        let b = std::sync::Arc::new(b);

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let b = std::sync::Arc::clone(&b);
            handles.push(tokio::spawn(async move {
                b.write_atomic("s/chunks/0", &[i; 64]).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Whole value from exactly one writer, never a mix.
        let data = b.read("s/chunks/0").await.unwrap();
        assert_eq!(data.len(), 64);
        assert!(data.iter().all(|&x| x == data[0]));
        assert_eq!(b.list("s").await.unwrap(), vec!["s/chunks/0"]);
    }
}
