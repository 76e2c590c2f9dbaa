//! Command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use futures_util::StreamExt;
use futures_util::stream;
use mediavault_protocol::ArtifactInfo;
use mediavault_resources::ResourceManager;
use mediavault_storage::{Backend, FilesystemBackend, is_temp_key};
use mediavault_transfer::{Chunk, ChunkReader, TransferError};
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::janitor;

/// Owner recorded on sessions created from the command line.
const LOCAL_OWNER: &str = "local";

/// Uploads each file through the chunked path and prints its artifact.
///
/// Chunks are submitted in random order, `concurrency` at a time, which
/// exercises the same path remote clients take.
pub async fn ingest(
    config: Config,
    files: Vec<PathBuf>,
    chunk_size: Option<u64>,
    concurrency: usize,
) -> anyhow::Result<()> {
    let backend = Arc::new(FilesystemBackend::new(&config.storage_root).await?);
    let manager = Arc::new(ResourceManager::new(backend, config.resources.clone()));

    let cancel = CancellationToken::new();
    let janitor = tokio::spawn(janitor::run(
        Arc::clone(&manager),
        config.sweep_interval(),
        config.max_idle(),
        cancel.clone(),
    ));

    let result = async {
        for path in &files {
            tokio::select! {
                artifact = ingest_one(&manager, path, chunk_size, concurrency) => {
                    let artifact = artifact.with_context(|| format!("ingesting {}", path.display()))?;
                    println!("{}", serde_json::to_string_pretty(&artifact)?);
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("interrupted, abandoning in-flight uploads");
                    for snapshot in manager.sessions() {
                        if !snapshot.is_complete {
                            let _ = manager.abandon(&snapshot.session_id).await;
                        }
                    }
                    bail!("interrupted");
                }
            }
        }
        Ok(())
    }
    .await;

    cancel.cancel();
    let _ = janitor.await;
    result
}

async fn ingest_one(
    manager: &ResourceManager,
    path: &Path,
    chunk_size: Option<u64>,
    concurrency: usize,
) -> anyhow::Result<ArtifactInfo> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("no usable file name in {}", path.display()))?
        .to_string();
    let size = tokio::fs::metadata(path).await?.len();

    let session_id = manager.begin_upload(LOCAL_OWNER, &filename, size, chunk_size.unwrap_or(0))?;
    let snapshot = manager.session_snapshot(&session_id)?;
    tracing::info!(
        session = %session_id,
        file = %path.display(),
        size,
        chunks = snapshot.expected_chunk_count,
        "ingest started"
    );

    let verifier = *manager.verifier();
    let owned_path = path.to_path_buf();
    let mut chunks = tokio::task::spawn_blocking(move || -> Result<Vec<Chunk>, TransferError> {
        ChunkReader::open(&owned_path, snapshot.chunk_size, verifier)?.collect()
    })
    .await??;
    chunks.shuffle(&mut rand::thread_rng());

    let mut results = stream::iter(chunks)
        .map(|chunk| manager.submit_chunk(chunk.into_submission(session_id.clone())))
        .buffer_unordered(concurrency.max(1));

    while let Some(result) = results.next().await {
        let receipt = result?;
        tracing::debug!(
            index = receipt.index,
            received = receipt.received_count,
            total = receipt.total_chunks,
            "chunk accepted"
        );
    }

    Ok(manager.get_artifact(&session_id)?)
}

/// Copies an assembled artifact (or one of its thumbnails) out of storage.
pub async fn fetch(
    config: Config,
    session_id: &str,
    out: &Path,
    thumbnail: Option<&str>,
) -> anyhow::Result<()> {
    let backend = FilesystemBackend::new(&config.storage_root).await?;

    let dir = match thumbnail {
        Some(_) => format!("{session_id}/thumbnails"),
        None => format!("{session_id}/final"),
    };
    let keys = backend.list(&dir).await?;
    let key = match thumbnail {
        Some(tag) => {
            let prefix = format!("{dir}/{tag}_");
            keys.into_iter().find(|k| k.starts_with(&prefix) && !is_temp_key(k))
        }
        None => keys.into_iter().find(|k| !is_temp_key(k)),
    };
    let Some(key) = key else {
        bail!("nothing stored under {dir}");
    };

    let data = backend.read(&key).await?;
    tokio::fs::write(out, &data).await?;
    tracing::info!(%key, out = %out.display(), size = data.len(), "artifact fetched");
    Ok(())
}

/// Deletes staged chunks left behind by interrupted runs.
pub async fn sweep(config: Config) -> anyhow::Result<()> {
    let backend = Arc::new(FilesystemBackend::new(&config.storage_root).await?);
    let manager = ResourceManager::new(backend, config.resources);
    let removed = manager.purge_staging().await;
    println!("removed {removed} staged chunk file(s)");
    Ok(())
}
