fn main() {
    println!("Run `cargo test -p scenarios` to execute the end-to-end upload scenarios.");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use mediavault_protocol::UploadStatus;
    use mediavault_resources::{ResourceConfig, ResourceManager};
    use mediavault_storage::{Backend, FaultPlan, FilesystemBackend, MemoryBackend};
    use mediavault_thumbnail::{ThumbnailError, ThumbnailSize, Thumbnailer};
    use mediavault_transfer::{ChunkSubmission, TransferError, split_bytes};
    use rand::seq::SliceRandom;

    /// Counts derivations and returns placeholder bytes per tag.
    #[derive(Default)]
    struct CountingThumbnailer {
        calls: AtomicUsize,
    }

    impl Thumbnailer for CountingThumbnailer {
        fn derive(
            &self,
            _image: &[u8],
            sizes: &[ThumbnailSize],
        ) -> Result<BTreeMap<String, Vec<u8>>, ThumbnailError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(sizes
                .iter()
                .map(|s| (s.tag.clone(), vec![0xff, 0xd8, 0xff]))
                .collect())
        }
    }

    fn submissions(mgr: &ResourceManager, sid: &str, data: &[u8], chunk_size: u64) -> Vec<ChunkSubmission> {
        split_bytes(data, chunk_size, *mgr.verifier())
            .unwrap()
            .into_iter()
            .map(|c| c.into_submission(sid))
            .collect()
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 251) as u8, (y % 241) as u8, 128])
        });
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn three_chunks_out_of_order_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(FilesystemBackend::new(tmp.path()).await.unwrap());
        let mgr = ResourceManager::new(backend.clone(), ResourceConfig::default());

        let mut data = pattern(1024, 1);
        data.extend(pattern(1024, 2));
        data.extend(pattern(512, 3));

        let sid = mgr.begin_upload("alice", "notes.bin", 2560, 1024).unwrap();
        let mut subs = submissions(&mgr, &sid, &data, 1024);
        assert_eq!(subs.iter().map(|s| s.data.len()).collect::<Vec<_>>(), vec![1024, 1024, 512]);

        let c1 = subs.remove(1);
        let c0 = subs.remove(0);
        let c2 = subs.remove(0);

        let r = mgr.submit_chunk(c2).await.unwrap();
        assert!(r.accepted && !r.is_complete);
        assert!(matches!(mgr.get_artifact(&sid), Err(TransferError::NotReady(_))));
        mgr.submit_chunk(c0).await.unwrap();
        let r = mgr.submit_chunk(c1).await.unwrap();
        assert!(r.is_complete);
        assert_eq!(r.received_count, 3);

        let artifact = mgr.get_artifact(&sid).unwrap();
        assert_eq!(artifact.size, 2560);
        assert_eq!(artifact.checksum, mgr.verifier().compute_digest(&data));
        assert_eq!(mgr.read_artifact(&sid).await.unwrap(), data);

        // Only the final artifact remains on disk.
        assert_eq!(backend.list("").await.unwrap(), vec![artifact.key]);
    }

    #[tokio::test]
    async fn any_submission_order_yields_the_same_bytes() {
        let mut rng = rand::thread_rng();
        let data = pattern(7 * 333 + 100, 9);

        for _ in 0..20 {
            let mgr = ResourceManager::new(Arc::new(MemoryBackend::new()), ResourceConfig::default());
            let sid = mgr.begin_upload("u", "perm.dat", data.len() as u64, 333).unwrap();
            let mut subs = submissions(&mgr, &sid, &data, 333);
            subs.shuffle(&mut rng);

            for sub in subs {
                mgr.submit_chunk(sub).await.unwrap();
            }
            assert_eq!(mgr.read_artifact(&sid).await.unwrap(), data);
        }
    }

    #[tokio::test]
    async fn resubmission_is_idempotent() {
        let thumbs = Arc::new(CountingThumbnailer::default());
        let mgr = ResourceManager::with_thumbnailer(
            Arc::new(MemoryBackend::new()),
            ResourceConfig::default(),
            thumbs.clone(),
        );
        let data = pattern(300, 4);
        let sid = mgr.begin_upload("u", "pic.jpg", 300, 100).unwrap();
        let subs = submissions(&mgr, &sid, &data, 100);

        mgr.submit_chunk(subs[0].clone()).await.unwrap();
        let again = mgr.submit_chunk(subs[0].clone()).await.unwrap();
        assert_eq!(again.received_count, 1);

        for sub in &subs[1..] {
            mgr.submit_chunk(sub.clone()).await.unwrap();
        }
        let first = mgr.get_artifact(&sid).unwrap();

        // Late duplicates after completion change nothing.
        let late = mgr.submit_chunk(subs[2].clone()).await.unwrap();
        assert!(late.is_complete);
        assert_eq!(mgr.get_artifact(&sid).unwrap(), first);
        assert_eq!(thumbs.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_final_chunks_assemble_once() {
        for _ in 0..10 {
            let backend = Arc::new(MemoryBackend::new());
            let thumbs = Arc::new(CountingThumbnailer::default());
            let mgr = Arc::new(ResourceManager::with_thumbnailer(
                backend.clone(),
                ResourceConfig::default(),
                thumbs.clone(),
            ));
            let data = pattern(4 * 256, 7);
            let sid = mgr.begin_upload("u", "race.png", data.len() as u64, 256).unwrap();
            let mut subs = submissions(&mgr, &sid, &data, 256);

            for sub in subs.drain(..2) {
                mgr.submit_chunk(sub).await.unwrap();
            }

            // Slow writes widen the window in which both finals are in flight.
            backend.set_faults(FaultPlan {
                write_delay: Some(Duration::from_millis(5)),
                ..FaultPlan::default()
            });
            let handles: Vec<_> = subs
                .into_iter()
                .map(|sub| {
                    let mgr = Arc::clone(&mgr);
                    tokio::spawn(async move { mgr.submit_chunk(sub).await })
                })
                .collect();
            let mut completions = 0;
            for handle in handles {
                if handle.await.unwrap().unwrap().is_complete {
                    completions += 1;
                }
            }
            assert!(completions >= 1);

            assert_eq!(thumbs.calls.load(Ordering::SeqCst), 1);
            let artifact = mgr.get_artifact(&sid).unwrap();
            assert_eq!(artifact.thumbnails.len(), 3);
            // Final artifact plus three thumbnails, no staged chunks.
            assert_eq!(backend.len(), 4);
            assert_eq!(mgr.read_artifact(&sid).await.unwrap(), data);
        }
    }

    #[tokio::test]
    async fn bad_checksum_rejected_then_accepted() {
        let mgr = ResourceManager::new(Arc::new(MemoryBackend::new()), ResourceConfig::default());
        let sid = mgr.begin_upload("u", "a.txt", 8, 4).unwrap();
        let subs = submissions(&mgr, &sid, b"abcdefgh", 4);

        let mut forged = subs[1].clone();
        forged.checksum = "0".repeat(32);
        let err = mgr.submit_chunk(forged).await.unwrap_err();
        assert!(matches!(err, TransferError::ChecksumMismatch { index: 1, .. }));
        assert!(err.is_retryable());
        assert_eq!(mgr.session_snapshot(&sid).unwrap().received_count, 0);

        mgr.submit_chunk(subs[1].clone()).await.unwrap();
        let r = mgr.submit_chunk(subs[0].clone()).await.unwrap();
        assert!(r.is_complete);
        assert_eq!(mgr.read_artifact(&sid).await.unwrap(), b"abcdefgh");
    }

    #[tokio::test]
    async fn conflicting_total_chunks_rejected() {
        let mgr = ResourceManager::new(Arc::new(MemoryBackend::new()), ResourceConfig::default());
        let sid = mgr.begin_upload("u", "a.txt", 12, 4).unwrap();
        let subs = submissions(&mgr, &sid, b"abcdefghijkl", 4);

        mgr.submit_chunk(subs[0].clone()).await.unwrap();
        let mut wrong = subs[1].clone();
        wrong.total_chunks = 4;
        let err = mgr.submit_chunk(wrong).await.unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
        assert!(!err.is_retryable());
        assert_eq!(mgr.session_snapshot(&sid).unwrap().received_count, 1);
    }

    #[tokio::test]
    async fn image_upload_gets_bounded_thumbnails() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(FilesystemBackend::new(tmp.path()).await.unwrap());
        let mgr = ResourceManager::new(backend, ResourceConfig::default());

        let img = png(640, 360);
        let sid = mgr.begin_upload("u", "landscape.png", img.len() as u64, 4096).unwrap();
        let mut subs = submissions(&mgr, &sid, &img, 4096);
        subs.reverse();
        for sub in subs {
            mgr.submit_chunk(sub).await.unwrap();
        }

        let artifact = mgr.get_artifact(&sid).unwrap();
        assert_eq!(
            artifact.thumbnails.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["large", "medium", "small"]
        );
        for size in mediavault_thumbnail::default_sizes() {
            let bytes = mgr.read_thumbnail(&sid, &size.tag).await.unwrap();
            let thumb = image::load_from_memory(&bytes).unwrap();
            assert!(thumb.width() <= size.width && thumb.height() <= size.height);
            // 16:9 within a pixel of rounding.
            let expected_h = thumb.width() * 9 / 16;
            assert!(thumb.height().abs_diff(expected_h) <= 1, "{}: {}x{}", size.tag, thumb.width(), thumb.height());
        }
    }

    #[tokio::test]
    async fn abandon_discards_partial_upload() {
        let backend = Arc::new(MemoryBackend::new());
        let mgr = ResourceManager::new(backend.clone(), ResourceConfig::default());
        let sid = mgr.begin_upload("u", "clip.mp4", 30, 10).unwrap();
        let subs = submissions(&mgr, &sid, &pattern(30, 5), 10);

        mgr.submit_chunk(subs[0].clone()).await.unwrap();
        assert!(!backend.is_empty());

        mgr.abandon(&sid).await.unwrap();
        assert!(backend.is_empty());
        assert!(matches!(mgr.get_artifact(&sid), Err(TransferError::NotFound(_))));
        assert!(matches!(
            mgr.submit_chunk(subs[1].clone()).await,
            Err(TransferError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_cleanup_does_not_fail_the_upload() {
        let backend = Arc::new(MemoryBackend::new());
        let mgr = ResourceManager::new(backend.clone(), ResourceConfig::default());
        let sid = mgr.begin_upload("u", "doc.pdf", 20, 10).unwrap();
        let subs = submissions(&mgr, &sid, &pattern(20, 6), 10);

        backend.set_faults(FaultPlan {
            fail_deletes: true,
            ..FaultPlan::default()
        });
        for sub in subs {
            mgr.submit_chunk(sub).await.unwrap();
        }

        let snap = mgr.session_snapshot(&sid).unwrap();
        assert_eq!(snap.status, UploadStatus::Completed);
        // Staged chunks linger next to the artifact until a later purge.
        assert_eq!(backend.len(), 3);

        backend.clear_faults();
        assert_eq!(mgr.purge_staging().await, 2);
        assert_eq!(mgr.read_artifact(&sid).await.unwrap(), pattern(20, 6));
    }
}
