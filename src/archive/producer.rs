use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncWrite};

use crate::cloud::store::{ObjectReader, ObjectStore};
use crate::constants::STREAMING_BUFFER_SIZE;
use crate::errors::{ArchivePhase, StoreError, TransferError};
use crate::models::{ArchiveSummary, ObjectDescriptor};
use crate::utils::streaming_zip::{
    CompressionMethod, CountingWriter, FileOptions, StreamingZipWriter, ZIP32_LIMIT,
};

/// Path of `key` inside the archive.
///
/// When `source_prefix` is non-empty and `key` starts with it, the prefix and
/// then one leading `/` are removed. Any other key is used unchanged, as is a
/// key that would otherwise flatten to an empty name.
pub fn entry_name<'a>(key: &'a str, source_prefix: &str) -> &'a str {
    if source_prefix.is_empty() {
        return key;
    }

    match key.strip_prefix(source_prefix) {
        Some(rest) => {
            let rest = rest.strip_prefix('/').unwrap_or(rest);
            if rest.is_empty() {
                key
            } else {
                rest
            }
        }
        None => key,
    }
}

/// Deflate can grow incompressible input slightly, so sizes close to the limit
/// count as large too.
fn may_need_zip64(size: u64) -> bool {
    size.saturating_add(size / 1024) >= ZIP32_LIMIT
}

/// Writes the objects of one bucket into a ZIP stream.
pub struct ArchiveProducer {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    compression: CompressionMethod,
    progress: Arc<AtomicU64>,
}

impl ArchiveProducer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        compression: CompressionMethod,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            compression,
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count copied source bytes into `counter` instead of a private one.
    pub fn with_progress(mut self, counter: Arc<AtomicU64>) -> Self {
        self.progress = counter;
        self
    }

    /// Source bytes copied so far
    pub fn progress(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.progress)
    }

    /// Write every object in `objects` as one archive entry, in order, then
    /// finalize the archive.
    ///
    /// The first failure stops the run; nothing after the failing object is
    /// opened. The sink is flushed but never shut down, so the caller decides
    /// how to close it.
    pub async fn produce<W: AsyncWrite + Unpin>(
        &self,
        sink: &mut W,
        objects: &[ObjectDescriptor],
        source_prefix: &str,
    ) -> Result<ArchiveSummary, TransferError> {
        let mut counted = CountingWriter::new(sink);
        let mut zip = StreamingZipWriter::new(&mut counted);
        let mut buffer = vec![0u8; STREAMING_BUFFER_SIZE];
        let mut summary = ArchiveSummary::default();

        for object in objects {
            let name = entry_name(&object.key, source_prefix);

            let mut source = self
                .store
                .open_read(&self.bucket, &object.key)
                .await
                .map_err(|source| TransferError::SourceReadFailed {
                    key: object.key.clone(),
                    source,
                })?;

            let copied = self
                .write_entry(&mut zip, name, object, &mut source, &mut buffer)
                .await;
            drop(source);

            summary.source_bytes += copied?;
            summary.entries += 1;
        }

        zip.finish()
            .await
            .map_err(|source| TransferError::ArchiveWriteFailed {
                phase: ArchivePhase::Finalize,
                source,
            })?;

        summary.archive_bytes = counted.bytes_written();
        info!(
            "Archived {} objects ({} source bytes, {} archive bytes)",
            summary.entries, summary.source_bytes, summary.archive_bytes
        );
        Ok(summary)
    }

    async fn write_entry<W: AsyncWrite + Unpin>(
        &self,
        zip: &mut StreamingZipWriter<W>,
        name: &str,
        object: &ObjectDescriptor,
        source: &mut ObjectReader,
        buffer: &mut [u8],
    ) -> Result<u64, TransferError> {
        let write_failed = |source: io::Error| TransferError::ArchiveWriteFailed {
            phase: ArchivePhase::Entry(name.to_string()),
            source,
        };

        let compression_method = if object.size == 0 {
            CompressionMethod::Stored
        } else {
            self.compression
        };
        let options = FileOptions {
            compression_method,
            last_modified: Some(SystemTime::now()),
            large_file: may_need_zip64(object.size),
        };

        let mut entry = zip.start_file(name, options).await.map_err(write_failed)?;

        loop {
            let n = source
                .read(buffer)
                .await
                .map_err(|e| TransferError::SourceReadFailed {
                    key: object.key.clone(),
                    source: StoreError::Stream(e),
                })?;
            if n == 0 {
                break;
            }

            entry.write_all(&buffer[..n]).await.map_err(write_failed)?;
            self.progress.fetch_add(n as u64, Ordering::Relaxed);
        }

        let copied = entry.uncompressed_size();
        entry.finish().await.map_err(write_failed)?;

        debug!("Added {} as {} ({} bytes)", object.key, name, copied);
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryObjectStore;
    use proptest::prelude::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts `limit` bytes, then fails every write.
    struct LimitedSink {
        limit: usize,
        written: usize,
    }

    impl LimitedSink {
        fn new(limit: usize) -> Self {
            Self { limit, written: 0 }
        }
    }

    impl AsyncWrite for LimitedSink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let room = self.limit - self.written;
            if room == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "sink full")));
            }
            let n = room.min(buf.len());
            self.written += n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn stored_producer() -> ArchiveProducer {
        let store = MemoryObjectStore::new().with_object("src", "a", &b"hello"[..]);
        ArchiveProducer::new(Arc::new(store), "src", CompressionMethod::Stored)
    }

    fn producer(store: MemoryObjectStore) -> (Arc<MemoryObjectStore>, ArchiveProducer) {
        let store = Arc::new(store);
        let producer = ArchiveProducer::new(store.clone(), "src", CompressionMethod::Deflated);
        (store, producer)
    }

    #[test]
    fn test_entry_name_strips_prefix_and_separator() {
        assert_eq!(entry_name("a/b/c/file.txt", "a/b/"), "c/file.txt");
        assert_eq!(entry_name("a/b/c/file.txt", "a/b"), "c/file.txt");
        assert_eq!(entry_name("x/file.txt", "a/b/"), "x/file.txt");
        assert_eq!(entry_name("/abs/file.txt", ""), "/abs/file.txt");
        assert_eq!(entry_name("a/b/", "a/b/"), "a/b/");
    }

    proptest! {
        #[test]
        fn prop_entry_name_is_suffix_of_key(key in "[a-z/]{0,24}", prefix in "[a-z/]{0,8}") {
            let name = entry_name(&key, &prefix);
            prop_assert!(key.ends_with(name));
            if !prefix.is_empty() && key.starts_with(&prefix) && name != key {
                prop_assert!(!name.is_empty());
                prop_assert!(name.len() <= key.len() - prefix.len());
            }
        }
    }

    #[tokio::test]
    async fn test_produce_counts_entries_and_bytes() {
        let (_store, producer) = producer(
            MemoryObjectStore::new()
                .with_object("src", "p/one.txt", &b"first"[..])
                .with_object("src", "p/two.txt", &b"second!"[..]),
        );
        let objects = vec![
            ObjectDescriptor::new("p/one.txt", 5),
            ObjectDescriptor::new("p/two.txt", 7),
        ];

        let mut sink = Vec::new();
        let summary = producer.produce(&mut sink, &objects, "p/").await.unwrap();

        assert_eq!(summary.entries, 2);
        assert_eq!(summary.source_bytes, 12);
        assert_eq!(summary.archive_bytes, sink.len() as u64);
        assert_eq!(producer.progress().load(Ordering::SeqCst), 12);
        assert_eq!(&sink[0..4], &[0x50, 0x4b, 0x03, 0x04]);
    }

    #[tokio::test]
    async fn test_shared_progress_counter() {
        let counter = Arc::new(AtomicU64::new(0));
        let (_store, producer) = producer(
            MemoryObjectStore::new().with_object("src", "k", vec![1u8; 3000]),
        );
        let producer = producer.with_progress(Arc::clone(&counter));

        producer
            .produce(&mut Vec::new(), &[ObjectDescriptor::new("k", 3000)], "")
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3000);
    }

    #[test]
    fn test_large_objects_announce_zip64() {
        assert!(!may_need_zip64(0));
        assert!(!may_need_zip64(1 << 31));
        assert!(may_need_zip64(ZIP32_LIMIT));
        assert!(may_need_zip64(ZIP32_LIMIT - 1024));
        assert!(may_need_zip64(u64::MAX));
    }

    #[tokio::test]
    async fn test_sink_failure_in_central_directory_is_finalize_error() {
        // Local header (30 + 1), five data bytes, 16-byte descriptor
        let mut sink = LimitedSink::new(52);

        let err = stored_producer()
            .produce(&mut sink, &[ObjectDescriptor::new("a", 5)], "")
            .await
            .unwrap_err();

        match err {
            TransferError::ArchiveWriteFailed { phase, source } => {
                assert_eq!(phase, ArchivePhase::Finalize);
                assert_eq!(source.to_string(), "sink full");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(sink.written, 52);
    }

    #[tokio::test]
    async fn test_sink_failure_inside_entry_names_the_entry() {
        let mut sink = LimitedSink::new(10);

        let err = stored_producer()
            .produce(&mut sink, &[ObjectDescriptor::new("a", 5)], "")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::ArchiveWriteFailed { phase: ArchivePhase::Entry(ref name), .. } if name == "a"
        ));
    }

    #[tokio::test]
    async fn test_open_failure_stops_before_later_objects() {
        let (store, producer) = producer(
            MemoryObjectStore::new()
                .with_object("src", "a", &b"a"[..])
                .with_object("src", "b", &b"b"[..])
                .with_object("src", "c", &b"c"[..])
                .fail_open("b"),
        );
        let objects = vec![
            ObjectDescriptor::new("a", 1),
            ObjectDescriptor::new("b", 1),
            ObjectDescriptor::new("c", 1),
        ];

        let err = producer
            .produce(&mut Vec::new(), &objects, "")
            .await
            .unwrap_err();

        match err {
            TransferError::SourceReadFailed { key, source } => {
                assert_eq!(key, "b");
                assert!(matches!(source, StoreError::AccessDenied(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.opened_keys(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stream_failure_releases_source() {
        let (store, producer) = producer(
            MemoryObjectStore::new()
                .with_object("src", "big", vec![7u8; 200_000])
                .fail_stream("big", 100_000),
        );

        let err = producer
            .produce(&mut Vec::new(), &[ObjectDescriptor::new("big", 200_000)], "")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::SourceReadFailed {
                source: StoreError::Stream(_),
                ..
            }
        ));
        assert_eq!(store.max_open_streams(), 1);
    }

    #[tokio::test]
    async fn test_sources_are_never_open_concurrently() {
        let mut store = MemoryObjectStore::new();
        let mut objects = Vec::new();
        for i in 0..10 {
            let key = format!("k{}", i);
            store = store.with_object("src", &key, vec![i as u8; 1000]);
            objects.push(ObjectDescriptor::new(key, 1000));
        }
        let (store, producer) = producer(store);

        producer.produce(&mut Vec::new(), &objects, "").await.unwrap();
        assert_eq!(store.max_open_streams(), 1);
        assert_eq!(store.opened_keys().len(), 10);
    }
}
