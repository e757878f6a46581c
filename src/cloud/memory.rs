//! In-memory [`ObjectStore`] used by tests and benchmarks.
//!
//! Besides holding objects it can inject failures at every step of the
//! pipeline (listing, opening, mid-stream reads, uploads) and records how it
//! was used, so callers can assert on access patterns.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::cloud::store::{ObjectReader, ObjectStore};
use crate::constants::STREAMING_BUFFER_SIZE;
use crate::errors::StoreError;
use crate::models::ObjectDescriptor;

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), Bytes>,
    fail_listing: bool,
    stall_listing: bool,
    fail_open: HashSet<String>,
    fail_stream: HashMap<String, usize>,
    fail_upload_after: Option<u64>,
    stall_upload: bool,
    opened: Vec<String>,
    write_calls: usize,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<State>,
    open_streams: Arc<AtomicUsize>,
    max_open_streams: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.state()
            .objects
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    /// Builder form of [`put_object`](Self::put_object).
    pub fn with_object(self, bucket: &str, key: &str, data: impl Into<Bytes>) -> Self {
        self.put_object(bucket, key, data);
        self
    }

    pub fn fail_listing(self) -> Self {
        self.state().fail_listing = true;
        self
    }

    /// Listings never complete.
    pub fn stall_listing(self) -> Self {
        self.state().stall_listing = true;
        self
    }

    /// Opening `key` is refused with an access error.
    pub fn fail_open(self, key: &str) -> Self {
        self.state().fail_open.insert(key.to_string());
        self
    }

    /// Reading `key` fails once `after_bytes` bytes of it have been delivered.
    pub fn fail_stream(self, key: &str, after_bytes: usize) -> Self {
        self.state().fail_stream.insert(key.to_string(), after_bytes);
        self
    }

    /// Uploads are rejected once `after_bytes` bytes have been received.
    pub fn fail_upload_after(self, after_bytes: u64) -> Self {
        self.state().fail_upload_after = Some(after_bytes);
        self
    }

    /// Uploads never read their input and never complete.
    pub fn stall_upload(self) -> Self {
        self.state().stall_upload = true;
        self
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys passed to `open_read`, in call order.
    pub fn opened_keys(&self) -> Vec<String> {
        self.state().opened.clone()
    }

    pub fn write_calls(&self) -> usize {
        self.state().write_calls
    }

    /// Largest number of object readers that were alive at the same time.
    pub fn max_open_streams(&self) -> usize {
        self.max_open_streams.load(Ordering::SeqCst)
    }

    fn track(&self, inner: ObjectReader) -> ObjectReader {
        let open = self.open_streams.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_streams.fetch_max(open, Ordering::SeqCst);
        Box::new(TrackedReader {
            inner,
            open_streams: Arc::clone(&self.open_streams),
        })
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectDescriptor>, StoreError> {
        let stall = self.state().stall_listing;
        if stall {
            std::future::pending::<()>().await;
        }

        let state = self.state();
        if state.fail_listing {
            return Err(StoreError::TransientIo("injected listing failure".to_string()));
        }

        Ok(state
            .objects
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .map(|((_, key), data)| ObjectDescriptor::new(key.clone(), data.len() as u64))
            .collect())
    }

    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError> {
        let (data, fail_at) = {
            let mut state = self.state();
            state.opened.push(key.to_string());

            if state.fail_open.contains(key) {
                return Err(StoreError::AccessDenied(format!("s3://{}/{}", bucket, key)));
            }
            let data = state
                .objects
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })?;
            (data, state.fail_stream.get(key).copied())
        };

        let reader: ObjectReader = match fail_at {
            Some(fail_at) => Box::new(FailingReader {
                data,
                position: 0,
                fail_at,
            }),
            None => Box::new(Cursor::new(data)),
        };
        Ok(self.track(reader))
    }

    async fn write_all(
        &self,
        bucket: &str,
        key: &str,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StoreError> {
        let (fail_after, stall) = {
            let mut state = self.state();
            state.write_calls += 1;
            (state.fail_upload_after, state.stall_upload)
        };

        if stall {
            std::future::pending::<()>().await;
        }

        let mut received = Vec::new();
        let mut buffer = vec![0u8; STREAMING_BUFFER_SIZE];
        loop {
            if let Some(limit) = fail_after {
                if received.len() as u64 >= limit {
                    return Err(StoreError::Rejected(format!(
                        "injected upload failure after {} bytes",
                        received.len()
                    )));
                }
            }

            let n = input.read(&mut buffer).await.map_err(StoreError::Input)?;
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buffer[..n]);
        }

        let size = received.len() as u64;
        debug!("Stored memory://{}/{} ({} bytes)", bucket, key, size);
        self.put_object(bucket, key, received);
        Ok(size)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct TrackedReader {
    inner: ObjectReader,
    open_streams: Arc<AtomicUsize>,
}

impl AsyncRead for TrackedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Delivers `data` up to `fail_at` bytes, then fails every read.
struct FailingReader {
    data: Bytes,
    position: usize,
    fail_at: usize,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let limit = self.fail_at.min(self.data.len());
        if self.position >= limit {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected stream failure",
            )));
        }

        let n = (limit - self.position).min(buf.remaining());
        let start = self.position;
        buf.put_slice(&self.data[start..start + n]);
        self.position += n;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_filters_by_bucket_and_prefix() {
        let store = MemoryObjectStore::new()
            .with_object("src", "logs/b.txt", &b"bb"[..])
            .with_object("src", "logs/a.txt", &b"a"[..])
            .with_object("src", "other/c.txt", &b"c"[..])
            .with_object("elsewhere", "logs/d.txt", &b"d"[..]);

        let listed = store.list("src", "logs/").await.unwrap();
        assert_eq!(
            listed,
            vec![
                ObjectDescriptor::new("logs/a.txt", 1),
                ObjectDescriptor::new("logs/b.txt", 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_stream_delivers_prefix_then_errors() {
        let store = MemoryObjectStore::new()
            .with_object("src", "k", &b"0123456789"[..])
            .fail_stream("k", 4);

        let mut reader = store.open_read("src", "k").await.unwrap();
        let mut head = [0u8; 4];
        reader.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"0123");

        let err = reader.read(&mut [0u8; 4]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_open_tracking() {
        let store = MemoryObjectStore::new().with_object("src", "k", &b"x"[..]);

        let first = store.open_read("src", "k").await.unwrap();
        drop(first);
        let _second = store.open_read("src", "k").await.unwrap();

        assert_eq!(store.opened_keys(), vec!["k", "k"]);
        assert_eq!(store.max_open_streams(), 1);

        let missing = store.open_read("src", "missing").await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_upload_failure_after_limit() {
        let store = MemoryObjectStore::new().fail_upload_after(0);
        let mut input: &[u8] = b"archive";

        let err = store.write_all("dst", "a.zip", &mut input).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(store.write_calls(), 1);
        assert!(store.object("dst", "a.zip").is_none());
    }
}
