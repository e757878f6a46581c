//! Bounded in-memory byte relay between the archive producer and the uploader.
//!
//! [`pipe`] returns a [`PipeWriter`] (an `AsyncWrite`) and a [`PipeReader`]
//! (an `AsyncRead`) sharing one fixed-size buffer. Writes suspend while the
//! buffer is full, reads suspend while it is empty, so the producer can never
//! run more than `capacity` bytes ahead of the uploader.
//!
//! Either end can be closed with an error, which the other end observes on its
//! next (or currently suspended) operation:
//!
//! ```text
//!   producer ──write──▶ [ buffer ] ──read──▶ uploader
//!      │ close_with_error ──────────▶ read fails
//!      write fails ◀────────── close_with_error │
//! ```

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use bytes::BytesMut;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::constants::{ERROR_RELAY_READER_CLOSED, ERROR_RELAY_WRITER_DROPPED};

/// Error delivered to one end of the relay when the other end failed.
#[derive(Debug, Clone)]
pub struct RelayError {
    message: Arc<str>,
}

impl RelayError {
    fn new(message: Arc<str>) -> Self {
        Self { message }
    }

    fn into_io(self, kind: io::ErrorKind) -> io::Error {
        io::Error::new(kind, self)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the relay error wrapped by `err`, if it came from the relay.
    pub fn from_io(err: &io::Error) -> Option<&RelayError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<RelayError>())
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RelayError {}

#[derive(Debug, Clone)]
enum EndState {
    Open,
    Closed,
    Failed(Arc<str>),
}

impl EndState {
    fn is_open(&self) -> bool {
        matches!(self, EndState::Open)
    }
}

struct Shared {
    buffer: BytesMut,
    capacity: usize,
    writer: EndState,
    reader: EndState,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
    bytes_relayed: u64,
}

impl Shared {
    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    fn wake_writer(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }

    fn fail_writer(&mut self, message: Arc<str>) -> bool {
        if !self.writer.is_open() {
            return false;
        }
        self.writer = EndState::Failed(message);
        self.wake_reader();
        true
    }

    fn fail_reader(&mut self, message: Arc<str>) -> bool {
        if !self.reader.is_open() {
            return false;
        }
        self.reader = EndState::Failed(message);
        self.buffer.clear();
        self.wake_writer();
        true
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a relay holding at most `capacity` bytes in flight (minimum 1).
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Mutex::new(Shared {
        buffer: BytesMut::with_capacity(capacity),
        capacity,
        writer: EndState::Open,
        reader: EndState::Open,
        read_waker: None,
        write_waker: None,
        bytes_relayed: 0,
    }));

    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

/// Write end of the relay.
///
/// `shutdown` closes it cleanly (the reader sees EOF once the buffer is
/// drained). Dropping it without closing is reported to the reader as a
/// failure, so an aborted producer never looks like a complete archive.
pub struct PipeWriter {
    shared: Arc<Mutex<Shared>>,
}

impl PipeWriter {
    /// Close the write end with a failure. Returns false if it was already closed.
    pub fn close_with_error(&self, message: impl Into<String>) -> bool {
        let message: String = message.into();
        lock(&self.shared).fail_writer(Arc::from(message))
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut shared = lock(&self.shared);

        match &shared.reader {
            EndState::Failed(message) => {
                return Poll::Ready(Err(
                    RelayError::new(message.clone()).into_io(io::ErrorKind::BrokenPipe)
                ));
            }
            EndState::Closed => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    ERROR_RELAY_READER_CLOSED,
                )));
            }
            EndState::Open => {}
        }

        match &shared.writer {
            EndState::Failed(message) => {
                return Poll::Ready(Err(
                    RelayError::new(message.clone()).into_io(io::ErrorKind::BrokenPipe)
                ));
            }
            EndState::Closed => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "write after the relay was closed",
                )));
            }
            EndState::Open => {}
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let available = shared.capacity - shared.buffer.len();
        if available == 0 {
            shared.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let n = available.min(buf.len());
        shared.buffer.extend_from_slice(&buf[..n]);
        shared.wake_reader();

        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let shared = lock(&self.shared);
        match &shared.reader {
            EndState::Failed(message) => Poll::Ready(Err(
                RelayError::new(message.clone()).into_io(io::ErrorKind::BrokenPipe)
            )),
            _ => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut shared = lock(&self.shared);
        if shared.writer.is_open() {
            shared.writer = EndState::Closed;
            shared.wake_reader();
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if lock(&self.shared).fail_writer(Arc::from(ERROR_RELAY_WRITER_DROPPED)) {
            debug!("Relay writer dropped without being closed");
        }
    }
}

/// Read end of the relay.
pub struct PipeReader {
    shared: Arc<Mutex<Shared>>,
}

impl PipeReader {
    /// Close the read end with a failure, releasing a suspended writer.
    /// Returns false if it was already closed.
    pub fn close_with_error(&self, message: impl Into<String>) -> bool {
        let message: String = message.into();
        lock(&self.shared).fail_reader(Arc::from(message))
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut shared = lock(&self.shared);

        if let EndState::Failed(message) = &shared.writer {
            return Poll::Ready(Err(
                RelayError::new(message.clone()).into_io(io::ErrorKind::Other)
            ));
        }
        if let EndState::Failed(message) = &shared.reader {
            return Poll::Ready(Err(
                RelayError::new(message.clone()).into_io(io::ErrorKind::Other)
            ));
        }

        if !shared.buffer.is_empty() {
            let n = buf.remaining().min(shared.buffer.len());
            let chunk = shared.buffer.split_to(n);
            buf.put_slice(&chunk);
            shared.bytes_relayed += n as u64;
            shared.wake_writer();
            return Poll::Ready(Ok(()));
        }

        match shared.writer {
            EndState::Closed => Poll::Ready(Ok(())),
            _ => {
                shared.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        if shared.reader.is_open() {
            shared.reader = EndState::Closed;
            shared.buffer.clear();
            shared.wake_writer();
        }
    }
}

/// Shared view of a relay, used to observe progress and to fail both ends at once.
#[derive(Clone)]
pub struct RelayHandle {
    shared: Arc<Mutex<Shared>>,
}

impl RelayHandle {
    /// Fail both ends; suspended reads and writes return `message`.
    pub fn fail(&self, message: &str) {
        let message: Arc<str> = Arc::from(message);
        let mut shared = lock(&self.shared);
        shared.fail_writer(message.clone());
        shared.fail_reader(message);
    }

    /// Bytes handed from the writer to the reader so far.
    pub fn bytes_relayed(&self) -> u64 {
        lock(&self.shared).bytes_relayed
    }

    pub fn is_finished(&self) -> bool {
        let shared = lock(&self.shared);
        !shared.writer.is_open() || !shared.reader.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::{assert_pending, assert_ready_ok};

    #[tokio::test]
    async fn test_bytes_arrive_in_write_order() {
        let (mut writer, mut reader) = pipe(7);
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = data.clone();

        let producer = tokio::spawn(async move {
            for chunk in data.chunks(13) {
                writer.write_all(chunk).await.unwrap();
            }
            writer.shutdown().await.unwrap();
        });

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        producer.await.unwrap();

        assert_eq!(received, expected);
        assert_eq!(reader.handle().bytes_relayed(), expected.len() as u64);
    }

    #[tokio::test]
    async fn test_write_suspends_until_reader_drains() {
        let (mut writer, mut reader) = pipe(4);
        let data = *b"abcdefgh";

        let mut write = tokio_test::task::spawn(writer.write_all(&data));
        assert_pending!(write.poll());

        let mut first = [0u8; 4];
        reader.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"abcd");

        assert!(write.is_woken());
        assert_ready_ok!(write.poll());
        drop(write);

        let mut second = [0u8; 4];
        reader.read_exact(&mut second).await.unwrap();
        assert_eq!(&second, b"efgh");
    }

    #[tokio::test]
    async fn test_read_suspends_until_data_or_close() {
        let (mut writer, mut reader) = pipe(16);
        let mut buf = [0u8; 8];

        {
            let mut read = tokio_test::task::spawn(reader.read(&mut buf));
            assert_pending!(read.poll());

            writer.write_all(b"hi").await.unwrap();
            assert!(read.is_woken());
            let n = assert_ready_ok!(read.poll());
            assert_eq!(n, 2);
        }

        writer.shutdown().await.unwrap();
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_writer_error_reaches_reader() {
        let (mut writer, mut reader) = pipe(64);
        writer.write_all(b"partial").await.unwrap();
        assert!(writer.close_with_error("source object missing"));
        assert!(!writer.close_with_error("second close is ignored"));

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        let relay = RelayError::from_io(&err).expect("relay error");
        assert_eq!(relay.message(), "source object missing");
    }

    #[tokio::test]
    async fn test_reader_error_releases_blocked_writer() {
        let (mut writer, reader) = pipe(2);

        let mut write = tokio_test::task::spawn(writer.write_all(b"more than two bytes"));
        assert_pending!(write.poll());

        reader.close_with_error("upload rejected");
        assert!(write.is_woken());
        match write.poll() {
            Poll::Ready(Err(err)) => {
                assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
                assert_eq!(RelayError::from_io(&err).unwrap().message(), "upload rejected");
            }
            other => panic!("expected write failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_reader_breaks_pipe() {
        let (mut writer, reader) = pipe(8);
        drop(reader);

        let err = writer.write_all(b"data").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_dropped_writer_is_not_a_clean_eof() {
        let (mut writer, mut reader) = pipe(8);
        writer.write_all(b"abc").await.unwrap();
        drop(writer);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(
            RelayError::from_io(&err).unwrap().message(),
            ERROR_RELAY_WRITER_DROPPED
        );
    }

    #[tokio::test]
    async fn test_clean_close_delivers_buffered_bytes() {
        let (mut writer, mut reader) = pipe(8);
        writer.write_all(b"tail").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"tail");
    }

    #[tokio::test]
    async fn test_handle_fails_both_ends() {
        let (mut writer, mut reader) = pipe(8);
        let handle = writer.handle();
        assert!(!handle.is_finished());

        handle.fail("cancelled");
        assert!(handle.is_finished());

        let err = writer.write_all(b"x").await.unwrap_err();
        assert_eq!(RelayError::from_io(&err).unwrap().message(), "cancelled");

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(RelayError::from_io(&err).unwrap().message(), "cancelled");
    }
}
