use chrono::{Datelike, Timelike};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWrite;

/// Writer that counts the bytes passing through it.
///
/// Shutdown is never forwarded: finishing a compressed entry shuts down its
/// encoder, which must not close the archive sink underneath.
pub struct CountingWriter<W: AsyncWrite + Unpin> {
    inner: W,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &result {
            self.bytes_written += *n as u64;
        }
        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }
}

/// Convert time to DOS format, returned as `(time, date)`
pub fn dos_time(time: Option<SystemTime>) -> (u16, u16) {
    let time = time.unwrap_or_else(SystemTime::now);
    let secs_since_epoch = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let datetime = chrono::DateTime::<chrono::Utc>::from_timestamp(secs_since_epoch as i64, 0)
        .unwrap_or_default()
        .naive_utc();

    // DOS dates cover 1980..=2107
    let year = datetime.year().clamp(1980, 2107) as u16;
    let month = datetime.month() as u16;
    let day = datetime.day() as u16;
    let hour = datetime.hour() as u16;
    let minute = datetime.minute() as u16;
    let second = datetime.second() as u16;

    let date = ((year - 1980) << 9) | (month << 5) | day;
    let time = (hour << 11) | (minute << 5) | (second >> 1);

    (time, date)
}
