//! Building blocks for the archive pipeline.
//!
//! ## Components
//!
//! - **Pipe**: bounded in-memory relay connecting the archive producer to the uploader
//! - **Streaming ZIP**: forward-only ZIP writer that never seeks its output
//! - **Progress**: periodic progress logging over an atomic byte counter
//!
//! ### Relaying an archive through a pipe
//!
//! ```no_run
//! use s3_archiver::utils::pipe::pipe;
//! use s3_archiver::utils::streaming_zip::{FileOptions, StreamingZipWriter};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! # async fn example() -> std::io::Result<()> {
//! let (mut writer, mut reader) = pipe(64 * 1024);
//!
//! let producer = tokio::spawn(async move {
//!     let mut zip = StreamingZipWriter::new(&mut writer);
//!     let mut entry = zip.start_file("hello.txt", FileOptions::default()).await?;
//!     entry.write_all(b"hello").await?;
//!     entry.finish().await?;
//!     zip.finish().await?;
//!     writer.shutdown().await
//! });
//!
//! let mut archive = Vec::new();
//! reader.read_to_end(&mut archive).await?;
//! producer.await??;
//! # Ok(())
//! # }
//! ```

/// Bounded byte relay with close-with-error semantics on both ends
pub mod pipe;

/// Periodic progress reporting
pub mod progress;

/// Streaming ZIP archive writer
pub mod streaming_zip;
