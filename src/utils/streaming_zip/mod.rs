//! Forward-only ZIP writer for non-seekable sinks.

mod formats;
mod helpers;
mod writer;

pub use formats::{CompressionMethod, FileOptions, ZipEntry, ZIP32_LIMIT};
pub use helpers::{dos_time, CountingWriter};
pub use writer::{StreamingFileWriter, StreamingZipWriter};
