//! Global constants for the s3-archiver application.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Memory and buffer size constants
/// Buffer size used when copying a source object into the archive (64KB)
pub const STREAMING_BUFFER_SIZE: usize = 64 * 1024;

/// Default capacity of the in-memory relay between producer and uploader (256KB)
pub const DEFAULT_PIPE_CAPACITY: usize = 256 * 1024;

// Cloud storage constants
/// S3 upload part size (8MB, S3 minimum is 5MB)
pub const S3_UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// S3 minimum part size for multipart uploads (5MB)
pub const S3_MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3 maximum parts per upload
pub const S3_MAX_PARTS: usize = 10000;

/// Region used when a custom endpoint is given without a region
pub const DEFAULT_CUSTOM_REGION: &str = "us-east-1";

// Timeout constants
/// Progress reporting interval in seconds
pub const PROGRESS_REPORT_INTERVAL_SECS: u64 = 2;

/// Time the uploader is given to abort its upload after a cancellation
pub const CANCEL_GRACE_PERIOD_SECS: u64 = 10;

// ZIP format constants
/// ZIP local file header signature
pub const ZIP_LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

/// ZIP data descriptor signature
pub const ZIP_DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

/// ZIP central directory header signature
pub const ZIP_CENTRAL_DIR_HEADER_SIGNATURE: u32 = 0x02014b50;

/// ZIP end of central directory signature
pub const ZIP_END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x06054b50;

/// ZIP64 end of central directory record signature
pub const ZIP64_END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x06064b50;

/// ZIP64 end of central directory locator signature
pub const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// ZIP64 extended information extra field tag
pub const ZIP64_EXTRA_FIELD_TAG: u16 = 0x0001;

/// ZIP version needed to extract
pub const ZIP_VERSION_NEEDED: u16 = 20; // 2.0

/// ZIP version needed to extract ZIP64 entries
pub const ZIP64_VERSION_NEEDED: u16 = 45; // 4.5

/// ZIP version made by (UNIX + 4.5)
pub const ZIP_VERSION_MADE_BY: u16 = 0x032d;

/// ZIP compression method: deflate
pub const ZIP_COMPRESSION_METHOD_DEFLATE: u16 = 8;

/// ZIP compression method: store (no compression)
pub const ZIP_COMPRESSION_METHOD_STORE: u16 = 0;

/// ZIP bit flag: CRC and sizes follow the data in a data descriptor
pub const ZIP_FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// ZIP bit flag: file name is UTF-8
pub const ZIP_FLAG_UTF8: u16 = 0x0800;

/// External attributes for a regular file (UNIX mode 0644 in the high word)
pub const ZIP_FILE_EXTERNAL_ATTRIBUTES: u32 = 0o100644 << 16;

/// External attributes for a directory entry (UNIX mode 0755, MS-DOS directory bit)
pub const ZIP_DIR_EXTERNAL_ATTRIBUTES: u32 = (0o040755 << 16) | 0x10;

// Error messages
pub const ERROR_RELAY_WRITER_DROPPED: &str = "archive producer stopped before closing the stream";
pub const ERROR_RELAY_READER_CLOSED: &str = "archive upload stopped reading";
pub const ERROR_TRANSFER_CANCELLED: &str = "transfer cancelled";
