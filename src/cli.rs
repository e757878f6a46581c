use clap::{Parser, ValueEnum};

use crate::utils::streaming_zip::CompressionMethod;

/// Command-line arguments for s3-archiver.
///
/// Credentials are never taken on the command line; they come from the
/// standard AWS chain or from the named profile.
#[derive(Parser, Debug)]
#[clap(
    name = "s3-archiver",
    version,
    about = "Stream the objects under an S3 prefix into a single ZIP archive uploaded back to S3"
)]
pub struct Args {
    /// AWS profile to use for credentials
    #[clap(long)]
    pub profile: Option<String>,

    /// AWS region of the buckets
    #[clap(long)]
    pub region: Option<String>,

    /// Custom S3-compatible endpoint URL (MinIO, Ceph, ...)
    #[clap(long)]
    pub endpoint: Option<String>,

    /// Bucket holding the objects to archive
    #[clap(long)]
    pub source_bucket: String,

    /// Only archive keys starting with this prefix
    #[clap(long, default_value = "")]
    pub source_prefix: String,

    /// Bucket receiving the archive
    #[clap(long)]
    pub dest_bucket: String,

    /// Key of the archive in the destination bucket
    #[clap(long)]
    pub dest_key: String,

    /// Multipart upload part size in MiB (minimum 5)
    #[clap(long, default_value = "8")]
    pub part_size: usize,

    /// Archive bytes buffered between producer and uploader, in KiB
    #[clap(long, default_value = "256")]
    pub pipe_buffer: usize,

    /// Entry compression
    #[clap(long, value_enum, default_value = "fastest")]
    pub compression: Compression,

    /// Give up after this many seconds
    #[clap(long)]
    pub timeout: Option<u64>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum Compression {
    /// Deflate at the fastest level
    Fastest,
    /// No compression
    Stored,
}

impl From<Compression> for CompressionMethod {
    fn from(compression: Compression) -> Self {
        match compression {
            Compression::Fastest => CompressionMethod::Deflated,
            Compression::Stored => CompressionMethod::Stored,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::Fastest => write!(f, "fastest"),
            Compression::Stored => write!(f, "stored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from([
            "s3-archiver",
            "--source-bucket",
            "src",
            "--dest-bucket",
            "dst",
            "--dest-key",
            "out.zip",
        ])
        .unwrap();

        assert_eq!(args.source_prefix, "");
        assert_eq!(args.part_size, 8);
        assert_eq!(args.pipe_buffer, 256);
        assert_eq!(args.compression, Compression::Fastest);
        assert!(args.timeout.is_none());
        assert!(!args.verbose);
    }

    #[test]
    fn test_required_flags() {
        let missing_key = Args::try_parse_from([
            "s3-archiver",
            "--source-bucket",
            "src",
            "--dest-bucket",
            "dst",
        ]);
        assert!(missing_key.is_err());

        let missing_source = Args::try_parse_from([
            "s3-archiver",
            "--dest-bucket",
            "dst",
            "--dest-key",
            "out.zip",
        ]);
        assert!(missing_source.is_err());
    }

    #[test]
    fn test_compression_choice() {
        let args = Args::try_parse_from([
            "s3-archiver",
            "--source-bucket",
            "src",
            "--dest-bucket",
            "dst",
            "--dest-key",
            "out.zip",
            "--compression",
            "stored",
        ])
        .unwrap();

        assert_eq!(CompressionMethod::from(args.compression), CompressionMethod::Stored);
    }
}
