use std::time::Duration;

/// One source object as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
}

impl ObjectDescriptor {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self { key: key.into(), size }
    }
}

/// Source scope and destination of one archive transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source_bucket: String,
    pub source_prefix: String,
    pub dest_bucket: String,
    pub dest_key: String,
}

impl TransferRequest {
    pub fn source_url(&self) -> String {
        format!("s3://{}/{}", self.source_bucket, self.source_prefix)
    }

    pub fn dest_url(&self) -> String {
        format!("s3://{}/{}", self.dest_bucket, self.dest_key)
    }
}

/// What the producer wrote into its sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub source_bytes: u64,
    pub archive_bytes: u64,
}

/// Outcome of a successful transfer.
#[derive(Debug, Clone)]
pub struct TransferSummary {
    pub objects: usize,
    pub source_bytes: u64,
    pub archive_bytes: u64,
    pub elapsed: Duration,
}
