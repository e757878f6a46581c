//! Error taxonomy for listing, archiving and uploading.
//!
//! [`StoreError`] is what an [`ObjectStore`](crate::cloud::store::ObjectStore)
//! reports; [`TransferError`] is the single terminal failure of a transfer and
//! always names the [`Stage`] it came from.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by an object store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("s3://{bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    /// Reading the body of an object failed after it was opened.
    #[error("object stream interrupted")]
    Stream(#[source] io::Error),

    /// Reading the stream handed to `write_all` failed.
    #[error("failed to read upload input")]
    Input(#[source] io::Error),
}

/// Which part of the pipeline a failure originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Listing,
    Producer,
    Uploader,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Listing => write!(f, "listing"),
            Stage::Producer => write!(f, "producer"),
            Stage::Uploader => write!(f, "uploader"),
        }
    }
}

/// The point inside the archive at which writing failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchivePhase {
    Entry(String),
    Finalize,
}

impl fmt::Display for ArchivePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchivePhase::Entry(name) => write!(f, "entry '{}'", name),
            ArchivePhase::Finalize => write!(f, "central directory"),
        }
    }
}

/// Terminal failure of one transfer run.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to list objects under s3://{bucket}/{prefix}")]
    ListingFailed {
        bucket: String,
        prefix: String,
        #[source]
        source: StoreError,
    },

    #[error("no objects found with prefix '{prefix}' in bucket {bucket}")]
    NoObjectsFound { bucket: String, prefix: String },

    #[error("failed to read source object {key}")]
    SourceReadFailed {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to write archive {phase}")]
    ArchiveWriteFailed {
        phase: ArchivePhase,
        #[source]
        source: io::Error,
    },

    #[error("failed to upload archive to s3://{bucket}/{key}")]
    UploadFailed {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("transfer timed out after {0:?}")]
    TimedOut(Duration),

    #[error("{stage} task terminated abnormally: {message}")]
    TaskFailed { stage: Stage, message: String },
}

impl TransferError {
    /// The pipeline stage this failure is attributed to.
    pub fn stage(&self) -> Stage {
        match self {
            TransferError::ListingFailed { .. } | TransferError::NoObjectsFound { .. } => Stage::Listing,
            TransferError::SourceReadFailed { .. } | TransferError::ArchiveWriteFailed { .. } => Stage::Producer,
            TransferError::UploadFailed { .. }
            | TransferError::Cancelled
            | TransferError::TimedOut(_) => Stage::Uploader,
            TransferError::TaskFailed { stage, .. } => *stage,
        }
    }

    /// True for failures caused by the caller's input rather than the environment.
    pub fn is_user_error(&self) -> bool {
        matches!(self, TransferError::NoObjectsFound { .. })
    }
}

/// `err` followed by each of its causes, joined with `: `.
///
/// Messages carry only their own context, so this is the one-line form used
/// wherever the error travels as text.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = inner.source();
    }
    message
}
