//! Orchestration of one bucket-to-archive transfer.
//!
//! A transfer lists the source objects, then runs two tasks connected by a
//! bounded [`pipe`]:
//!
//! ```text
//! ┌──────────────┐  write   ┌──────────┐  read   ┌──────────────┐
//! │   producer   │────────▶│   pipe   │───────▶│   uploader   │──▶ destination
//! │ (zip writer) │◀─ error ─│(bounded) │─ error ▶│ (write_all)  │
//! └──────────────┘          └──────────┘         └──────┬───────┘
//!                                                       │ oneshot
//!                                                       ▼
//!                                                 transfer_objects
//! ```
//!
//! The orchestrator waits on the uploader's completion channel only. A
//! producer failure reaches the uploader through the pipe; an uploader
//! failure is pushed back into the pipe so the producer cannot stay blocked.
//! Exactly one error is returned.

mod tasks;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveProducer;
use crate::cloud::store::ObjectStore;
use crate::constants::{
    CANCEL_GRACE_PERIOD_SECS, DEFAULT_PIPE_CAPACITY, ERROR_TRANSFER_CANCELLED,
    PROGRESS_REPORT_INTERVAL_SECS,
};
use crate::errors::{Stage, StoreError, TransferError};
use crate::models::{ArchiveSummary, ObjectDescriptor, TransferRequest, TransferSummary};
use crate::utils::pipe::pipe;
use crate::utils::progress::ProgressTracker;
use crate::utils::streaming_zip::CompressionMethod;

use tasks::{run_producer, run_uploader, UploadOutcome};

/// Tuning knobs for a transfer.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Archive bytes the producer may run ahead of the uploader
    pub pipe_capacity: usize,
    pub compression: CompressionMethod,
    /// Deadline applied to the listing and, separately, to the piping phase
    pub timeout: Option<Duration>,
    /// How long a cancelled uploader may take to clean up before it is aborted
    pub cancel_grace: Duration,
    pub progress_interval: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            compression: CompressionMethod::Deflated,
            timeout: None,
            cancel_grace: Duration::from_secs(CANCEL_GRACE_PERIOD_SECS),
            progress_interval: Duration::from_secs(PROGRESS_REPORT_INTERVAL_SECS),
        }
    }
}

enum Interrupt {
    Cancelled,
    TimedOut(Duration),
}

/// List the objects to archive. An empty listing is an error.
pub async fn list_sources(
    store: &dyn ObjectStore,
    request: &TransferRequest,
) -> Result<Vec<ObjectDescriptor>, TransferError> {
    let objects = store
        .list(&request.source_bucket, &request.source_prefix)
        .await
        .map_err(|source| TransferError::ListingFailed {
            bucket: request.source_bucket.clone(),
            prefix: request.source_prefix.clone(),
            source,
        })?;

    if objects.is_empty() {
        return Err(TransferError::NoObjectsFound {
            bucket: request.source_bucket.clone(),
            prefix: request.source_prefix.clone(),
        });
    }

    debug!(
        "Listed {} objects from {} using the {} store",
        objects.len(),
        request.source_url(),
        store.name()
    );
    Ok(objects)
}

/// [`list_sources`], stopped early by `cancel` or by the options' timeout.
pub async fn list_sources_until(
    store: &dyn ObjectStore,
    request: &TransferRequest,
    options: &TransferOptions,
    cancel: &CancellationToken,
) -> Result<Vec<ObjectDescriptor>, TransferError> {
    tokio::select! {
        listed = list_sources(store, request) => listed,
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        limit = deadline(options.timeout) => Err(TransferError::TimedOut(limit)),
    }
}

/// Resolves with `limit` once it has elapsed; never resolves without one.
async fn deadline(limit: Option<Duration>) -> Duration {
    match limit {
        Some(limit) => {
            sleep(limit).await;
            limit
        }
        None => std::future::pending().await,
    }
}

/// Archive `objects` into the destination of `request`.
///
/// Listing is not repeated; `objects` is archived in the given order.
pub async fn transfer_objects(
    store: Arc<dyn ObjectStore>,
    request: &TransferRequest,
    objects: Vec<ObjectDescriptor>,
    options: &TransferOptions,
    cancel: CancellationToken,
) -> Result<TransferSummary, TransferError> {
    if objects.is_empty() {
        return Err(TransferError::NoObjectsFound {
            bucket: request.source_bucket.clone(),
            prefix: request.source_prefix.clone(),
        });
    }

    let started = Instant::now();
    let object_count = objects.len();
    let total_source_bytes: u64 = objects.iter().map(|o| o.size).sum();

    info!(
        "Archiving {} objects ({} bytes) from {} to {}",
        object_count,
        total_source_bytes,
        request.source_url(),
        request.dest_url()
    );

    let (writer, reader) = pipe(options.pipe_capacity);
    let relay = writer.handle();

    let copied = Arc::new(AtomicU64::new(0));
    let producer = ArchiveProducer::new(
        Arc::clone(&store),
        request.source_bucket.clone(),
        options.compression,
    )
    .with_progress(Arc::clone(&copied));
    let tracker = ProgressTracker::new(total_source_bytes, copied)
        .with_interval(options.progress_interval)
        .start_tracking();

    let (done_tx, mut done_rx) = oneshot::channel::<UploadOutcome>();
    let mut uploader = tokio::spawn(run_uploader(
        store,
        request.dest_bucket.clone(),
        request.dest_key.clone(),
        reader,
        done_tx,
    ));
    let mut producer_task = tokio::spawn(run_producer(
        producer,
        writer,
        objects,
        request.source_prefix.clone(),
    ));

    let deadline = deadline(options.timeout);
    tokio::pin!(deadline);

    let waited = tokio::select! {
        outcome = &mut done_rx => Ok(outcome),
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        limit = &mut deadline => Err(Interrupt::TimedOut(limit)),
    };

    let result = match waited {
        Ok(Ok(outcome)) => join(outcome, &mut producer_task, request).await,
        Ok(Err(_)) => {
            producer_task.abort();
            Err(task_failure(Stage::Uploader, &mut uploader).await)
        }
        Err(interrupt) => {
            relay.fail(ERROR_TRANSFER_CANCELLED);
            producer_task.abort();
            stop_uploader(&mut uploader, options.cancel_grace).await;
            Err(match interrupt {
                Interrupt::Cancelled => TransferError::Cancelled,
                Interrupt::TimedOut(limit) => TransferError::TimedOut(limit),
            })
        }
    };
    tracker.abort();

    let (summary, uploaded) = result?;
    let elapsed = started.elapsed();

    info!(
        "Uploaded {} ({} archive bytes, {} entries) in {:.2}s",
        request.dest_url(),
        uploaded,
        summary.entries,
        elapsed.as_secs_f64()
    );

    Ok(TransferSummary {
        objects: summary.entries,
        source_bytes: summary.source_bytes,
        archive_bytes: uploaded,
        elapsed,
    })
}

/// List the source prefix and archive everything found.
pub async fn transfer(
    store: Arc<dyn ObjectStore>,
    request: &TransferRequest,
    options: &TransferOptions,
    cancel: CancellationToken,
) -> Result<TransferSummary, TransferError> {
    let objects = list_sources_until(store.as_ref(), request, options, &cancel).await?;
    transfer_objects(store, request, objects, options, cancel).await
}

/// Resolve the transfer from the uploader's outcome.
async fn join(
    outcome: UploadOutcome,
    producer_task: &mut JoinHandle<Result<ArchiveSummary, TransferError>>,
    request: &TransferRequest,
) -> Result<(ArchiveSummary, u64), TransferError> {
    match outcome {
        Ok(uploaded) => match producer_task.await {
            Ok(Ok(summary)) => Ok((summary, uploaded)),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(TransferError::TaskFailed {
                stage: Stage::Producer,
                message: e.to_string(),
            }),
        },
        // The relay failed underneath the uploader: the producer holds the cause
        Err(StoreError::Input(input_err)) => match producer_task.await {
            Ok(Err(e)) => Err(e),
            Ok(Ok(_)) => Err(TransferError::UploadFailed {
                bucket: request.dest_bucket.clone(),
                key: request.dest_key.clone(),
                source: StoreError::Input(input_err),
            }),
            Err(e) => Err(TransferError::TaskFailed {
                stage: Stage::Producer,
                message: e.to_string(),
            }),
        },
        Err(source) => {
            producer_task.abort();
            Err(TransferError::UploadFailed {
                bucket: request.dest_bucket.clone(),
                key: request.dest_key.clone(),
                source,
            })
        }
    }
}

async fn task_failure(stage: Stage, task: &mut JoinHandle<()>) -> TransferError {
    let message = match task.await {
        Ok(()) => "task ended without reporting an outcome".to_string(),
        Err(e) => e.to_string(),
    };
    TransferError::TaskFailed { stage, message }
}

async fn stop_uploader(uploader: &mut JoinHandle<()>, grace: Duration) {
    if timeout(grace, &mut *uploader).await.is_err() {
        warn!("Uploader did not stop within {:?}, aborting it", grace);
        uploader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryObjectStore;

    fn request(prefix: &str) -> TransferRequest {
        TransferRequest {
            source_bucket: "src".to_string(),
            source_prefix: prefix.to_string(),
            dest_bucket: "dst".to_string(),
            dest_key: "out.zip".to_string(),
        }
    }

    fn small_pipe() -> TransferOptions {
        TransferOptions {
            pipe_capacity: 1024,
            cancel_grace: Duration::from_millis(50),
            ..TransferOptions::default()
        }
    }

    fn noisy(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    #[tokio::test]
    async fn test_successful_transfer_uploads_archive() {
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_object("src", "logs/a.txt", &b"alpha"[..])
                .with_object("src", "logs/b.txt", &b"beta"[..]),
        );

        let summary = transfer(
            store.clone(),
            &request("logs/"),
            &small_pipe(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.objects, 2);
        assert_eq!(summary.source_bytes, 9);
        let uploaded = store.object("dst", "out.zip").expect("archive uploaded");
        assert_eq!(summary.archive_bytes, uploaded.len() as u64);
        assert_eq!(store.write_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_listing_starts_no_upload() {
        let store = Arc::new(MemoryObjectStore::new().with_object("src", "other/x", &b"x"[..]));

        let err = transfer(
            store.clone(),
            &request("logs/"),
            &small_pipe(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransferError::NoObjectsFound { .. }));
        assert!(err.is_user_error());
        assert_eq!(store.write_calls(), 0);
        assert!(store.opened_keys().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure() {
        let store = Arc::new(MemoryObjectStore::new().fail_listing());

        let err = transfer(store, &request(""), &small_pipe(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::ListingFailed { .. }));
        assert_eq!(err.stage(), Stage::Listing);
    }

    #[tokio::test]
    async fn test_source_failure_is_reported_once_and_exactly() {
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_object("src", "k1", noisy(10_000, 1))
                .with_object("src", "k2", noisy(10_000, 2))
                .with_object("src", "k3", noisy(10_000, 3))
                .fail_stream("k2", 4_000),
        );

        let err = transfer(
            store.clone(),
            &request(""),
            &small_pipe(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match &err {
            TransferError::SourceReadFailed { key, source } => {
                assert_eq!(key, "k2");
                assert!(matches!(source, StoreError::Stream(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.stage(), Stage::Producer);
        assert_eq!(store.opened_keys(), vec!["k1", "k2"]);
        assert!(store.object("dst", "out.zip").is_none());
    }

    #[tokio::test]
    async fn test_upload_failure_releases_blocked_producer() {
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_object("src", "big", noisy(1_000_000, 9))
                .fail_upload_after(0),
        );

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            transfer(
                store.clone(),
                &request(""),
                &small_pipe(),
                CancellationToken::new(),
            ),
        )
        .await
        .expect("transfer must not hang");

        match result.unwrap_err() {
            TransferError::UploadFailed { bucket, key, source } => {
                assert_eq!(bucket, "dst");
                assert_eq!(key, "out.zip");
                assert!(matches!(source, StoreError::Rejected(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_stalled_upload() {
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_object("src", "big", noisy(100_000, 4))
                .stall_upload(),
        );
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(10),
            transfer(store, &request(""), &small_pipe(), cancel),
        )
        .await
        .expect("cancelled transfer must return")
        .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
    }

    #[tokio::test]
    async fn test_timeout() {
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_object("src", "big", noisy(100_000, 5))
                .stall_upload(),
        );
        let options = TransferOptions {
            timeout: Some(Duration::from_millis(20)),
            ..small_pipe()
        };

        let err = transfer(store, &request(""), &options, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::TimedOut(limit) if limit == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_cancellation_during_listing() {
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_object("src", "a", &b"a"[..])
                .stall_listing(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = tokio::time::timeout(
            Duration::from_secs(10),
            transfer(store.clone(), &request(""), &small_pipe(), cancel),
        )
        .await
        .expect("cancelled listing must return")
        .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_timeout_during_listing() {
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_object("src", "a", &b"a"[..])
                .stall_listing(),
        );
        let options = TransferOptions {
            timeout: Some(Duration::from_millis(20)),
            ..small_pipe()
        };

        let err = tokio::time::timeout(
            Duration::from_secs(10),
            list_sources_until(store.as_ref(), &request(""), &options, &CancellationToken::new()),
        )
        .await
        .expect("listing deadline must fire")
        .unwrap_err();

        assert!(matches!(err, TransferError::TimedOut(limit) if limit == Duration::from_millis(20)));
        assert!(store.opened_keys().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_objects_rejects_empty_list() {
        let store = Arc::new(MemoryObjectStore::new());

        let err = transfer_objects(
            store.clone(),
            &request(""),
            Vec::new(),
            &small_pipe(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransferError::NoObjectsFound { .. }));
        assert_eq!(store.write_calls(), 0);
    }
}
