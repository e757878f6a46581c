use std::sync::Arc;

use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

use crate::archive::ArchiveProducer;
use crate::cloud::store::ObjectStore;
use crate::errors::{error_chain, ArchivePhase, StoreError, TransferError};
use crate::models::{ArchiveSummary, ObjectDescriptor};
use crate::utils::pipe::{PipeReader, PipeWriter};

/// Outcome the uploader posts on its completion channel.
pub(crate) type UploadOutcome = Result<u64, StoreError>;

/// Upload everything read from `reader` to `bucket/key`.
///
/// On failure the read end is closed with the error before the outcome is
/// posted, so a producer suspended on a full relay is released.
pub(crate) async fn run_uploader(
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    mut reader: PipeReader,
    done: oneshot::Sender<UploadOutcome>,
) {
    let result = store.write_all(&bucket, &key, &mut reader).await;

    if let Err(e) = &result {
        if reader.close_with_error(error_chain(e)) {
            debug!("Closed the archive relay after upload failure: {}", error_chain(e));
        }
    }
    drop(reader);

    if done.send(result).is_err() {
        debug!("Upload outcome dropped, the transfer is no longer waiting");
    }
}

/// Produce the archive into `writer` and close it exactly once: cleanly on
/// success, with the failure otherwise.
pub(crate) async fn run_producer(
    producer: ArchiveProducer,
    mut writer: PipeWriter,
    objects: Vec<ObjectDescriptor>,
    source_prefix: String,
) -> Result<ArchiveSummary, TransferError> {
    match producer.produce(&mut writer, &objects, &source_prefix).await {
        Ok(summary) => {
            writer
                .shutdown()
                .await
                .map_err(|source| TransferError::ArchiveWriteFailed {
                    phase: ArchivePhase::Finalize,
                    source,
                })?;
            Ok(summary)
        }
        Err(e) => {
            if !writer.close_with_error(error_chain(&e)) {
                warn!("Archive relay was already closed when the producer failed");
            }
            Err(e)
        }
    }
}
