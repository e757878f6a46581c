use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::errors::StoreError;
use crate::models::ObjectDescriptor;

/// Readable body of one stored object.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Object storage operations the archive pipeline depends on.
///
/// Implementations never retry; the first failure is returned to the caller.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object under `prefix`, following pagination to the end.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectDescriptor>, StoreError>;

    /// Open the body of `key` for reading.
    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError>;

    /// Consume `input` to EOF and store it as `key`, returning the bytes written.
    ///
    /// A failure reading `input` is reported as [`StoreError::Input`].
    async fn write_all(
        &self,
        bucket: &str,
        key: &str,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StoreError>;

    /// Human readable name of the backend, for logs
    fn name(&self) -> &str;
}
