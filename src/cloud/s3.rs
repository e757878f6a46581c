use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use rusoto_core::{ByteStream, RusotoError};
use rusoto_s3::{
    AbortMultipartUploadRequest, CompleteMultipartUploadRequest, CompletedMultipartUpload,
    CompletedPart, CreateMultipartUploadRequest, GetObjectError, GetObjectRequest,
    ListObjectsV2Error, ListObjectsV2Request, PutObjectRequest, S3Client, UploadPartRequest, S3,
};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::cloud::store::{ObjectReader, ObjectStore};
use crate::constants::{S3_MAX_PARTS, S3_MIN_PART_SIZE, S3_UPLOAD_CHUNK_SIZE};
use crate::errors::StoreError;
use crate::models::ObjectDescriptor;

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// [`ObjectStore`] backed by Amazon S3 (or an S3-compatible endpoint).
///
/// Uploads whose input fits in a single part are sent with one PutObject.
/// Larger inputs use a multipart upload: while one part is being sent the
/// next one is read from the input, so at most two parts are held in memory.
/// A failed multipart upload is aborted before the error is returned.
pub struct S3ObjectStore {
    client: Arc<S3Client>,
    part_size: usize,
}

impl S3ObjectStore {
    /// Create a store using `part_size` byte parts (at least the S3 minimum of 5MB).
    pub fn new(client: Arc<S3Client>, part_size: usize) -> Self {
        Self {
            client,
            part_size: part_size.max(S3_MIN_PART_SIZE),
        }
    }

    pub fn with_default_part_size(client: Arc<S3Client>) -> Self {
        Self::new(client, S3_UPLOAD_CHUNK_SIZE)
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<(), StoreError> {
        let size = data.len();
        self.client
            .put_object(PutObjectRequest {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_length: Some(size as i64),
                content_type: Some(ARCHIVE_CONTENT_TYPE.to_string()),
                body: Some(ByteStream::from(data)),
                ..Default::default()
            })
            .await
            .map_err(|e| classify(e, bucket, key))?;

        debug!("Stored s3://{}/{} with a single request ({} bytes)", bucket, key, size);
        Ok(())
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<String, StoreError> {
        let output = self
            .client
            .create_multipart_upload(CreateMultipartUploadRequest {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type: Some(ARCHIVE_CONTENT_TYPE.to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| classify(e, bucket, key))?;

        let upload_id = output.upload_id.ok_or_else(|| {
            StoreError::Rejected(format!("no upload ID returned for s3://{}/{}", bucket, key))
        })?;

        debug!("Started multipart upload with ID: {} for {}", upload_id, key);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i64,
        data: Vec<u8>,
    ) -> Result<CompletedPart, StoreError> {
        let size = data.len();
        let output = self
            .client
            .upload_part(UploadPartRequest {
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id: upload_id.to_string(),
                part_number,
                content_length: Some(size as i64),
                body: Some(ByteStream::from(data)),
                ..Default::default()
            })
            .await
            .map_err(|e| classify(e, bucket, key))?;

        let e_tag = output.e_tag.ok_or_else(|| {
            StoreError::Rejected(format!(
                "part {} of s3://{}/{} returned no ETag",
                part_number, bucket, key
            ))
        })?;

        debug!("Uploaded part {} of {} ({} bytes)", part_number, key, size);
        Ok(CompletedPart {
            e_tag: Some(e_tag),
            part_number: Some(part_number),
        })
    }

    /// Send parts until the input is exhausted, then complete the upload.
    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StoreError> {
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut part_number = 1i64;
        let mut data = first;

        loop {
            total += data.len() as u64;

            let (part, next) = tokio::try_join!(
                self.upload_part(bucket, key, upload_id, part_number, data),
                async {
                    read_part(&mut *input, self.part_size)
                        .await
                        .map_err(StoreError::Input)
                },
            )?;
            parts.push(part);

            if next.is_empty() {
                break;
            }
            if part_number as usize >= S3_MAX_PARTS {
                return Err(StoreError::Rejected(format!(
                    "archive exceeds {} parts of {} bytes",
                    S3_MAX_PARTS, self.part_size
                )));
            }

            part_number += 1;
            data = next;
        }

        self.client
            .complete_multipart_upload(CompleteMultipartUploadRequest {
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id: upload_id.to_string(),
                multipart_upload: Some(CompletedMultipartUpload { parts: Some(parts) }),
                ..Default::default()
            })
            .await
            .map_err(|e| classify(e, bucket, key))?;

        debug!("Completed multipart upload for {} ({} parts)", key, part_number);
        Ok(total)
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) {
        warn!("Attempting to abort the failed upload...");

        let abort_request = AbortMultipartUploadRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            ..Default::default()
        };

        if let Err(abort_err) = self.client.abort_multipart_upload(abort_request).await {
            warn!("Failed to abort upload: {}", abort_err);
        } else {
            warn!("Successfully aborted the failed upload");
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectDescriptor>, StoreError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let request = ListObjectsV2Request {
                bucket: bucket.to_string(),
                prefix: if prefix.is_empty() {
                    None
                } else {
                    Some(prefix.to_string())
                },
                continuation_token: continuation_token.take(),
                ..Default::default()
            };

            let output = self.client.list_objects_v2(request).await.map_err(|e| match e {
                RusotoError::Service(ListObjectsV2Error::NoSuchBucket(_)) => StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: prefix.to_string(),
                },
                other => classify(other, bucket, prefix),
            })?;
            pages += 1;

            for object in output.contents.unwrap_or_default() {
                match object.key {
                    Some(key) => {
                        let size = object.size.unwrap_or(0).max(0) as u64;
                        objects.push(ObjectDescriptor::new(key, size));
                    }
                    None => warn!("Skipping listed object without a key in bucket {}", bucket),
                }
            }

            match (output.is_truncated, output.next_continuation_token) {
                (Some(true), Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        debug!(
            "Listed {} objects under s3://{}/{} in {} pages",
            objects.len(),
            bucket,
            prefix,
            pages
        );
        Ok(objects)
    }

    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError> {
        let output = self
            .client
            .get_object(GetObjectRequest {
                bucket: bucket.to_string(),
                key: key.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| match e {
                RusotoError::Service(GetObjectError::NoSuchKey(_)) => StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                other => classify(other, bucket, key),
            })?;

        let body = output.body.ok_or_else(|| {
            StoreError::Rejected(format!("no body returned for s3://{}/{}", bucket, key))
        })?;

        Ok(Box::new(body.into_async_read()))
    }

    async fn write_all(
        &self,
        bucket: &str,
        key: &str,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StoreError> {
        let first = read_part(&mut *input, self.part_size)
            .await
            .map_err(StoreError::Input)?;

        if first.len() < self.part_size {
            // The whole input fits in one request
            let size = first.len() as u64;
            self.put_object(bucket, key, first).await?;
            info!("Uploaded s3://{}/{} ({} bytes)", bucket, key, size);
            return Ok(size);
        }

        let upload_id = self.create_multipart(bucket, key).await?;
        match self.upload_parts(bucket, key, &upload_id, first, input).await {
            Ok(total) => {
                info!("Uploaded s3://{}/{} ({} bytes)", bucket, key, total);
                Ok(total)
            }
            Err(e) => {
                self.abort_multipart(bucket, key, &upload_id).await;
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        "s3"
    }
}

/// Read up to `part_size` bytes; a short result means the input hit EOF.
async fn read_part(
    input: &mut (dyn AsyncRead + Send + Unpin),
    part_size: usize,
) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(part_size);
    input.take(part_size as u64).read_to_end(&mut buffer).await?;
    Ok(buffer)
}

/// Map a rusoto failure onto the store error kinds.
fn classify<E: std::error::Error + 'static>(
    err: RusotoError<E>,
    bucket: &str,
    key: &str,
) -> StoreError {
    match err {
        RusotoError::HttpDispatch(e) => StoreError::TransientIo(e.to_string()),
        RusotoError::Credentials(e) => StoreError::AccessDenied(e.to_string()),
        RusotoError::Unknown(response) => {
            let status = response.status.as_u16();
            match status {
                404 => StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                401 | 403 => {
                    StoreError::AccessDenied(format!("s3://{}/{} (HTTP {})", bucket, key, status))
                }
                500..=599 => StoreError::TransientIo(format!(
                    "s3://{}/{} (HTTP {}): {}",
                    bucket,
                    key,
                    status,
                    response.body_as_str()
                )),
                _ => StoreError::Rejected(format!(
                    "s3://{}/{} (HTTP {}): {}",
                    bucket,
                    key,
                    status,
                    response.body_as_str()
                )),
            }
        }
        other => StoreError::Rejected(other.to_string()),
    }
}
