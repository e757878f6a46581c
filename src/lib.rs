//! # s3-archiver
//!
//! Streams every object under an S3 prefix into a single ZIP archive and
//! uploads that archive to S3, without staging anything on local disk.
//!
//! ## Overview
//!
//! A transfer runs two concurrent tasks joined by a bounded in-memory pipe:
//! the archive producer reads source objects one at a time and writes ZIP
//! entries into the pipe, while the uploader reads the pipe and sends the
//! archive to the destination in multipart chunks. Memory use is bounded by
//! the pipe capacity plus two upload parts (one being sent while the next is
//! read), whatever the archive size.
//!
//! A failure on either side is pushed through the pipe to the other side, so
//! neither task can stay blocked, and exactly one error is reported.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use s3_archiver::cloud::{create_s3_client, ObjectStore, S3ObjectStore};
//! use s3_archiver::models::TransferRequest;
//! use s3_archiver::transfer::{transfer, TransferOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = create_s3_client(Some("us-east-1"), None, None)?;
//! let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::with_default_part_size(client));
//!
//! let request = TransferRequest {
//!     source_bucket: "logs".to_string(),
//!     source_prefix: "2024/03/".to_string(),
//!     dest_bucket: "archives".to_string(),
//!     dest_key: "logs-2024-03.zip".to_string(),
//! };
//!
//! let summary = transfer(store, &request, &TransferOptions::default(), CancellationToken::new()).await?;
//! println!("Archived {} objects", summary.objects);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod constants;
pub mod errors;
pub mod models;
pub mod transfer;
pub mod utils;
