use std::time::Duration;

use anyhow::{bail, Result};
use log::warn;

use crate::cli::Args;
use crate::constants::{S3_MIN_PART_SIZE, S3_UPLOAD_CHUNK_SIZE};
use crate::models::TransferRequest;
use crate::transfer::TransferOptions;

const MIB: usize = 1024 * 1024;
const KIB: usize = 1024;

/// Everything one run of the binary needs, validated.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub request: TransferRequest,
    pub options: TransferOptions,
    /// Multipart part size in bytes
    pub part_size: usize,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub profile: Option<String>,
}

impl TransferConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        if args.source_bucket.trim().is_empty() {
            bail!("--source-bucket must not be empty");
        }
        if args.dest_bucket.trim().is_empty() {
            bail!("--dest-bucket must not be empty");
        }
        if args.dest_key.trim().is_empty() {
            bail!("--dest-key must not be empty");
        }
        if args.pipe_buffer == 0 {
            bail!("--pipe-buffer must be at least 1 KiB");
        }

        let part_size = match args.part_size.checked_mul(MIB) {
            Some(size) if size >= S3_MIN_PART_SIZE => size,
            Some(_) => {
                warn!(
                    "Part size of {} MiB is below the S3 minimum, using {} MiB",
                    args.part_size,
                    S3_MIN_PART_SIZE / MIB
                );
                S3_MIN_PART_SIZE
            }
            None => {
                warn!("Part size of {} MiB is too large, using the default", args.part_size);
                S3_UPLOAD_CHUNK_SIZE
            }
        };

        let timeout = match args.timeout {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            request: TransferRequest {
                source_bucket: args.source_bucket.clone(),
                source_prefix: args.source_prefix.clone(),
                dest_bucket: args.dest_bucket.clone(),
                dest_key: args.dest_key.clone(),
            },
            options: TransferOptions {
                pipe_capacity: args.pipe_buffer.saturating_mul(KIB),
                compression: args.compression.into(),
                timeout,
                ..TransferOptions::default()
            },
            part_size,
            region: args.region.clone(),
            endpoint: args.endpoint.clone(),
            profile: args.profile.clone(),
        })
    }
}
