//! Object storage access for the archive pipeline.
//!
//! Everything above this module talks to storage through the [`ObjectStore`]
//! trait; [`S3ObjectStore`] is the production backend and
//! [`MemoryObjectStore`] an in-process stand-in with failure injection.
//!
//! ## Usage Example
//!
//! ```no_run
//! use s3_archiver::cloud::{create_s3_client, ObjectStore, S3ObjectStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = create_s3_client(Some("us-east-1"), None, None)?;
//! let store = S3ObjectStore::with_default_part_size(client);
//!
//! for object in store.list("my-bucket", "logs/2024/").await? {
//!     println!("{} ({} bytes)", object.key, object.size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod memory;
pub mod s3;
pub mod store;

pub use client::{create_s3_client, resolve_region};
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;
pub use store::{ObjectReader, ObjectStore};
