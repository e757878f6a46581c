//! Turning a list of stored objects into one ZIP stream.
//!
//! The [`ArchiveProducer`] opens each object in listing order, copies it into
//! a [`StreamingZipWriter`](crate::utils::streaming_zip::StreamingZipWriter)
//! entry and finalizes the archive. It writes into any `AsyncWrite` sink and
//! knows nothing about where the bytes end up.

pub mod producer;

pub use producer::{entry_name, ArchiveProducer};
