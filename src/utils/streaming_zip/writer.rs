use std::io;

use async_compression::tokio::write::DeflateEncoder;
use async_compression::Level;
use crc32fast::Hasher;
use log::{debug, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::constants::{ZIP_DIR_EXTERNAL_ATTRIBUTES, ZIP_FILE_EXTERNAL_ATTRIBUTES};
use crate::utils::streaming_zip::formats::{
    zip64_local_extra_field, CentralDirectoryHeader, CompressionMethod, DataDescriptor, EndOfCentralDirectoryRecord, FileOptions,
    LocalFileHeader, Zip64EndOfCentralDirectory, ZipEntry, FLAG_DATA_DESCRIPTOR, FLAG_UTF8,
    VERSION_NEEDED, ZIP32_ENTRY_LIMIT, ZIP32_LIMIT, ZIP64_VERSION_NEEDED,
};
use crate::utils::streaming_zip::helpers::{dos_time, CountingWriter};

/// Streaming ZIP writer that creates ZIP archives directly to an output stream.
///
/// The writer never seeks: every entry is written as a local header with
/// general purpose bit 3 set, followed by the (optionally deflated) data and
/// a data descriptor holding the CRC-32 and sizes. The central directory is
/// emitted by [`finish`](Self::finish). Entries must be written one at a time;
/// the borrow held by [`StreamingFileWriter`] enforces that.
///
/// Sizes, offsets and entry counts beyond the 32-bit format limits switch to
/// ZIP64 records automatically. Readers that walk local headers only know an
/// entry's descriptor is 64-bit when the header says so, so entries that may
/// reach 4 GiB should be started with [`FileOptions::large_file`].
pub struct StreamingZipWriter<W: AsyncWrite + Unpin> {
    writer: CountingWriter<W>,
    entries: Vec<ZipEntry>,
}

impl<W: AsyncWrite + Unpin> StreamingZipWriter<W> {
    /// Create a new streaming ZIP writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: CountingWriter::new(writer),
            entries: Vec::new(),
        }
    }

    /// Total bytes emitted so far
    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    /// Number of finished entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Start a new file entry in the ZIP
    pub async fn start_file(
        &mut self,
        name: &str,
        options: FileOptions,
    ) -> io::Result<StreamingFileWriter<'_, W>> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty entry name"));
        }
        if name.len() > u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("entry name is {} bytes long, the limit is {}", name.len(), u16::MAX),
            ));
        }

        let compression_method = options.compression_method.zip_code();
        let (last_mod_time, last_mod_date) = dos_time(options.last_modified);

        let mut flags = FLAG_DATA_DESCRIPTOR;
        if !name.is_ascii() {
            flags |= FLAG_UTF8;
        }

        // CRC and sizes are zero here and follow in the data descriptor
        let large_file = options.large_file;
        let (version_needed, header_size, extra_field) = if large_file {
            (ZIP64_VERSION_NEEDED, u32::MAX, zip64_local_extra_field())
        } else {
            (VERSION_NEEDED, 0, Vec::new())
        };
        let header = LocalFileHeader {
            version_needed,
            bit_flag: flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32: 0,
            compressed_size: header_size,
            uncompressed_size: header_size,
            file_name: name.as_bytes().to_vec(),
            extra_field,
        };

        let offset = self.writer.bytes_written();
        header.write(&mut self.writer).await?;

        let StreamingZipWriter { writer, entries } = self;
        let data_start = writer.bytes_written();
        let sink = match options.compression_method {
            CompressionMethod::Stored => EntrySink::Stored(writer),
            CompressionMethod::Deflated => {
                EntrySink::Deflated(DeflateEncoder::with_quality(writer, Level::Fastest))
            }
        };

        let external_attributes = if name.ends_with('/') {
            ZIP_DIR_EXTERNAL_ATTRIBUTES
        } else {
            ZIP_FILE_EXTERNAL_ATTRIBUTES
        };

        Ok(StreamingFileWriter {
            sink,
            entries,
            name: name.to_string(),
            offset,
            data_start,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            external_attributes,
            large_file,
            crc32: Hasher::new(),
            uncompressed_size: 0,
        })
    }

    /// Add a directory entry to the ZIP
    pub async fn add_directory(&mut self, name: &str, mut options: FileOptions) -> io::Result<()> {
        let dir_name = if name.ends_with('/') {
            name.to_string()
        } else {
            format!("{}/", name)
        };

        options.compression_method = CompressionMethod::Stored;
        let writer = self.start_file(&dir_name, options).await?;
        writer.finish().await?;

        Ok(())
    }

    /// Write the central directory and end records, then hand the sink back.
    ///
    /// The sink is flushed but not shut down; closing it is up to the caller.
    pub async fn finish(mut self) -> io::Result<W> {
        let central_dir_offset = self.writer.bytes_written();

        for entry in &self.entries {
            CentralDirectoryHeader::for_entry(entry)
                .write(&mut self.writer)
                .await?;
        }

        let central_dir_end = self.writer.bytes_written();
        let central_dir_size = central_dir_end - central_dir_offset;
        let total_entries = self.entries.len() as u64;

        if total_entries >= ZIP32_ENTRY_LIMIT
            || central_dir_size >= ZIP32_LIMIT
            || central_dir_offset >= ZIP32_LIMIT
        {
            debug!("Writing ZIP64 end of central directory for {} entries", total_entries);
            Zip64EndOfCentralDirectory {
                total_entries,
                central_dir_size,
                central_dir_offset,
                record_offset: central_dir_end,
            }
            .write(&mut self.writer)
            .await?;
        }

        EndOfCentralDirectoryRecord::new(total_entries, central_dir_size, central_dir_offset)
            .write(&mut self.writer)
            .await?;

        self.writer.flush().await?;

        debug!(
            "Finished ZIP with {} entries, {} bytes",
            total_entries,
            self.writer.bytes_written()
        );

        Ok(self.writer.into_inner())
    }
}

enum EntrySink<'a, W: AsyncWrite + Unpin> {
    Stored(&'a mut CountingWriter<W>),
    Deflated(DeflateEncoder<&'a mut CountingWriter<W>>),
}

impl<'a, W: AsyncWrite + Unpin> EntrySink<'a, W> {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            EntrySink::Stored(writer) => writer.write_all(data).await,
            EntrySink::Deflated(encoder) => encoder.write_all(data).await,
        }
    }

    /// Flush any buffered compressed output and release the archive writer.
    async fn finish(self) -> io::Result<&'a mut CountingWriter<W>> {
        match self {
            EntrySink::Stored(writer) => Ok(writer),
            EntrySink::Deflated(mut encoder) => {
                encoder.shutdown().await?;
                Ok(encoder.into_inner())
            }
        }
    }
}

/// Writer for a single file entry in the ZIP archive.
///
/// Created by [`StreamingZipWriter::start_file`]. Tracks the CRC-32 and
/// uncompressed size of the data; the compressed size is measured on the
/// archive sink. Call [`finish`](Self::finish) to write the data descriptor
/// and record the entry for the central directory. An entry that is dropped
/// without `finish` leaves the archive unusable.
pub struct StreamingFileWriter<'a, W: AsyncWrite + Unpin> {
    sink: EntrySink<'a, W>,
    entries: &'a mut Vec<ZipEntry>,
    name: String,
    offset: u64,
    data_start: u64,
    flags: u16,
    compression_method: u16,
    last_mod_time: u16,
    last_mod_date: u16,
    external_attributes: u32,
    large_file: bool,
    crc32: Hasher,
    uncompressed_size: u64,
}

impl<'a, W: AsyncWrite + Unpin> StreamingFileWriter<'a, W> {
    /// Write data to the file entry
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.crc32.update(data);
        self.uncompressed_size += data.len() as u64;
        self.sink.write_all(data).await
    }

    /// Uncompressed bytes written to this entry so far
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Finish the file entry and add it to the central directory.
    pub async fn finish(self) -> io::Result<()> {
        let StreamingFileWriter {
            sink,
            entries,
            name,
            offset,
            data_start,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            external_attributes,
            large_file,
            crc32,
            uncompressed_size,
        } = self;

        let writer = sink.finish().await?;
        let compressed_size = writer.bytes_written() - data_start;
        let crc32 = crc32.finalize();

        if !large_file && (compressed_size >= ZIP32_LIMIT || uncompressed_size >= ZIP32_LIMIT) {
            warn!(
                "Entry {} grew past 4 GiB without a ZIP64 local header; only central directory readers will find it",
                name
            );
        }

        DataDescriptor {
            crc32,
            compressed_size,
            uncompressed_size,
            zip64: large_file,
        }
        .write(writer)
        .await?;

        debug!(
            "Finished entry {} ({} -> {} bytes, crc {:08x})",
            name, uncompressed_size, compressed_size, crc32
        );

        entries.push(ZipEntry {
            name,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            offset,
            external_attributes,
            large_file,
        });

        Ok(())
    }
}
