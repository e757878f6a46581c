use std::io;
use std::time::SystemTime;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::constants::{
    ZIP_CENTRAL_DIR_HEADER_SIGNATURE as CENTRAL_DIR_HEADER_SIGNATURE,
    ZIP_DATA_DESCRIPTOR_SIGNATURE as DATA_DESCRIPTOR_SIGNATURE,
    ZIP_END_OF_CENTRAL_DIR_SIGNATURE as END_OF_CENTRAL_DIR_SIGNATURE,
    ZIP_LOCAL_FILE_HEADER_SIGNATURE as LOCAL_FILE_HEADER_SIGNATURE,
    ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE, ZIP64_END_OF_CENTRAL_DIR_SIGNATURE,
    ZIP64_EXTRA_FIELD_TAG,
};

// Re-export these constants publicly
pub use crate::constants::{
    ZIP_COMPRESSION_METHOD_DEFLATE as COMPRESSION_METHOD_DEFLATE,
    ZIP_COMPRESSION_METHOD_STORE as COMPRESSION_METHOD_STORE,
    ZIP_FLAG_DATA_DESCRIPTOR as FLAG_DATA_DESCRIPTOR, ZIP_FLAG_UTF8 as FLAG_UTF8,
    ZIP_VERSION_MADE_BY as VERSION_MADE_BY, ZIP_VERSION_NEEDED as VERSION_NEEDED,
    ZIP64_VERSION_NEEDED,
};

/// Sizes and offsets at or above this value need ZIP64 fields.
pub const ZIP32_LIMIT: u64 = u32::MAX as u64;

/// Entry counts at or above this value need a ZIP64 end record.
pub const ZIP32_ENTRY_LIMIT: u64 = u16::MAX as u64;

/// Central directory information kept for each finished entry
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub offset: u64,
    pub external_attributes: u32,
    /// The local header already announced ZIP64 sizes
    pub large_file: bool,
}

impl ZipEntry {
    pub fn needs_zip64(&self) -> bool {
        self.large_file
            || self.compressed_size >= ZIP32_LIMIT
            || self.uncompressed_size >= ZIP32_LIMIT
            || self.offset >= ZIP32_LIMIT
    }
}

/// File options for ZIP entries
#[derive(Debug, Clone)]
pub struct FileOptions {
    pub compression_method: CompressionMethod,
    pub last_modified: Option<SystemTime>,
    /// Entry may reach 4 GiB. The local header then carries a ZIP64 extra
    /// field and the data descriptor uses 64-bit sizes.
    pub large_file: bool,
}

/// Compression methods
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CompressionMethod {
    Stored,
    /// Deflate at the fastest level
    Deflated,
}

impl CompressionMethod {
    pub fn zip_code(self) -> u16 {
        match self {
            CompressionMethod::Stored => COMPRESSION_METHOD_STORE,
            CompressionMethod::Deflated => COMPRESSION_METHOD_DEFLATE,
        }
    }
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::Deflated,
            last_modified: None,
            large_file: false,
        }
    }
}

/// Local file header structure
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub bit_flag: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
}

impl LocalFileHeader {
    pub fn encode(&self) -> BytesMut {
        let mut bytes = BytesMut::with_capacity(30 + self.file_name.len() + self.extra_field.len());

        bytes.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&self.version_needed.to_le_bytes());
        bytes.extend_from_slice(&self.bit_flag.to_le_bytes());
        bytes.extend_from_slice(&self.compression_method.to_le_bytes());
        bytes.extend_from_slice(&self.last_mod_time.to_le_bytes());
        bytes.extend_from_slice(&self.last_mod_date.to_le_bytes());
        bytes.extend_from_slice(&self.crc32.to_le_bytes());
        bytes.extend_from_slice(&self.compressed_size.to_le_bytes());
        bytes.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        bytes.extend_from_slice(&(self.file_name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(self.extra_field.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&self.file_name);
        bytes.extend_from_slice(&self.extra_field);

        bytes
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<u64> {
        let bytes = self.encode();
        writer.write_all(&bytes).await?;
        Ok(bytes.len() as u64)
    }
}

/// Data descriptor written after the entry data, carrying the CRC and sizes
/// that were unknown when the local header went out.
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Forces 64-bit sizes, required when the local header was ZIP64
    pub zip64: bool,
}

impl DataDescriptor {
    pub fn is_zip64(&self) -> bool {
        self.zip64
            || self.compressed_size >= ZIP32_LIMIT || self.uncompressed_size >= ZIP32_LIMIT
    }

    pub fn encode(&self) -> BytesMut {
        let mut bytes = BytesMut::with_capacity(24);

        bytes.extend_from_slice(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&self.crc32.to_le_bytes());

        if self.is_zip64() {
            bytes.extend_from_slice(&self.compressed_size.to_le_bytes());
            bytes.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        } else {
            bytes.extend_from_slice(&(self.compressed_size as u32).to_le_bytes());
            bytes.extend_from_slice(&(self.uncompressed_size as u32).to_le_bytes());
        }

        bytes
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<u64> {
        let bytes = self.encode();
        writer.write_all(&bytes).await?;
        Ok(bytes.len() as u64)
    }
}

/// Central directory header structure
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub bit_flag: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number_start: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub local_header_offset: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub file_comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    /// Build the central directory record for a finished entry, switching to
    /// ZIP64 fields when any size or the offset does not fit in 32 bits.
    pub fn for_entry(entry: &ZipEntry) -> Self {
        let (version_needed, compressed_size, uncompressed_size, local_header_offset, extra_field) =
            if entry.needs_zip64() {
                (
                    ZIP64_VERSION_NEEDED,
                    u32::MAX,
                    u32::MAX,
                    u32::MAX,
                    zip64_extra_field(entry.uncompressed_size, entry.compressed_size, entry.offset),
                )
            } else {
                (
                    VERSION_NEEDED,
                    entry.compressed_size as u32,
                    entry.uncompressed_size as u32,
                    entry.offset as u32,
                    Vec::new(),
                )
            };

        Self {
            version_made_by: VERSION_MADE_BY,
            version_needed,
            bit_flag: entry.flags,
            compression_method: entry.compression_method,
            last_mod_time: entry.last_mod_time,
            last_mod_date: entry.last_mod_date,
            crc32: entry.crc32,
            compressed_size,
            uncompressed_size,
            disk_number_start: 0,
            internal_file_attributes: 0,
            external_file_attributes: entry.external_attributes,
            local_header_offset,
            file_name: entry.name.as_bytes().to_vec(),
            extra_field,
            file_comment: Vec::new(),
        }
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<u64> {
        let mut bytes = BytesMut::new();

        // Signature
        bytes.extend_from_slice(&CENTRAL_DIR_HEADER_SIGNATURE.to_le_bytes());

        // Version made by / needed
        bytes.extend_from_slice(&self.version_made_by.to_le_bytes());
        bytes.extend_from_slice(&self.version_needed.to_le_bytes());

        bytes.extend_from_slice(&self.bit_flag.to_le_bytes());
        bytes.extend_from_slice(&self.compression_method.to_le_bytes());

        // Last mod time and date
        bytes.extend_from_slice(&self.last_mod_time.to_le_bytes());
        bytes.extend_from_slice(&self.last_mod_date.to_le_bytes());

        bytes.extend_from_slice(&self.crc32.to_le_bytes());
        bytes.extend_from_slice(&self.compressed_size.to_le_bytes());
        bytes.extend_from_slice(&self.uncompressed_size.to_le_bytes());

        // Variable field lengths
        bytes.extend_from_slice(&(self.file_name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(self.extra_field.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(self.file_comment.len() as u16).to_le_bytes());

        bytes.extend_from_slice(&self.disk_number_start.to_le_bytes());
        bytes.extend_from_slice(&self.internal_file_attributes.to_le_bytes());
        bytes.extend_from_slice(&self.external_file_attributes.to_le_bytes());
        bytes.extend_from_slice(&self.local_header_offset.to_le_bytes());

        bytes.extend_from_slice(&self.file_name);
        bytes.extend_from_slice(&self.extra_field);
        bytes.extend_from_slice(&self.file_comment);

        writer.write_all(&bytes).await?;

        Ok(bytes.len() as u64)
    }
}

/// ZIP64 extended information extra field with all three 64-bit values.
pub fn zip64_extra_field(uncompressed_size: u64, compressed_size: u64, offset: u64) -> Vec<u8> {
    let mut field = Vec::with_capacity(28);
    field.extend_from_slice(&ZIP64_EXTRA_FIELD_TAG.to_le_bytes());
    field.extend_from_slice(&24u16.to_le_bytes());
    field.extend_from_slice(&uncompressed_size.to_le_bytes());
    field.extend_from_slice(&compressed_size.to_le_bytes());
    field.extend_from_slice(&offset.to_le_bytes());
    field
}

/// ZIP64 extra field for a local header written before the sizes are known.
/// Both sizes are zero; the real values follow in the data descriptor.
pub fn zip64_local_extra_field() -> Vec<u8> {
    let mut field = Vec::with_capacity(20);
    field.extend_from_slice(&ZIP64_EXTRA_FIELD_TAG.to_le_bytes());
    field.extend_from_slice(&16u16.to_le_bytes());
    field.extend_from_slice(&0u64.to_le_bytes());
    field.extend_from_slice(&0u64.to_le_bytes());
    field
}

/// ZIP64 end of central directory record plus its locator.
pub struct Zip64EndOfCentralDirectory {
    pub total_entries: u64,
    pub central_dir_size: u64,
    pub central_dir_offset: u64,
    /// Offset at which this record itself starts
    pub record_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub fn encode(&self) -> BytesMut {
        let mut bytes = BytesMut::with_capacity(76);

        // Record
        bytes.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIR_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&44u64.to_le_bytes());
        bytes.extend_from_slice(&VERSION_MADE_BY.to_le_bytes());
        bytes.extend_from_slice(&ZIP64_VERSION_NEEDED.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&self.total_entries.to_le_bytes());
        bytes.extend_from_slice(&self.total_entries.to_le_bytes());
        bytes.extend_from_slice(&self.central_dir_size.to_le_bytes());
        bytes.extend_from_slice(&self.central_dir_offset.to_le_bytes());

        // Locator
        bytes.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&self.record_offset.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());

        bytes
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<u64> {
        let bytes = self.encode();
        writer.write_all(&bytes).await?;
        Ok(bytes.len() as u64)
    }
}

/// End of central directory record structure
pub struct EndOfCentralDirectoryRecord {
    pub disk_number: u16,
    pub central_dir_disk: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub central_dir_size: u32,
    pub central_dir_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectoryRecord {
    /// Build the record, saturating fields that moved to the ZIP64 record.
    pub fn new(total_entries: u64, central_dir_size: u64, central_dir_offset: u64) -> Self {
        let entries = total_entries.min(ZIP32_ENTRY_LIMIT) as u16;
        Self {
            disk_number: 0,
            central_dir_disk: 0,
            disk_entries: entries,
            total_entries: entries,
            central_dir_size: central_dir_size.min(ZIP32_LIMIT) as u32,
            central_dir_offset: central_dir_offset.min(ZIP32_LIMIT) as u32,
            comment: Vec::new(),
        }
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<u64> {
        let mut bytes = BytesMut::new();

        bytes.extend_from_slice(&END_OF_CENTRAL_DIR_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&self.disk_number.to_le_bytes());
        bytes.extend_from_slice(&self.central_dir_disk.to_le_bytes());
        bytes.extend_from_slice(&self.disk_entries.to_le_bytes());
        bytes.extend_from_slice(&self.total_entries.to_le_bytes());
        bytes.extend_from_slice(&self.central_dir_size.to_le_bytes());
        bytes.extend_from_slice(&self.central_dir_offset.to_le_bytes());
        bytes.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&self.comment);

        writer.write_all(&bytes).await?;

        Ok(bytes.len() as u64)
    }
}
