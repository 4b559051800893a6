//! ZIP record layouts and serialization primitives.
//!
//! All multi-byte fields are little-endian. Entries are written in streaming
//! form: general purpose flag bit 3 defers CRC and sizes to a data descriptor
//! that follows the entry body, so nothing has to be seeked back over.

use chrono::{Datelike, NaiveDateTime, Timelike};

/// Local file header signature (`PK\x03\x04`).
pub const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4b50;
/// Data descriptor signature (`PK\x07\x08`).
pub const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
/// Central directory file header signature (`PK\x01\x02`).
pub const CENTRAL_DIRECTORY_SIG: u32 = 0x0201_4b50;
/// End of central directory record signature (`PK\x05\x06`).
pub const END_OF_CENTRAL_DIRECTORY_SIG: u32 = 0x0605_4b50;

/// Version needed to extract: 2.0 (deflate, data descriptors).
const VERSION_NEEDED: u16 = 20;
/// Version made by: host 3 (Unix) in the high byte, ZIP 2.0 in the low.
const VERSION_MADE_BY: u16 = (3 << 8) | 20;
/// Flags: bit 3 (sizes in data descriptor) and bit 11 (UTF-8 names).
const FLAGS: u16 = (1 << 3) | (1 << 11);
/// Compression method 8: deflate.
const METHOD_DEFLATE: u16 = 8;
/// External attributes: regular file, mode 0644.
const EXTERNAL_ATTRS: u32 = 0o100644 << 16;

/// Size of a data descriptor including its signature.
pub const DATA_DESCRIPTOR_LEN: usize = 16;
/// Size of the end of central directory record without a comment.
pub const END_OF_CENTRAL_DIRECTORY_LEN: usize = 22;

/// MS-DOS date and time as stored in ZIP headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosTimestamp {
    /// Packed time: hour << 11 | minute << 5 | second / 2.
    pub time: u16,
    /// Packed date: (year - 1980) << 9 | month << 5 | day.
    pub date: u16,
}

impl DosTimestamp {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    pub const EPOCH: DosTimestamp = DosTimestamp {
        time: 0,
        date: (1 << 5) | 1,
    };

    /// Convert a calendar time. Years outside 1980..=2107 clamp to the range ends.
    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        if dt.year() < 1980 {
            return Self::EPOCH;
        }
        if dt.year() > 2107 {
            return Self {
                time: (23 << 11) | (59 << 5) | 29,
                date: (127 << 9) | (12 << 5) | 31,
            };
        }

        let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
        let date = (((dt.year() - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
        Self { time, date }
    }

    /// The current local time.
    pub fn now() -> Self {
        Self::from_datetime(chrono::Local::now().naive_local())
    }
}

/// Metadata for one completed entry, as needed by the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralEntry {
    /// Entry name (UTF-8).
    pub name: String,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Deflated size in bytes.
    pub compressed_size: u32,
    /// Original size in bytes.
    pub uncompressed_size: u32,
    /// Offset of the entry's local header from the start of the archive.
    pub local_header_offset: u32,
    /// Modification time.
    pub modified: DosTimestamp,
}

// ---------------------------------------------------------------------------
// Record writers
// ---------------------------------------------------------------------------

/// Local file header with CRC and sizes left zero (they follow in the
/// data descriptor).
///
/// `name` must fit the 16-bit length field; [`ArchiveWriter::append`](crate::ArchiveWriter::append)
/// refuses longer names before calling this.
pub fn local_file_header(name: &str, modified: DosTimestamp) -> Vec<u8> {
    let name = name.as_bytes();
    let mut out = Vec::with_capacity(30 + name.len());
    out.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
    out.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
    out.extend_from_slice(&FLAGS.to_le_bytes());
    out.extend_from_slice(&METHOD_DEFLATE.to_le_bytes());
    out.extend_from_slice(&modified.time.to_le_bytes());
    out.extend_from_slice(&modified.date.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // crc-32
    out.extend_from_slice(&0u32.to_le_bytes()); // compressed size
    out.extend_from_slice(&0u32.to_le_bytes()); // uncompressed size
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // extra field length
    out.extend_from_slice(name);
    out
}

/// Data descriptor following an entry body.
pub fn data_descriptor(crc32: u32, compressed_size: u32, uncompressed_size: u32) -> [u8; DATA_DESCRIPTOR_LEN] {
    let mut out = [0u8; DATA_DESCRIPTOR_LEN];
    out[0..4].copy_from_slice(&DATA_DESCRIPTOR_SIG.to_le_bytes());
    out[4..8].copy_from_slice(&crc32.to_le_bytes());
    out[8..12].copy_from_slice(&compressed_size.to_le_bytes());
    out[12..16].copy_from_slice(&uncompressed_size.to_le_bytes());
    out
}

/// Central directory file header for a completed entry.
pub fn central_directory_header(entry: &CentralEntry) -> Vec<u8> {
    let name = entry.name.as_bytes();
    let mut out = Vec::with_capacity(46 + name.len());
    out.extend_from_slice(&CENTRAL_DIRECTORY_SIG.to_le_bytes());
    out.extend_from_slice(&VERSION_MADE_BY.to_le_bytes());
    out.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
    out.extend_from_slice(&FLAGS.to_le_bytes());
    out.extend_from_slice(&METHOD_DEFLATE.to_le_bytes());
    out.extend_from_slice(&entry.modified.time.to_le_bytes());
    out.extend_from_slice(&entry.modified.date.to_le_bytes());
    out.extend_from_slice(&entry.crc32.to_le_bytes());
    out.extend_from_slice(&entry.compressed_size.to_le_bytes());
    out.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // extra field length
    out.extend_from_slice(&0u16.to_le_bytes()); // comment length
    out.extend_from_slice(&0u16.to_le_bytes()); // disk number start
    out.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
    out.extend_from_slice(&EXTERNAL_ATTRS.to_le_bytes());
    out.extend_from_slice(&entry.local_header_offset.to_le_bytes());
    out.extend_from_slice(name);
    out
}

/// End of central directory record (single disk, no comment).
pub fn end_of_central_directory(
    entry_count: u16,
    directory_size: u32,
    directory_offset: u32,
) -> [u8; END_OF_CENTRAL_DIRECTORY_LEN] {
    let mut out = [0u8; END_OF_CENTRAL_DIRECTORY_LEN];
    out[0..4].copy_from_slice(&END_OF_CENTRAL_DIRECTORY_SIG.to_le_bytes());
    // bytes 4..8: this disk / directory start disk, both 0
    out[8..10].copy_from_slice(&entry_count.to_le_bytes());
    out[10..12].copy_from_slice(&entry_count.to_le_bytes());
    out[12..16].copy_from_slice(&directory_size.to_le_bytes());
    out[16..20].copy_from_slice(&directory_offset.to_le_bytes());
    // bytes 20..22: comment length 0
    out
}

/// Whether `bytes` ends with an end of central directory record.
///
/// Only recognises the comment-less record this crate writes.
pub fn has_trailer(bytes: &[u8]) -> bool {
    bytes.len() >= END_OF_CENTRAL_DIRECTORY_LEN
        && bytes[bytes.len() - END_OF_CENTRAL_DIRECTORY_LEN..][..4]
            == END_OF_CENTRAL_DIRECTORY_SIG.to_le_bytes()
}
