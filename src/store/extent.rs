//! On-disk extent header.
//!
//! Every stored page begins with a 32-byte [`ExtentHeader`] carrying enough
//! to identify and decode the payload without the index: the logical page
//! number, sizes, plaintext CRC32, flags, a wall-clock stamp, and the
//! per-file write sequence number recovery uses to pick the newest of two
//! extents claiming the same page.

use byteorder::{ByteOrder, LittleEndian};

use crate::store::constants::*;
use crate::Result;

/// Parsed 32-byte extent header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentHeader {
    /// Logical page number this extent backs.
    pub page_no: u32,
    /// Plaintext page size in bytes.
    pub original_size: u32,
    /// Stored payload size in bytes.
    pub compressed_size: u32,
    /// CRC32 of the plaintext page.
    pub checksum: u32,
    /// COMPRESSED / ENCRYPTED / SPARSE bits plus the compression level.
    pub flags: u32,
    /// Wall-clock write time, unix seconds.
    pub timestamp: u32,
    /// Per-file monotonic write sequence number.
    pub sequence: u32,
}

impl ExtentHeader {
    /// Parse an extent header, returning `None` on a magic mismatch.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < EXTENT_HEADER_SIZE || &buf[EXT_MAGIC..EXT_MAGIC + 4] != EXTENT_MAGIC {
            return None;
        }
        Some(ExtentHeader {
            page_no: LittleEndian::read_u32(&buf[EXT_PAGE_NO..]),
            original_size: LittleEndian::read_u32(&buf[EXT_ORIGINAL_SIZE..]),
            compressed_size: LittleEndian::read_u32(&buf[EXT_COMPRESSED_SIZE..]),
            checksum: LittleEndian::read_u32(&buf[EXT_CHECKSUM..]),
            flags: LittleEndian::read_u32(&buf[EXT_FLAGS..]),
            timestamp: LittleEndian::read_u32(&buf[EXT_TIMESTAMP..]),
            sequence: LittleEndian::read_u32(&buf[EXT_SEQUENCE..]),
        })
    }

    /// Serialize to the on-disk 32-byte form.
    pub fn to_bytes(&self) -> [u8; EXTENT_HEADER_SIZE] {
        let mut buf = [0u8; EXTENT_HEADER_SIZE];
        buf[EXT_MAGIC..EXT_MAGIC + 4].copy_from_slice(EXTENT_MAGIC);
        LittleEndian::write_u32(&mut buf[EXT_PAGE_NO..], self.page_no);
        LittleEndian::write_u32(&mut buf[EXT_ORIGINAL_SIZE..], self.original_size);
        LittleEndian::write_u32(&mut buf[EXT_COMPRESSED_SIZE..], self.compressed_size);
        LittleEndian::write_u32(&mut buf[EXT_CHECKSUM..], self.checksum);
        LittleEndian::write_u32(&mut buf[EXT_FLAGS..], self.flags);
        LittleEndian::write_u32(&mut buf[EXT_TIMESTAMP..], self.timestamp);
        LittleEndian::write_u32(&mut buf[EXT_SEQUENCE..], self.sequence);
        buf
    }

    /// The cipher nonce for this extent: page number and sequence packed
    /// into one u64, unique per stored extent.
    pub fn nonce(page_no: u32, sequence: u32) -> u64 {
        (page_no as u64) << 32 | sequence as u64
    }

    /// Total on-disk footprint, header included.
    pub fn extent_len(&self) -> u64 {
        EXTENT_HEADER_SIZE as u64 + self.compressed_size as u64
    }
}

/// Sanity used by `Result`-returning callers; kept separate so `parse`
/// stays `Option` like other header parsers in this crate.
pub fn require(parsed: Option<ExtentHeader>, page_no: u32) -> Result<ExtentHeader> {
    parsed.ok_or_else(|| crate::CcvfsError::CorruptPage {
        page: page_no,
        detail: "bad extent magic".to_string(),
    })
}
