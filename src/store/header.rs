//! Container header load, save, and validation.
//!
//! The first 128 bytes of every container hold the [`Header`]: format magic
//! and version, the configured page size and algorithm names, the logical
//! page count, size accounting, and a CRC32 over the first 124 bytes. The
//! header is rewritten on every sync that changed it; the checksum makes a
//! torn header write detectable at the next open.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::store::checksum::crc32;
use crate::store::constants::*;
use crate::{CcvfsError, Result};

/// Parsed container header.
#[derive(Debug, Clone, Serialize)]
pub struct Header {
    /// Major format version; readers reject a skew here.
    pub version_major: u16,
    /// Minor format version; informational.
    pub version_minor: u16,
    /// The host engine's own page size, 0 if unknown.
    pub source_page_size: u32,
    /// Host engine version tag, opaque to this crate.
    pub host_version: u32,
    /// Number of logical pages currently in use.
    pub total_pages: u32,
    /// Configured compression algorithm, if any.
    pub compression: Option<String>,
    /// Configured encryption algorithm, if any.
    pub encryption: Option<String>,
    /// Configured logical page size.
    pub page_size: u32,
    /// Absolute offset of the index table (always 128).
    pub index_offset: u64,
    /// Logical size in bytes (`total_pages * page_size` at last save).
    pub original_size: u64,
    /// Bytes consumed in the data region.
    pub physical_size: u64,
    /// `physical_size * 100 / original_size`, percent.
    pub compress_ratio: u32,
    /// Creation flags recorded when the container was formatted.
    pub creation_flags: u32,
    /// Truncated SHA-256 of the encryption key; 0 when no key.
    pub key_hash: u32,
    /// Creation timestamp, unix seconds.
    pub created_at: u64,
    /// Last assigned extent sequence number.
    pub sequence: u64,
}

/// Truncated SHA-256 key digest stored in the header.
///
/// Lets an open with the wrong key fail up front with `KeyMismatch`
/// instead of failing page checksums one at a time.
pub fn key_hash(key: &[u8]) -> u32 {
    let digest = Sha256::digest(key);
    LittleEndian::read_u32(&digest[..4])
}

fn write_name(buf: &mut [u8], name: Option<&str>) {
    for b in buf.iter_mut() {
        *b = 0;
    }
    if let Some(name) = name {
        let bytes = name.as_bytes();
        buf[..bytes.len()].copy_from_slice(bytes);
    }
}

fn read_name(buf: &[u8]) -> Result<Option<String>> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    if end == 0 {
        return Ok(None);
    }
    let name = std::str::from_utf8(&buf[..end])
        .map_err(|_| CcvfsError::CorruptHeader("algorithm name is not UTF-8".to_string()))?;
    Ok(Some(name.to_string()))
}

impl Header {
    /// Build the header for a freshly formatted container.
    pub fn new(
        page_size: u32,
        compression: Option<String>,
        encryption: Option<String>,
        key: Option<&[u8]>,
        creation_flags: u32,
        created_at: u64,
    ) -> Self {
        Header {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            source_page_size: 0,
            host_version: 0,
            total_pages: 0,
            compression,
            encryption,
            page_size,
            index_offset: INDEX_OFFSET,
            original_size: 0,
            physical_size: 0,
            compress_ratio: 100,
            creation_flags,
            key_hash: key.map(key_hash).unwrap_or(0),
            created_at,
            sequence: 0,
        }
    }

    /// Serialize to the on-disk 128-byte form, checksum included.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[HDR_MAGIC..HDR_MAGIC + 8].copy_from_slice(CONTAINER_MAGIC);
        LittleEndian::write_u16(&mut buf[HDR_VERSION_MAJOR..], self.version_major);
        LittleEndian::write_u16(&mut buf[HDR_VERSION_MINOR..], self.version_minor);
        LittleEndian::write_u32(&mut buf[HDR_HEADER_SIZE..], HEADER_SIZE as u32);
        LittleEndian::write_u32(&mut buf[HDR_SOURCE_PAGE_SIZE..], self.source_page_size);
        LittleEndian::write_u32(&mut buf[HDR_HOST_VERSION..], self.host_version);
        LittleEndian::write_u32(&mut buf[HDR_TOTAL_PAGES..], self.total_pages);
        write_name(
            &mut buf[HDR_COMPRESSION..HDR_COMPRESSION + ALGORITHM_NAME_MAX],
            self.compression.as_deref(),
        );
        write_name(
            &mut buf[HDR_ENCRYPTION..HDR_ENCRYPTION + ALGORITHM_NAME_MAX],
            self.encryption.as_deref(),
        );
        LittleEndian::write_u32(&mut buf[HDR_PAGE_SIZE..], self.page_size);
        LittleEndian::write_u64(&mut buf[HDR_INDEX_OFFSET..], self.index_offset);
        LittleEndian::write_u64(&mut buf[HDR_ORIGINAL_SIZE..], self.original_size);
        LittleEndian::write_u64(&mut buf[HDR_PHYSICAL_SIZE..], self.physical_size);
        LittleEndian::write_u32(&mut buf[HDR_COMPRESS_RATIO..], self.compress_ratio);
        LittleEndian::write_u32(&mut buf[HDR_CREATION_FLAGS..], self.creation_flags);
        LittleEndian::write_u32(&mut buf[HDR_KEY_HASH..], self.key_hash);
        LittleEndian::write_u64(&mut buf[HDR_CREATED_AT..], self.created_at);
        LittleEndian::write_u64(&mut buf[HDR_SEQUENCE..], self.sequence);
        let checksum = crc32(&buf[..HDR_CHECKSUM_COVERAGE]);
        LittleEndian::write_u32(&mut buf[HDR_CHECKSUM..], checksum);
        buf
    }

    /// Parse and validate a 128-byte header image.
    ///
    /// With `strict` set, a checksum mismatch is `CorruptHeader`; otherwise
    /// it is logged and the header is accepted as-is.
    pub fn parse(buf: &[u8], strict: bool) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CcvfsError::NotCcvfs(format!(
                "file too small for a container header: {} bytes",
                buf.len()
            )));
        }
        if &buf[HDR_MAGIC..HDR_MAGIC + 8] != CONTAINER_MAGIC {
            return Err(CcvfsError::NotCcvfs("magic mismatch".to_string()));
        }

        let version_major = LittleEndian::read_u16(&buf[HDR_VERSION_MAJOR..]);
        if version_major != VERSION_MAJOR {
            return Err(CcvfsError::VersionMismatch {
                file_major: version_major,
                supported_major: VERSION_MAJOR,
            });
        }

        let stored = LittleEndian::read_u32(&buf[HDR_CHECKSUM..]);
        let computed = crc32(&buf[..HDR_CHECKSUM_COVERAGE]);
        if stored != computed {
            if strict {
                return Err(CcvfsError::CorruptHeader(format!(
                    "checksum mismatch: stored 0x{:08X}, computed 0x{:08X}",
                    stored, computed
                )));
            }
            log::warn!(
                "container header checksum mismatch (stored 0x{:08X}, computed 0x{:08X}), continuing",
                stored,
                computed
            );
        }

        let header_size = LittleEndian::read_u32(&buf[HDR_HEADER_SIZE..]);
        if header_size != HEADER_SIZE as u32 {
            return Err(CcvfsError::CorruptHeader(format!(
                "unexpected header size {}",
                header_size
            )));
        }

        let page_size = LittleEndian::read_u32(&buf[HDR_PAGE_SIZE..]);
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(CcvfsError::CorruptHeader(format!(
                "invalid page size {}",
                page_size
            )));
        }

        let index_offset = LittleEndian::read_u64(&buf[HDR_INDEX_OFFSET..]);
        if index_offset != INDEX_OFFSET {
            return Err(CcvfsError::CorruptHeader(format!(
                "unexpected index offset {}",
                index_offset
            )));
        }

        let total_pages = LittleEndian::read_u32(&buf[HDR_TOTAL_PAGES..]);
        if total_pages > MAX_PAGES {
            return Err(CcvfsError::CorruptHeader(format!(
                "page count {} exceeds format capacity {}",
                total_pages, MAX_PAGES
            )));
        }

        Ok(Header {
            version_major,
            version_minor: LittleEndian::read_u16(&buf[HDR_VERSION_MINOR..]),
            source_page_size: LittleEndian::read_u32(&buf[HDR_SOURCE_PAGE_SIZE..]),
            host_version: LittleEndian::read_u32(&buf[HDR_HOST_VERSION..]),
            total_pages,
            compression: read_name(&buf[HDR_COMPRESSION..HDR_COMPRESSION + ALGORITHM_NAME_MAX])?,
            encryption: read_name(&buf[HDR_ENCRYPTION..HDR_ENCRYPTION + ALGORITHM_NAME_MAX])?,
            page_size,
            index_offset,
            original_size: LittleEndian::read_u64(&buf[HDR_ORIGINAL_SIZE..]),
            physical_size: LittleEndian::read_u64(&buf[HDR_PHYSICAL_SIZE..]),
            compress_ratio: LittleEndian::read_u32(&buf[HDR_COMPRESS_RATIO..]),
            creation_flags: LittleEndian::read_u32(&buf[HDR_CREATION_FLAGS..]),
            key_hash: LittleEndian::read_u32(&buf[HDR_KEY_HASH..]),
            created_at: LittleEndian::read_u64(&buf[HDR_CREATED_AT..]),
            sequence: LittleEndian::read_u64(&buf[HDR_SEQUENCE..]),
        })
    }

    /// Read and validate the header from the start of `file`.
    pub fn load<R: Read + Seek>(file: &mut R, strict: bool) -> Result<Self> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| CcvfsError::Io(format!("Cannot seek to header: {}", e)))?;
        let mut buf = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(CcvfsError::NotCcvfs(format!(
                        "file too small for a container header: {} bytes",
                        filled
                    )))
                }
                Ok(n) => filled += n,
                Err(e) => return Err(CcvfsError::Io(format!("Cannot read header: {}", e))),
            }
        }
        Header::parse(&buf, strict)
    }

    /// Recompute the checksum and write the header at offset 0.
    pub fn save<W: Write + Seek>(&self, file: &mut W) -> Result<()> {
        let buf = self.to_bytes();
        file.seek(SeekFrom::Start(0))
            .map_err(|e| CcvfsError::Io(format!("Cannot seek to header: {}", e)))?;
        file.write_all(&buf)
            .map_err(|e| CcvfsError::Io(format!("Cannot write header: {}", e)))?;
        Ok(())
    }

    /// Refresh `original_size`, `physical_size`, and the ratio field.
    pub fn update_sizes(&mut self, physical_size: u64) {
        self.original_size = self.total_pages as u64 * self.page_size as u64;
        self.physical_size = physical_size;
        self.compress_ratio = if self.original_size > 0 {
            ((self.physical_size.saturating_mul(100)) / self.original_size) as u32
        } else {
            100
        };
    }
}
