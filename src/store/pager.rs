//! Page I/O core.
//!
//! [`PageStore`] owns one open container: the header, the index, the hole
//! allocator, the write buffer, and the resolved codec. It translates the
//! host's byte-offset reads and writes into whole logical pages, drives
//! the encode/decode pipeline, and keeps the container invariants: one
//! extent per allocated page, index and extent checksums equal to the
//! plaintext CRC32, and a strictly increasing extent sequence.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::store::alloc::{AllocatorStats, HoleAllocator};
use crate::store::buffer::{BufferStats, BufferedPage, WriteBuffer};
use crate::store::codec::Codec;
use crate::store::config::VfsConfig;
use crate::store::constants::*;
use crate::store::extent::{self, ExtentHeader};
use crate::store::header::{key_hash, Header};
use crate::store::index::{IndexEntry, PageIndex};
use crate::store::registry::{find_cipher, find_compressor};
use crate::{CcvfsError, Result};

/// How much durability a sync must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncLevel {
    /// Data and metadata (`fsync`).
    Full,
    /// Data only where the platform distinguishes (`fdatasync`).
    DataOnly,
}

/// Engine counters and size accounting, exposed through file control.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Logical pages in use.
    pub total_pages: u32,
    /// Configured logical page size.
    pub page_size: u32,
    /// Logical size in bytes.
    pub original_size: u64,
    /// Bytes used by extents in the data region.
    pub physical_size: u64,
    /// `physical_size * 100 / original_size`, percent.
    pub compress_ratio: u32,
    /// Host read calls served.
    pub read_ops: u64,
    /// Host write calls served.
    pub write_ops: u64,
    /// Checksum mismatches tolerated in lenient or recovery mode.
    pub corrupt_pages_seen: u64,
    /// Holes currently tracked.
    pub hole_count: usize,
    /// Write-buffer counters.
    pub buffer: BufferStats,
    /// Allocator counters.
    pub allocator: AllocatorStats,
}

/// One open container file.
pub struct PageStore {
    file: File,
    header: Header,
    header_dirty: bool,
    index: PageIndex,
    allocator: HoleAllocator,
    buffer: WriteBuffer,
    codec: Codec,
    strict_checksum: bool,
    data_recovery: bool,
    last_written_page: Option<u32>,
    read_ops: u64,
    write_ops: u64,
    corrupt_pages_seen: u64,
    closed: bool,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn resolve_codec(
    compression: Option<&str>,
    encryption: Option<&str>,
    key: Option<&[u8]>,
    level: u8,
) -> Result<Codec> {
    let compressor = match compression {
        Some(name) => Some(
            find_compressor(name)
                .ok_or_else(|| CcvfsError::Unsupported(format!("compression '{}'", name)))?,
        ),
        None => None,
    };
    let cipher = match encryption {
        Some(name) => {
            let cipher = find_cipher(name)
                .ok_or_else(|| CcvfsError::Unsupported(format!("encryption '{}'", name)))?;
            let key = key.ok_or_else(|| {
                CcvfsError::KeyRequired(format!("container uses cipher '{}'", name))
            })?;
            if cipher.key_len() != 0 && key.len() != cipher.key_len() {
                return Err(CcvfsError::KeyMismatch(format!(
                    "cipher '{}' needs a {}-byte key, got {}",
                    name,
                    cipher.key_len(),
                    key.len()
                )));
            }
            Some(cipher)
        }
        None => None,
    };
    Ok(Codec {
        compressor,
        cipher,
        key: key.map(|k| k.to_vec()),
        level,
    })
}

impl PageStore {
    /// Format a fresh container onto an empty file.
    pub fn create(mut file: File, config: &VfsConfig) -> Result<Self> {
        let codec = resolve_codec(
            config.compression.as_deref(),
            config.encryption.as_deref(),
            config.key.as_deref(),
            config.compression_level,
        )?;
        let header = Header::new(
            config.page_size,
            config.compression.clone(),
            config.encryption.clone(),
            config.key.as_deref(),
            config.creation_mode.to_flags(),
            now_secs(),
        );
        header.save(&mut file)?;

        Ok(PageStore {
            file,
            header,
            header_dirty: false,
            index: PageIndex::new(),
            allocator: HoleAllocator::new(
                config.holes.enabled,
                config.holes.max_holes,
                config.holes.min_hole_size,
                DATA_REGION_START,
            ),
            buffer: WriteBuffer::new(
                config.buffer.enabled,
                config.buffer.max_entries,
                config.buffer.max_buffer_size,
                config.buffer.auto_flush_pages,
            ),
            codec,
            strict_checksum: config.strict_checksum,
            data_recovery: config.data_recovery,
            last_written_page: None,
            read_ops: 0,
            write_ops: 0,
            corrupt_pages_seen: 0,
            closed: false,
        })
    }

    /// Open an existing container, rebuilding the index and hole set from
    /// disk. The container's recorded algorithm names win over the
    /// configuration; the key comes from the configuration.
    pub fn open(mut file: File, config: &VfsConfig) -> Result<Self> {
        let header = Header::load(&mut file, config.strict_checksum)?;
        Self::from_header(file, header, config)
    }

    /// Open, or format when `create` is set and the file is empty.
    pub fn open_or_create(mut file: File, config: &VfsConfig, create: bool) -> Result<Self> {
        match Header::load(&mut file, config.strict_checksum) {
            Ok(header) => Self::from_header(file, header, config),
            Err(CcvfsError::NotCcvfs(detail)) => {
                let len = file
                    .metadata()
                    .map_err(|e| CcvfsError::Io(format!("Cannot stat container: {}", e)))?
                    .len();
                if create && len == 0 {
                    Self::create(file, config)
                } else {
                    Err(CcvfsError::NotCcvfs(detail))
                }
            }
            Err(e) => Err(e),
        }
    }

    fn from_header(mut file: File, header: Header, config: &VfsConfig) -> Result<Self> {
        if header.encryption.is_some() {
            let key = config.key.as_deref().ok_or_else(|| {
                CcvfsError::KeyRequired(format!(
                    "container uses cipher '{}'",
                    header.encryption.as_deref().unwrap_or("")
                ))
            })?;
            if header.key_hash != 0 && key_hash(key) != header.key_hash {
                return Err(CcvfsError::KeyMismatch(
                    "configured key does not match the container's key hash".to_string(),
                ));
            }
        }
        let codec = resolve_codec(
            header.compression.as_deref(),
            header.encryption.as_deref(),
            config.key.as_deref(),
            config.compression_level,
        )?;

        let index = PageIndex::load(&mut file, header.total_pages)?;
        let file_len = file
            .metadata()
            .map_err(|e| CcvfsError::Io(format!("Cannot stat container: {}", e)))?
            .len();
        let mut allocator = HoleAllocator::new(
            config.holes.enabled,
            config.holes.max_holes,
            config.holes.min_hole_size,
            file_len,
        );
        allocator.rebuild(&index, file_len);

        Ok(PageStore {
            file,
            header,
            header_dirty: false,
            index,
            allocator,
            buffer: WriteBuffer::new(
                config.buffer.enabled,
                config.buffer.max_entries,
                config.buffer.max_buffer_size,
                config.buffer.auto_flush_pages,
            ),
            codec,
            strict_checksum: config.strict_checksum,
            data_recovery: config.data_recovery,
            last_written_page: None,
            read_ops: 0,
            write_ops: 0,
            corrupt_pages_seen: 0,
            closed: false,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(CcvfsError::Misuse("file is closed".to_string()));
        }
        Ok(())
    }

    /// Configured logical page size.
    pub fn page_size(&self) -> u32 {
        self.header.page_size
    }

    /// Logical size seen by the host: `total_pages * page_size`.
    pub fn file_size(&self) -> u64 {
        self.header.total_pages as u64 * self.header.page_size as u64
    }

    /// Read `buf.len()` bytes of the logical view at `offset`.
    ///
    /// Regions never written read as zeros.
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_open()?;
        self.read_ops += 1;
        let ps = self.header.page_size as u64;
        let mut pos = 0usize;
        while pos < buf.len() {
            let abs = offset + pos as u64;
            let page = abs / ps;
            let in_page = (abs % ps) as usize;
            let n = (buf.len() - pos).min(ps as usize - in_page);
            let chunk = &mut buf[pos..pos + n];

            if page >= self.header.total_pages as u64 {
                chunk.fill(0);
                pos += n;
                continue;
            }
            let page_no = page as u32;

            if self.buffer.is_enabled() {
                if let Some(bytes) = self.buffer.get(page_no) {
                    chunk.copy_from_slice(&bytes[in_page..in_page + n]);
                    pos += n;
                    continue;
                }
            }

            match self.index.get(page_no).copied() {
                Some(entry) if entry.is_allocated() && !entry.is_sparse() => {
                    let image = self.read_extent(page_no, entry)?;
                    chunk.copy_from_slice(&image[in_page..in_page + n]);
                }
                _ => chunk.fill(0),
            }
            pos += n;
        }
        Ok(())
    }

    /// Write `buf` into the logical view at `offset`, page by page.
    pub fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.check_open()?;
        self.write_ops += 1;
        let ps = self.header.page_size as usize;
        let mut pos = 0usize;
        while pos < buf.len() {
            let abs = offset + pos as u64;
            let page = abs / ps as u64;
            if page >= MAX_PAGES as u64 {
                return Err(CcvfsError::IndexFull {
                    max_pages: MAX_PAGES,
                });
            }
            let page_no = page as u32;
            let in_page = (abs % ps as u64) as usize;
            let n = (buf.len() - pos).min(ps - in_page);

            let image = if n == ps {
                buf[pos..pos + n].to_vec()
            } else {
                // Partial page: merge over the current contents.
                let mut image = self.read_page_image(page_no)?;
                image[in_page..in_page + n].copy_from_slice(&buf[pos..pos + n]);
                image
            };

            self.ensure_page_count(page_no)?;
            let sequential = self.last_written_page == Some(page_no.wrapping_sub(1));

            if self.buffer.is_enabled() {
                if self.buffer.needs_room_for(page_no, image.len()) {
                    while self.buffer.above_low_water() {
                        match self.buffer.take_lru() {
                            Some(victim) => self.flush_entry(victim, false)?,
                            None => break,
                        }
                    }
                }
                self.buffer.put(page_no, image);
                self.last_written_page = Some(page_no);
                if self.buffer.should_auto_flush() {
                    self.flush_all()?;
                }
            } else {
                self.write_page_extent(page_no, &image, sequential)?;
                self.last_written_page = Some(page_no);
            }
            pos += n;
        }
        Ok(())
    }

    /// Current image of one page: buffer, then disk, then zeros.
    fn read_page_image(&mut self, page_no: u32) -> Result<Vec<u8>> {
        let ps = self.header.page_size as usize;
        if self.buffer.is_enabled() {
            if let Some(bytes) = self.buffer.get(page_no) {
                return Ok(bytes.to_vec());
            }
        }
        match self.index.get(page_no).copied() {
            Some(entry) if entry.is_allocated() && !entry.is_sparse() => {
                self.read_extent(page_no, entry)
            }
            _ => Ok(vec![0u8; ps]),
        }
    }

    /// Read one extent from disk and run the decode pipeline.
    fn read_extent(&mut self, page_no: u32, entry: IndexEntry) -> Result<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(entry.physical_offset))
            .map_err(|e| CcvfsError::Io(format!("Cannot seek to page {}: {}", page_no, e)))?;
        let mut hdr_buf = [0u8; EXTENT_HEADER_SIZE];
        self.file
            .read_exact(&mut hdr_buf)
            .map_err(|e| CcvfsError::Io(format!("Cannot read extent of page {}: {}", page_no, e)))?;
        let ext = extent::require(ExtentHeader::parse(&hdr_buf), page_no)?;

        if ext.page_no != page_no {
            return Err(CcvfsError::CorruptPage {
                page: page_no,
                detail: format!("extent claims page {}", ext.page_no),
            });
        }
        if ext.compressed_size != entry.compressed_size
            || ext.original_size != entry.original_size
        {
            return Err(CcvfsError::CorruptPage {
                page: page_no,
                detail: format!(
                    "extent sizes {}/{} disagree with index {}/{}",
                    ext.compressed_size,
                    ext.original_size,
                    entry.compressed_size,
                    entry.original_size
                ),
            });
        }
        if ext.checksum != entry.checksum {
            if self.strict_checksum {
                return Err(CcvfsError::CorruptPage {
                    page: page_no,
                    detail: "extent and index checksums disagree".to_string(),
                });
            }
            log::warn!("page {}: extent and index checksums disagree", page_no);
        }

        let mut payload = vec![0u8; entry.compressed_size as usize];
        self.file
            .read_exact(&mut payload)
            .map_err(|e| CcvfsError::Io(format!("Cannot read extent of page {}: {}", page_no, e)))?;

        let decoded = self.codec.decode(
            &payload,
            entry.flags,
            entry.original_size as usize,
            entry.checksum,
            ExtentHeader::nonce(page_no, ext.sequence),
            page_no,
        )?;
        if !decoded.checksum_ok {
            self.corrupt_pages_seen += 1;
            if self.strict_checksum && !self.data_recovery {
                return Err(CcvfsError::CorruptPage {
                    page: page_no,
                    detail: format!(
                        "checksum mismatch: stored 0x{:08X}, computed 0x{:08X}",
                        entry.checksum, decoded.computed
                    ),
                });
            }
            log::warn!(
                "page {}: checksum mismatch (stored 0x{:08X}, computed 0x{:08X}), surfacing bytes",
                page_no,
                entry.checksum,
                decoded.computed
            );
        }
        Ok(decoded.bytes)
    }

    /// Grow the index and page count to cover `page_no`.
    fn ensure_page_count(&mut self, page_no: u32) -> Result<()> {
        if page_no >= self.header.total_pages {
            self.index.expand(page_no + 1)?;
            self.header.total_pages = page_no + 1;
            self.header_dirty = true;
        }
        Ok(())
    }

    /// Persist one page image: encode, place, write extent, update index.
    ///
    /// This is the single extent-write routine used by write-through,
    /// eviction, targeted flush, and flush-all.
    fn write_page_extent(&mut self, page_no: u32, image: &[u8], sequential: bool) -> Result<()> {
        let sequence = self.header.sequence + 1;
        let nonce = ExtentHeader::nonce(page_no, sequence as u32);
        let encoded = self.codec.encode(image, nonce)?;

        if let Some(old) = self.index.get(page_no).copied() {
            if old.is_allocated() {
                self.allocator.free(old.physical_offset, old.extent_len());
            }
        }

        let offset = self
            .allocator
            .allocate(encoded.payload.len() as u64, sequential);
        let ext = ExtentHeader {
            page_no,
            original_size: image.len() as u32,
            compressed_size: encoded.payload.len() as u32,
            checksum: encoded.checksum,
            flags: encoded.flags,
            timestamp: now_secs() as u32,
            sequence: sequence as u32,
        };

        let mut out = Vec::with_capacity(EXTENT_HEADER_SIZE + encoded.payload.len());
        out.extend_from_slice(&ext.to_bytes());
        out.extend_from_slice(&encoded.payload);
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| CcvfsError::Io(format!("Cannot seek to extent: {}", e)))?;
        self.file
            .write_all(&out)
            .map_err(|e| CcvfsError::Io(format!("Cannot write extent of page {}: {}", page_no, e)))?;

        self.index.set(
            page_no,
            IndexEntry {
                physical_offset: offset,
                compressed_size: ext.compressed_size,
                original_size: ext.original_size,
                checksum: ext.checksum,
                flags: ext.flags,
            },
        )?;
        self.header.sequence = sequence;
        self.header_dirty = true;
        Ok(())
    }

    fn flush_entry(&mut self, page: BufferedPage, sequential: bool) -> Result<()> {
        self.write_page_extent(page.page_no, &page.bytes, sequential)
    }

    /// Flush every buffered page to its own extent.
    pub fn flush_all(&mut self) -> Result<()> {
        let drained = self.buffer.drain();
        let mut prev: Option<u32> = None;
        for page in drained {
            let sequential = prev == Some(page.page_no.wrapping_sub(1));
            let page_no = page.page_no;
            self.flush_entry(page, sequential)?;
            prev = Some(page_no);
        }
        Ok(())
    }

    /// Flush one buffered page, if present.
    pub fn flush_page(&mut self, page_no: u32) -> Result<()> {
        if let Some(page) = self.buffer.take(page_no) {
            self.flush_entry(page, false)?;
        }
        Ok(())
    }

    /// Shrink or grow the logical size to `new_size` bytes.
    ///
    /// Shrinking frees the extents of dropped pages (data region only; the
    /// index region never shrinks). Growing extends the logical view with
    /// sparse pages.
    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.check_open()?;
        let ps = self.header.page_size as u64;
        let new_pages = new_size.div_ceil(ps);
        if new_pages > MAX_PAGES as u64 {
            return Err(CcvfsError::IndexFull {
                max_pages: MAX_PAGES,
            });
        }
        let new_pages = new_pages as u32;

        if new_pages < self.header.total_pages {
            self.buffer.drop_from(new_pages);
            for page_no in new_pages..self.header.total_pages {
                if let Some(entry) = self.index.get(page_no).copied() {
                    if entry.is_allocated() {
                        self.allocator.free(entry.physical_offset, entry.extent_len());
                    }
                }
                self.index.clear(page_no);
            }
            self.index.truncate(new_pages);
            self.header.total_pages = new_pages;
            self.header_dirty = true;
            if self.last_written_page.is_some_and(|p| p >= new_pages) {
                self.last_written_page = None;
            }
        } else if new_pages > self.header.total_pages {
            self.ensure_page_count(new_pages - 1)?;
        }
        Ok(())
    }

    /// Persist everything: buffered pages, the index, the header, then the
    /// underlying file.
    pub fn sync(&mut self, level: SyncLevel) -> Result<()> {
        self.check_open()?;
        self.flush_all()?;
        self.index.save(&mut self.file, false)?;
        if self.header_dirty {
            self.header.update_sizes(self.allocator.used_bytes());
            self.header.save(&mut self.file)?;
            self.header_dirty = false;
        }
        match level {
            SyncLevel::DataOnly => self
                .file
                .sync_data()
                .map_err(|e| CcvfsError::Io(format!("Cannot sync container: {}", e)))?,
            SyncLevel::Full => self
                .file
                .sync_all()
                .map_err(|e| CcvfsError::Io(format!("Cannot sync container: {}", e)))?,
        }
        Ok(())
    }

    /// Flush, force-save index and header, and release the handle.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush_all()?;
        self.index.save(&mut self.file, true)?;
        self.header.update_sizes(self.allocator.used_bytes());
        self.header.save(&mut self.file)?;
        self.header_dirty = false;
        self.file
            .sync_all()
            .map_err(|e| CcvfsError::Io(format!("Cannot sync container: {}", e)))?;
        self.closed = true;
        Ok(())
    }

    /// Engine counters and size accounting.
    pub fn stats(&self) -> StoreStats {
        let original_size = self.header.total_pages as u64 * self.header.page_size as u64;
        let physical_size = self.allocator.used_bytes();
        StoreStats {
            total_pages: self.header.total_pages,
            page_size: self.header.page_size,
            original_size,
            physical_size,
            compress_ratio: if original_size > 0 {
                (physical_size.saturating_mul(100) / original_size) as u32
            } else {
                100
            },
            read_ops: self.read_ops,
            write_ops: self.write_ops,
            corrupt_pages_seen: self.corrupt_pages_seen,
            hole_count: self.allocator.hole_count(),
            buffer: self.buffer.stats().clone(),
            allocator: self.allocator.stats().clone(),
        }
    }

    /// Checksum mismatches tolerated so far.
    pub fn corrupt_pages_seen(&self) -> u64 {
        self.corrupt_pages_seen
    }

    /// Index entry for a page (diagnostics and tests).
    pub fn index_entry(&self, page_no: u32) -> Option<IndexEntry> {
        self.index.get(page_no).copied()
    }

    pub(crate) fn file_handle(&self) -> &File {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir, name: &str, config: &VfsConfig) -> PageStore {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.path().join(name))
            .unwrap();
        PageStore::open_or_create(file, config, true).unwrap()
    }

    fn small_config() -> VfsConfig {
        let mut config = VfsConfig::default();
        config.page_size = 4096;
        config.compression = Some("rle".to_string());
        config.buffer.enabled = false;
        config
    }

    #[test]
    fn test_write_read_roundtrip_write_through() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, "a.db", &small_config());

        let page = vec![0x41u8; 4096];
        store.write(0, &page).unwrap();
        let mut back = vec![0u8; 4096];
        store.read(0, &mut back).unwrap();
        assert_eq!(back, page);

        let entry = store.index_entry(0).unwrap();
        assert!(entry.is_allocated());
        assert!(entry.compressed_size <= 8);
        assert_eq!(entry.original_size, 4096);
    }

    #[test]
    fn test_sparse_read_returns_zeros() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, "a.db", &small_config());

        store.write(40960, b"abcd").unwrap();
        assert_eq!(store.file_size(), 11 * 4096);

        let mut head = vec![0xEEu8; 4096];
        store.read(0, &mut head).unwrap();
        assert_eq!(head, vec![0u8; 4096]);

        let mut tail = [0u8; 4];
        store.read(40960, &mut tail).unwrap();
        assert_eq!(&tail, b"abcd");

        let mut one = [0xEEu8; 1];
        store.read(40964, &mut one).unwrap();
        assert_eq!(one, [0]);
    }

    #[test]
    fn test_partial_write_merges_existing_page() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, "a.db", &small_config());

        store.write(0, &vec![0x11u8; 4096]).unwrap();
        store.write(100, b"XYZ").unwrap();

        let mut back = vec![0u8; 4096];
        store.read(0, &mut back).unwrap();
        assert_eq!(&back[100..103], b"XYZ");
        assert_eq!(back[99], 0x11);
        assert_eq!(back[103], 0x11);
    }

    #[test]
    fn test_reopen_preserves_pages() {
        let dir = TempDir::new().unwrap();
        let config = small_config();
        {
            let mut store = open_store(&dir, "a.db", &config);
            store.write(0, &vec![0x41u8; 4096]).unwrap();
            store.write(8192, b"persisted").unwrap();
            store.close().unwrap();
        }
        let mut store = open_store(&dir, "a.db", &config);
        assert_eq!(store.file_size(), 3 * 4096);
        let mut back = vec![0u8; 4096];
        store.read(0, &mut back).unwrap();
        assert_eq!(back, vec![0x41u8; 4096]);
        let mut word = vec![0u8; 9];
        store.read(8192, &mut word).unwrap();
        assert_eq!(&word, b"persisted");
    }

    #[test]
    fn test_truncate_to_zero_clears_everything() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, "a.db", &small_config());
        store.write(0, &vec![0x33u8; 8192]).unwrap();
        store.sync(SyncLevel::Full).unwrap();

        store.truncate(0).unwrap();
        assert_eq!(store.file_size(), 0);
        let mut back = vec![0xEEu8; 4096];
        store.read(0, &mut back).unwrap();
        assert_eq!(back, vec![0u8; 4096]);
        assert_eq!(store.stats().total_pages, 0);
        assert!(store.stats().hole_count >= 1);
    }

    #[test]
    fn test_truncate_grows_with_sparse_pages() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, "a.db", &small_config());
        store.truncate(3 * 4096).unwrap();
        assert_eq!(store.file_size(), 3 * 4096);
        let mut back = vec![0xEEu8; 4096];
        store.read(4096, &mut back).unwrap();
        assert_eq!(back, vec![0u8; 4096]);
    }

    #[test]
    fn test_overwrite_frees_old_extent() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, "a.db", &small_config());

        // Large incompressible page, then shrink it to a tiny extent.
        let mut state: u64 = 1;
        let noisy: Vec<u8> = (0..4096)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                (state >> 33) as u8
            })
            .collect();
        store.write(0, &noisy).unwrap();
        let first = store.index_entry(0).unwrap();

        store.write(0, &vec![0x00u8; 1]).unwrap(); // page still mostly noisy
        store.write(0, &vec![0x77u8; 4096]).unwrap(); // now tiny under RLE
        let second = store.index_entry(0).unwrap();
        assert!(second.compressed_size < first.compressed_size);
        assert!(store.stats().hole_count >= 1);
    }

    #[test]
    fn test_sequence_is_monotone() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, "a.db", &small_config());
        store.write(0, &vec![1u8; 4096]).unwrap();
        store.write(4096, &vec![2u8; 4096]).unwrap();
        store.write(0, &vec![3u8; 4096]).unwrap();
        assert_eq!(store.header.sequence, 3);
        store.sync(SyncLevel::Full).unwrap();

        // Reopen continues above the persisted counter.
        store.close().unwrap();
        let mut store = open_store(&dir, "a.db", &small_config());
        store.write(0, &vec![4u8; 4096]).unwrap();
        assert_eq!(store.header.sequence, 4);
    }

    #[test]
    fn test_write_beyond_capacity_is_index_full() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, "a.db", &small_config());
        let offset = MAX_PAGES as u64 * 4096;
        assert!(matches!(
            store.write(offset, b"x"),
            Err(CcvfsError::IndexFull { .. })
        ));
    }

    #[test]
    fn test_closed_store_rejects_io() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, "a.db", &small_config());
        store.close().unwrap();
        assert!(matches!(
            store.write(0, b"x"),
            Err(CcvfsError::Misuse(_))
        ));
        let mut buf = [0u8; 1];
        assert!(matches!(
            store.read(0, &mut buf),
            Err(CcvfsError::Misuse(_))
        ));
        // Second close is a no-op.
        store.close().unwrap();
    }

    #[test]
    fn test_buffered_writes_merge_and_flush_on_sync() {
        let dir = TempDir::new().unwrap();
        let mut config = small_config();
        config.buffer.enabled = true;
        config.buffer.max_entries = 4;
        config.buffer.max_buffer_size = BUFFER_MIN_SIZE;
        config.buffer.auto_flush_pages = 8;
        let mut store = open_store(&dir, "a.db", &config);

        for page in 0..4u64 {
            store.write(page * 4096, &vec![page as u8 + 1; 4096]).unwrap();
        }
        for page in 0..4u64 {
            store.write(page * 4096, &vec![page as u8 + 10; 4096]).unwrap();
        }
        let stats = store.stats();
        assert!(stats.buffer.merges >= 4);
        assert_eq!(stats.buffer.flushes, 0);
        assert!(store.index_entry(0).is_none() || !store.index_entry(0).unwrap().is_allocated());

        store.sync(SyncLevel::Full).unwrap();
        let stats = store.stats();
        assert_eq!(stats.buffer.flushes, 1);

        let mut back = vec![0u8; 4096];
        store.read(4096, &mut back).unwrap();
        assert_eq!(back, vec![11u8; 4096]);
    }

    #[test]
    fn test_wrong_key_rejected_at_open() {
        let dir = TempDir::new().unwrap();
        let mut config = small_config();
        config.encryption = Some("xor".to_string());
        config.key = Some(b"key01234".to_vec());
        {
            let mut store = open_store(&dir, "a.db", &config);
            store.write(0, b"secret").unwrap();
            store.close().unwrap();
        }

        let mut wrong = config.clone();
        wrong.key = Some(b"badkey99".to_vec());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.path().join("a.db"))
            .unwrap();
        assert!(matches!(
            PageStore::open_or_create(file, &wrong, false),
            Err(CcvfsError::KeyMismatch(_))
        ));

        let mut keyless = config.clone();
        keyless.encryption = None;
        keyless.key = None;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.path().join("a.db"))
            .unwrap();
        assert!(matches!(
            PageStore::open_or_create(file, &keyless, false),
            Err(CcvfsError::KeyRequired(_))
        ));
    }
}
