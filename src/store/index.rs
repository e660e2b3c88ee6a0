//! Logical-page-to-extent index table.
//!
//! One 24-byte [`IndexEntry`] per logical page number, stored as a flat
//! array at offset 128. The in-memory table grows with amortized 1.5×
//! reallocation as the host writes past the end of the file; the persisted
//! window is fixed at `MAX_PAGES` entries, a hard format limit.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian};

use crate::store::constants::*;
use crate::{CcvfsError, Result};

/// One index slot: where a logical page's extent lives and how to decode it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
    /// Absolute offset of the extent header; 0 marks an unallocated page.
    pub physical_offset: u64,
    /// Stored payload size in bytes.
    pub compressed_size: u32,
    /// Plaintext page size in bytes.
    pub original_size: u32,
    /// CRC32 of the plaintext page.
    pub checksum: u32,
    /// COMPRESSED / ENCRYPTED / SPARSE bits plus the compression level.
    pub flags: u32,
}

impl IndexEntry {
    /// True when the slot points at an extent.
    pub fn is_allocated(&self) -> bool {
        self.physical_offset != 0
    }

    /// True when the page is stored as an all-zeros sparse extent.
    pub fn is_sparse(&self) -> bool {
        self.flags & FLAG_SPARSE != 0
    }

    /// Compression level recorded in the flags field.
    pub fn level(&self) -> u8 {
        ((self.flags & FLAG_LEVEL_MASK) >> FLAG_LEVEL_SHIFT) as u8
    }

    /// Total on-disk footprint of the extent, header included.
    pub fn extent_len(&self) -> u64 {
        EXTENT_HEADER_SIZE as u64 + self.compressed_size as u64
    }

    /// Parse one entry from its 24-byte slot.
    pub fn parse(buf: &[u8]) -> Self {
        IndexEntry {
            physical_offset: LittleEndian::read_u64(&buf[IDX_PHYSICAL_OFFSET..]),
            compressed_size: LittleEndian::read_u32(&buf[IDX_COMPRESSED_SIZE..]),
            original_size: LittleEndian::read_u32(&buf[IDX_ORIGINAL_SIZE..]),
            checksum: LittleEndian::read_u32(&buf[IDX_CHECKSUM..]),
            flags: LittleEndian::read_u32(&buf[IDX_FLAGS..]),
        }
    }

    /// Serialize into a 24-byte slot.
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[IDX_PHYSICAL_OFFSET..], self.physical_offset);
        LittleEndian::write_u32(&mut buf[IDX_COMPRESSED_SIZE..], self.compressed_size);
        LittleEndian::write_u32(&mut buf[IDX_ORIGINAL_SIZE..], self.original_size);
        LittleEndian::write_u32(&mut buf[IDX_CHECKSUM..], self.checksum);
        LittleEndian::write_u32(&mut buf[IDX_FLAGS..], self.flags);
    }
}

/// In-memory copy of the index table with a dirty flag.
#[derive(Debug)]
pub struct PageIndex {
    entries: Vec<IndexEntry>,
    dirty: bool,
}

impl PageIndex {
    /// Empty index for a fresh container.
    pub fn new() -> Self {
        PageIndex {
            entries: Vec::with_capacity(INDEX_INITIAL_CAPACITY),
            dirty: false,
        }
    }

    /// Read `total_pages` entries from the fixed index region.
    pub fn load<R: Read + Seek>(file: &mut R, total_pages: u32) -> Result<Self> {
        if total_pages == 0 {
            return Ok(PageIndex::new());
        }
        if total_pages > MAX_PAGES {
            return Err(CcvfsError::CorruptIndex(format!(
                "page count {} exceeds format capacity {}",
                total_pages, MAX_PAGES
            )));
        }

        let count = total_pages as usize;
        let mut raw = vec![0u8; count * INDEX_ENTRY_SIZE];
        file.seek(SeekFrom::Start(INDEX_OFFSET))
            .map_err(|e| CcvfsError::Io(format!("Cannot seek to index: {}", e)))?;
        file.read_exact(&mut raw).map_err(|e| {
            CcvfsError::CorruptIndex(format!("Cannot read {} index entries: {}", count, e))
        })?;

        let mut entries = Vec::with_capacity(count + INDEX_CAPACITY_SLACK);
        for slot in raw.chunks_exact(INDEX_ENTRY_SIZE) {
            entries.push(IndexEntry::parse(slot));
        }
        Ok(PageIndex {
            entries,
            dirty: false,
        })
    }

    /// Write all entries at offset 128 when dirty (or always, with `force`).
    pub fn save<W: Write + Seek>(&mut self, file: &mut W, force: bool) -> Result<()> {
        if !self.dirty && !force {
            return Ok(());
        }
        let mut raw = vec![0u8; self.entries.len() * INDEX_ENTRY_SIZE];
        for (entry, slot) in self.entries.iter().zip(raw.chunks_exact_mut(INDEX_ENTRY_SIZE)) {
            entry.write_to(slot);
        }
        file.seek(SeekFrom::Start(INDEX_OFFSET))
            .map_err(|e| CcvfsError::Io(format!("Cannot seek to index: {}", e)))?;
        file.write_all(&raw)
            .map_err(|e| CcvfsError::Io(format!("Cannot write index: {}", e)))?;
        self.dirty = false;
        Ok(())
    }

    /// Grow the table to at least `new_count` entries, zero-filling new slots.
    pub fn expand(&mut self, new_count: u32) -> Result<()> {
        if new_count > MAX_PAGES {
            return Err(CcvfsError::IndexFull {
                max_pages: MAX_PAGES,
            });
        }
        let new_count = new_count as usize;
        if new_count <= self.entries.len() {
            return Ok(());
        }
        if new_count > self.entries.capacity() {
            let grown = (self.entries.capacity() * 3 / 2)
                .max(new_count)
                .max(INDEX_INITIAL_CAPACITY);
            self.entries
                .reserve_exact(grown.min(MAX_PAGES as usize) - self.entries.len());
        }
        self.entries.resize(new_count, IndexEntry::default());
        self.dirty = true;
        Ok(())
    }

    /// Drop every entry at or beyond `new_count`.
    pub fn truncate(&mut self, new_count: u32) {
        if (new_count as usize) < self.entries.len() {
            self.entries.truncate(new_count as usize);
            self.dirty = true;
        }
    }

    /// Number of entries (equals the header's `total_pages`).
    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    /// True when no page has ever been written.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `page_no`, if the table covers it.
    pub fn get(&self, page_no: u32) -> Option<&IndexEntry> {
        self.entries.get(page_no as usize)
    }

    /// Replace the entry for `page_no` and mark the table dirty.
    pub fn set(&mut self, page_no: u32, entry: IndexEntry) -> Result<()> {
        let slot = self
            .entries
            .get_mut(page_no as usize)
            .ok_or_else(|| CcvfsError::Misuse(format!("page {} beyond index", page_no)))?;
        *slot = entry;
        self.dirty = true;
        Ok(())
    }

    /// Zero the entry for `page_no` (the page becomes unallocated).
    pub fn clear(&mut self, page_no: u32) {
        if let Some(slot) = self.entries.get_mut(page_no as usize) {
            *slot = IndexEntry::default();
            self.dirty = true;
        }
    }

    /// Iterate `(page_no, entry)` over allocated entries.
    pub fn allocated(&self) -> impl Iterator<Item = (u32, &IndexEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_allocated())
            .map(|(i, e)| (i as u32, e))
    }

    /// True when in-memory entries differ from the persisted region.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Default for PageIndex {
    fn default() -> Self {
        PageIndex::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn entry(offset: u64, size: u32) -> IndexEntry {
        IndexEntry {
            physical_offset: offset,
            compressed_size: size,
            original_size: 4096,
            checksum: 0xABCD1234,
            flags: FLAG_COMPRESSED | (6 << FLAG_LEVEL_SHIFT),
        }
    }

    #[test]
    fn test_entry_roundtrip() {
        let e = entry(DATA_REGION_START, 512);
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        e.write_to(&mut buf);
        let parsed = IndexEntry::parse(&buf);
        assert_eq!(parsed, e);
        assert!(parsed.is_allocated());
        assert_eq!(parsed.level(), 6);
        assert_eq!(parsed.extent_len(), 512 + EXTENT_HEADER_SIZE as u64);
    }

    #[test]
    fn test_zero_entry_is_unallocated() {
        let parsed = IndexEntry::parse(&[0u8; INDEX_ENTRY_SIZE]);
        assert!(!parsed.is_allocated());
        assert!(!parsed.is_sparse());
    }

    #[test]
    fn test_expand_zero_fills_and_marks_dirty() {
        let mut idx = PageIndex::new();
        assert!(!idx.is_dirty());
        idx.expand(10).unwrap();
        assert_eq!(idx.len(), 10);
        assert!(idx.is_dirty());
        assert!(!idx.get(9).unwrap().is_allocated());
        assert!(idx.get(10).is_none());
    }

    #[test]
    fn test_expand_beyond_capacity_is_index_full() {
        let mut idx = PageIndex::new();
        assert!(matches!(
            idx.expand(MAX_PAGES + 1),
            Err(CcvfsError::IndexFull { .. })
        ));
        idx.expand(MAX_PAGES).unwrap();
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut idx = PageIndex::new();
        idx.expand(5).unwrap();
        idx.set(0, entry(DATA_REGION_START, 100)).unwrap();
        idx.set(3, entry(DATA_REGION_START + 1000, 200)).unwrap();

        // Back the cursor with enough room for the fixed regions.
        let mut cur = Cursor::new(vec![0u8; HEADER_SIZE + 5 * INDEX_ENTRY_SIZE]);
        idx.save(&mut cur, false).unwrap();
        assert!(!idx.is_dirty());

        let loaded = PageIndex::load(&mut cur, 5).unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.get(0), idx.get(0));
        assert_eq!(loaded.get(3), idx.get(3));
        assert!(!loaded.get(1).unwrap().is_allocated());
        assert_eq!(loaded.allocated().count(), 2);
    }

    #[test]
    fn test_save_skips_when_clean() {
        let mut idx = PageIndex::new();
        idx.expand(2).unwrap();
        let mut cur = Cursor::new(vec![0u8; HEADER_SIZE + 2 * INDEX_ENTRY_SIZE]);
        idx.save(&mut cur, false).unwrap();

        // Mutate the backing store; a clean save must not overwrite it.
        idx.set(0, entry(DATA_REGION_START, 7)).unwrap();
        idx.save(&mut cur, false).unwrap();
        let marker_pos = INDEX_OFFSET as usize;
        cur.get_mut()[marker_pos] = 0xEE;
        idx.save(&mut cur, false).unwrap();
        assert_eq!(cur.get_ref()[marker_pos], 0xEE);

        // Force save rewrites regardless.
        idx.save(&mut cur, true).unwrap();
        assert_ne!(cur.get_ref()[marker_pos], 0xEE);
    }

    #[test]
    fn test_load_zero_pages_is_empty() {
        let mut cur = Cursor::new(Vec::new());
        let idx = PageIndex::load(&mut cur, 0).unwrap();
        assert!(idx.is_empty());
    }

    #[test]
    fn test_load_short_region_is_corrupt_index() {
        let mut cur = Cursor::new(vec![0u8; HEADER_SIZE + 10]);
        assert!(matches!(
            PageIndex::load(&mut cur, 4),
            Err(CcvfsError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_truncate_drops_tail() {
        let mut idx = PageIndex::new();
        idx.expand(8).unwrap();
        idx.set(7, entry(DATA_REGION_START, 1)).unwrap();
        idx.truncate(4);
        assert_eq!(idx.len(), 4);
        assert!(idx.get(7).is_none());
    }
}
