//! Coalescing write-behind page buffer.
//!
//! Holds at most one entry per logical page; a second `put` for the same
//! page replaces the bytes in place (a *merge*), so a page rewritten ten
//! times between syncs costs one extent write instead of ten. The buffer
//! is a passive container: the page I/O core drives eviction and flushing
//! through [`WriteBuffer::take_lru`] and [`WriteBuffer::drain`].

use std::collections::HashMap;

use serde::Serialize;

/// One buffered logical page.
#[derive(Debug)]
pub struct BufferedPage {
    /// Logical page number.
    pub page_no: u32,
    /// Full page image, exactly one page long.
    pub bytes: Vec<u8>,
    /// Monotonic touch tick; lowest is least recently used.
    pub last_touched: u64,
}

/// Buffer counters, exposed through file control.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BufferStats {
    /// Reads served from the buffer.
    pub hits: u64,
    /// Reads that fell through to disk.
    pub misses: u64,
    /// Writes that replaced an already-buffered page.
    pub merges: u64,
    /// Flush-all passes that wrote at least one page.
    pub flushes: u64,
    /// Single pages evicted to make room.
    pub evictions: u64,
}

/// Bounded map of dirty pages awaiting flush.
#[derive(Debug)]
pub struct WriteBuffer {
    pages: HashMap<u32, BufferedPage>,
    bytes_used: usize,
    tick: u64,
    enabled: bool,
    max_entries: usize,
    max_buffer_size: usize,
    auto_flush_pages: usize,
    stats: BufferStats,
}

impl WriteBuffer {
    /// Buffer with the given caps. A disabled buffer accepts nothing.
    pub fn new(
        enabled: bool,
        max_entries: usize,
        max_buffer_size: usize,
        auto_flush_pages: usize,
    ) -> Self {
        WriteBuffer {
            pages: HashMap::new(),
            bytes_used: 0,
            tick: 0,
            enabled,
            max_entries,
            max_buffer_size,
            auto_flush_pages,
            stats: BufferStats::default(),
        }
    }

    /// Whether writes should go through the buffer at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Insert or replace the image for `page_no`. Returns `true` when an
    /// existing entry was merged.
    ///
    /// The caller must have made room first (see [`Self::needs_room_for`]);
    /// the buffer itself never flushes.
    pub fn put(&mut self, page_no: u32, bytes: Vec<u8>) -> bool {
        self.tick += 1;
        if let Some(existing) = self.pages.get_mut(&page_no) {
            self.bytes_used = self.bytes_used - existing.bytes.len() + bytes.len();
            existing.bytes = bytes;
            existing.last_touched = self.tick;
            self.stats.merges += 1;
            return true;
        }
        self.bytes_used += bytes.len();
        self.pages.insert(
            page_no,
            BufferedPage {
                page_no,
                bytes,
                last_touched: self.tick,
            },
        );
        false
    }

    /// Buffered image for `page_no`, counting the hit or miss.
    pub fn get(&mut self, page_no: u32) -> Option<&[u8]> {
        match self.pages.get(&page_no) {
            Some(page) => {
                self.stats.hits += 1;
                Some(&page.bytes)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// True when inserting `len` fresh bytes for `page_no` would exceed a
    /// cap. A merge never needs room checks for the entry count, only for
    /// the byte budget.
    pub fn needs_room_for(&self, page_no: u32, len: usize) -> bool {
        match self.pages.get(&page_no) {
            Some(existing) => self.bytes_used - existing.bytes.len() + len > self.max_buffer_size,
            None => {
                self.pages.len() + 1 > self.max_entries
                    || self.bytes_used + len > self.max_buffer_size
            }
        }
    }

    /// Low-water target after eviction: three quarters of each cap.
    pub fn above_low_water(&self) -> bool {
        self.pages.len() > self.max_entries * 3 / 4
            || self.bytes_used > self.max_buffer_size * 3 / 4
    }

    /// Remove and return the least recently touched entry.
    pub fn take_lru(&mut self) -> Option<BufferedPage> {
        let page_no = self
            .pages
            .values()
            .min_by_key(|p| p.last_touched)
            .map(|p| p.page_no)?;
        let page = self.pages.remove(&page_no)?;
        self.bytes_used -= page.bytes.len();
        self.stats.evictions += 1;
        Some(page)
    }

    /// Remove and return the entry for `page_no`, if buffered.
    pub fn take(&mut self, page_no: u32) -> Option<BufferedPage> {
        let page = self.pages.remove(&page_no)?;
        self.bytes_used -= page.bytes.len();
        Some(page)
    }

    /// Remove and return every entry, page-number order, counting one
    /// flush pass when the buffer was non-empty.
    pub fn drain(&mut self) -> Vec<BufferedPage> {
        if self.pages.is_empty() {
            return Vec::new();
        }
        self.stats.flushes += 1;
        self.bytes_used = 0;
        let mut pages: Vec<BufferedPage> = self.pages.drain().map(|(_, p)| p).collect();
        pages.sort_unstable_by_key(|p| p.page_no);
        pages
    }

    /// Drop every buffered page at or beyond `first_dropped` (truncate).
    pub fn drop_from(&mut self, first_dropped: u32) {
        let doomed: Vec<u32> = self
            .pages
            .keys()
            .copied()
            .filter(|&p| p >= first_dropped)
            .collect();
        for page_no in doomed {
            if let Some(page) = self.pages.remove(&page_no) {
                self.bytes_used -= page.bytes.len();
            }
        }
    }

    /// True once the entry count reaches the auto-flush threshold.
    pub fn should_auto_flush(&self) -> bool {
        self.auto_flush_pages > 0 && self.pages.len() >= self.auto_flush_pages
    }

    /// Number of buffered pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Combined payload bytes currently held.
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Buffer counters.
    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }
}
