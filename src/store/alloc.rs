//! Data-region space allocator.
//!
//! Tracks freed extent ranges (*holes*) in an unordered, capped, in-memory
//! set and places new extents either into the smallest hole that fits
//! (best-fit, lowest offset on ties) or by appending at the end of the
//! file. Holes are never persisted; [`HoleAllocator::rebuild`] recomputes
//! them at open from the gaps between indexed extents, which also reclaims
//! extents orphaned by a crash between extent write and index save.

use serde::Serialize;

use crate::store::constants::{DATA_REGION_START, EXTENT_HEADER_SIZE};
use crate::store::index::PageIndex;

/// A freed range inside the data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hole {
    /// Absolute offset of the freed range.
    pub offset: u64,
    /// Length of the freed range in bytes.
    pub length: u64,
}

/// Allocator counters, exposed through file control.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AllocatorStats {
    /// Extents placed into an existing hole.
    pub hole_reuses: u64,
    /// Extents appended at the end of the file.
    pub appends: u64,
    /// Appends chosen by the sequential-write heuristic.
    pub sequential_appends: u64,
    /// Best-fit searches that found a usable hole.
    pub best_fit_hits: u64,
    /// Freed ranges recorded as holes.
    pub holes_reclaimed: u64,
    /// Freed ranges dropped (too small or set full).
    pub holes_dropped: u64,
}

/// Hole set plus the current end of the data region.
#[derive(Debug)]
pub struct HoleAllocator {
    holes: Vec<Hole>,
    enabled: bool,
    max_holes: usize,
    min_hole_size: u64,
    physical_end: u64,
    stats: AllocatorStats,
}

impl HoleAllocator {
    /// Allocator for a container whose file currently ends at `file_end`.
    pub fn new(enabled: bool, max_holes: usize, min_hole_size: u64, file_end: u64) -> Self {
        HoleAllocator {
            holes: Vec::new(),
            enabled,
            max_holes,
            min_hole_size,
            physical_end: file_end.max(DATA_REGION_START),
            stats: AllocatorStats::default(),
        }
    }

    /// Place an extent with `payload_len` payload bytes; returns the
    /// absolute offset for the extent header.
    ///
    /// With `sequential` set (the caller saw strictly increasing page
    /// numbers), the hole search is skipped to keep consecutive pages
    /// physically adjacent.
    pub fn allocate(&mut self, payload_len: u64, sequential: bool) -> u64 {
        let need = payload_len + EXTENT_HEADER_SIZE as u64;

        if self.enabled && !sequential {
            if let Some(best) = self.best_fit(need) {
                let hole = self.holes[best];
                let remainder = hole.length - need;
                if remainder >= self.min_hole_size {
                    self.holes[best] = Hole {
                        offset: hole.offset + need,
                        length: remainder,
                    };
                } else {
                    self.holes.swap_remove(best);
                }
                self.stats.hole_reuses += 1;
                self.stats.best_fit_hits += 1;
                log::trace!(
                    "reusing hole at {} for {} bytes ({} left over)",
                    hole.offset,
                    need,
                    remainder
                );
                return hole.offset;
            }
        }

        let offset = self.physical_end;
        self.physical_end += need;
        self.stats.appends += 1;
        if sequential {
            self.stats.sequential_appends += 1;
        }
        offset
    }

    /// Smallest hole with `length >= need`; lowest offset breaks ties.
    fn best_fit(&self, need: u64) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, hole) in self.holes.iter().enumerate() {
            if hole.length < need {
                continue;
            }
            best = match best {
                None => Some(i),
                Some(j) => {
                    let cur = self.holes[j];
                    if hole.length < cur.length
                        || (hole.length == cur.length && hole.offset < cur.offset)
                    {
                        Some(i)
                    } else {
                        Some(j)
                    }
                }
            };
        }
        best
    }

    /// Return a freed extent range to the hole set.
    ///
    /// Adjacent holes are merged first; a range that is still too small,
    /// or arrives when the set is full, is dropped (bounded memory over
    /// perfect reuse).
    pub fn free(&mut self, offset: u64, length: u64) {
        if !self.enabled || length == 0 {
            return;
        }

        let mut offset = offset;
        let mut length = length;
        // Merge with a hole ending exactly at `offset` and one starting
        // exactly at `offset + length`.
        let mut i = 0;
        while i < self.holes.len() {
            let hole = self.holes[i];
            if hole.offset + hole.length == offset {
                offset = hole.offset;
                length += hole.length;
                self.holes.swap_remove(i);
                continue;
            }
            if offset + length == hole.offset {
                length += hole.length;
                self.holes.swap_remove(i);
                continue;
            }
            i += 1;
        }

        if length >= self.min_hole_size && self.holes.len() < self.max_holes {
            self.holes.push(Hole { offset, length });
            self.stats.holes_reclaimed += 1;
        } else {
            self.stats.holes_dropped += 1;
        }
    }

    /// Rebuild the hole set from the index at open time.
    ///
    /// Gaps of at least `min_hole_size` between consecutive extents (and
    /// between the last extent and end of file) become holes.
    pub fn rebuild(&mut self, index: &PageIndex, file_end: u64) {
        self.holes.clear();
        self.physical_end = file_end.max(DATA_REGION_START);
        if !self.enabled {
            return;
        }

        let mut extents: Vec<(u64, u64)> = index
            .allocated()
            .map(|(_, e)| (e.physical_offset, e.extent_len()))
            .collect();
        extents.sort_unstable_by_key(|&(offset, _)| offset);

        let mut prev_end = DATA_REGION_START;
        for (offset, len) in extents {
            if offset > prev_end && offset - prev_end >= self.min_hole_size {
                if self.holes.len() < self.max_holes {
                    self.holes.push(Hole {
                        offset: prev_end,
                        length: offset - prev_end,
                    });
                }
            }
            prev_end = prev_end.max(offset + len);
        }
        if self.physical_end > prev_end && self.physical_end - prev_end >= self.min_hole_size {
            if self.holes.len() < self.max_holes {
                self.holes.push(Hole {
                    offset: prev_end,
                    length: self.physical_end - prev_end,
                });
            }
        }
        log::debug!("rebuilt {} holes from index", self.holes.len());
    }

    /// Current end of the data region (the append point).
    pub fn physical_end(&self) -> u64 {
        self.physical_end
    }

    /// Bytes in use by extents: data region minus tracked holes.
    pub fn used_bytes(&self) -> u64 {
        let holed: u64 = self.holes.iter().map(|h| h.length).sum();
        (self.physical_end - DATA_REGION_START).saturating_sub(holed)
    }

    /// Number of tracked holes.
    pub fn hole_count(&self) -> usize {
        self.holes.len()
    }

    /// Snapshot of the tracked holes (tests and diagnostics).
    pub fn holes(&self) -> &[Hole] {
        &self.holes
    }

    /// Allocator counters.
    pub fn stats(&self) -> &AllocatorStats {
        &self.stats
    }
}
