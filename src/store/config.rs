//! Configuration surface for the page store.
//!
//! A [`VfsConfig`] is validated once when a [`CcVfs`](crate::store::vfs::CcVfs)
//! is constructed; bad combinations fail fast with `Misuse` rather than
//! surfacing later as I/O errors. The creation mode only tunes the default
//! buffer policy; every knob can still be set explicitly.

use serde::Serialize;

use crate::store::constants::*;
use crate::{CcvfsError, Result};

/// Workload hint recorded in the container's creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CreationMode {
    /// Latency-sensitive host: write-through, no buffering.
    Realtime,
    /// Bulk generation: buffer aggressively, flush late.
    Offline,
    /// General-purpose default.
    Hybrid,
}

impl CreationMode {
    /// On-disk encoding in the header's creation flags.
    pub fn to_flags(self) -> u32 {
        match self {
            CreationMode::Realtime => 1,
            CreationMode::Offline => 2,
            CreationMode::Hybrid => 3,
        }
    }

    /// Decode from creation flags; unknown values read as Hybrid.
    pub fn from_flags(flags: u32) -> Self {
        match flags & 0x3 {
            1 => CreationMode::Realtime,
            2 => CreationMode::Offline,
            _ => CreationMode::Hybrid,
        }
    }
}

/// Write-buffer tuning.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Buffer writes at all.
    pub enabled: bool,
    /// Cap on buffered page count.
    pub max_entries: usize,
    /// Cap on combined buffered payload bytes.
    pub max_buffer_size: usize,
    /// Flush everything once this many pages are buffered; 0 disables.
    pub auto_flush_pages: usize,
}

impl BufferConfig {
    /// Default buffer policy for a creation mode.
    pub fn for_mode(mode: CreationMode) -> Self {
        match mode {
            CreationMode::Realtime => BufferConfig {
                enabled: false,
                max_entries: BUFFER_MIN_ENTRIES,
                max_buffer_size: BUFFER_MIN_SIZE,
                auto_flush_pages: 0,
            },
            CreationMode::Offline => BufferConfig {
                enabled: true,
                max_entries: 1024,
                max_buffer_size: 64 * 1024 * 1024,
                auto_flush_pages: 0,
            },
            CreationMode::Hybrid => BufferConfig {
                enabled: true,
                max_entries: 64,
                max_buffer_size: 8 * 1024 * 1024,
                auto_flush_pages: 32,
            },
        }
    }
}

/// Hole-tracking tuning.
#[derive(Debug, Clone)]
pub struct HoleConfig {
    /// Track freed extents for reuse.
    pub enabled: bool,
    /// Cap on the number of tracked holes.
    pub max_holes: usize,
    /// Smallest freed range worth tracking, in bytes.
    pub min_hole_size: u64,
}

impl Default for HoleConfig {
    fn default() -> Self {
        HoleConfig {
            enabled: true,
            max_holes: DEFAULT_MAX_HOLES,
            min_hole_size: DEFAULT_MIN_HOLE_SIZE,
        }
    }
}

/// Everything a [`CcVfs`](crate::store::vfs::CcVfs) needs to open containers.
#[derive(Debug, Clone)]
pub struct VfsConfig {
    /// Registered compression algorithm name, or `None` to store plaintext.
    pub compression: Option<String>,
    /// Registered cipher name, or `None` to store unencrypted.
    pub encryption: Option<String>,
    /// Encryption key; required exactly when `encryption` is set.
    pub key: Option<Vec<u8>>,
    /// Compression level passed to the algorithm and recorded per page.
    pub compression_level: u8,
    /// Logical page size; power of two in `[MIN_PAGE_SIZE, MAX_PAGE_SIZE]`.
    pub page_size: u32,
    /// Workload hint; also picks the default buffer policy.
    pub creation_mode: CreationMode,
    /// Write-buffer tuning.
    pub buffer: BufferConfig,
    /// Hole-tracking tuning.
    pub holes: HoleConfig,
    /// Fail reads on checksum mismatch (default) instead of warning.
    pub strict_checksum: bool,
    /// Surface best-effort bytes from corrupt extents instead of failing.
    pub data_recovery: bool,
}

impl Default for VfsConfig {
    fn default() -> Self {
        let creation_mode = CreationMode::Hybrid;
        VfsConfig {
            compression: None,
            encryption: None,
            key: None,
            compression_level: 0,
            page_size: DEFAULT_PAGE_SIZE,
            creation_mode,
            buffer: BufferConfig::for_mode(creation_mode),
            holes: HoleConfig::default(),
            strict_checksum: true,
            data_recovery: false,
        }
    }
}

impl VfsConfig {
    /// Default configuration for a creation mode.
    pub fn for_mode(mode: CreationMode) -> Self {
        VfsConfig {
            creation_mode: mode,
            buffer: BufferConfig::for_mode(mode),
            ..VfsConfig::default()
        }
    }

    /// Fail fast on inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(CcvfsError::Misuse(format!(
                "page size {} must be a power of two in [{}, {}]",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }

        for name in [&self.compression, &self.encryption].into_iter().flatten() {
            if name.is_empty() || name.len() > ALGORITHM_NAME_MAX {
                return Err(CcvfsError::Misuse(format!(
                    "algorithm name '{}' must be 1..={} bytes",
                    name, ALGORITHM_NAME_MAX
                )));
            }
        }

        match (&self.encryption, &self.key) {
            (Some(_), None) => {
                return Err(CcvfsError::KeyRequired(
                    "encryption is configured but no key is set".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(CcvfsError::Misuse(
                    "a key is set but no encryption algorithm is configured".to_string(),
                ))
            }
            _ => {}
        }
        if let Some(key) = &self.key {
            if key.is_empty() {
                return Err(CcvfsError::Misuse("encryption key is empty".to_string()));
            }
        }

        if self.buffer.enabled {
            if !(BUFFER_MIN_ENTRIES..=BUFFER_MAX_ENTRIES).contains(&self.buffer.max_entries) {
                return Err(CcvfsError::Misuse(format!(
                    "buffer max_entries {} outside [{}, {}]",
                    self.buffer.max_entries, BUFFER_MIN_ENTRIES, BUFFER_MAX_ENTRIES
                )));
            }
            if !(BUFFER_MIN_SIZE..=BUFFER_MAX_SIZE).contains(&self.buffer.max_buffer_size) {
                return Err(CcvfsError::Misuse(format!(
                    "buffer max_buffer_size {} outside [{}, {}]",
                    self.buffer.max_buffer_size, BUFFER_MIN_SIZE, BUFFER_MAX_SIZE
                )));
            }
        }

        if self.holes.enabled && self.holes.max_holes == 0 {
            return Err(CcvfsError::Misuse(
                "hole detection enabled with max_holes == 0".to_string(),
            ));
        }

        Ok(())
    }
}
