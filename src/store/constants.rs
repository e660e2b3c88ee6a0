//! Container format constants.
//!
//! Offsets and sizes for the three on-disk regions: the fixed 128-byte
//! header at offset 0, the fixed-capacity index table at offset 128, and
//! the packed data region after it. All multi-byte fields are little-endian.

// ── Container header (128 bytes) ────────────────────────────────────

/// Container magic at offset 0 (8 bytes including the trailing NUL).
pub const CONTAINER_MAGIC: &[u8; 8] = b"CCVFSDB\0";
/// Size of the container header in bytes.
pub const HEADER_SIZE: usize = 128;
/// Major format version written by this build.
pub const VERSION_MAJOR: u16 = 1;
/// Minor format version written by this build.
pub const VERSION_MINOR: u16 = 0;

/// Offset of the magic string. 8 bytes.
pub const HDR_MAGIC: usize = 0;
/// Offset of the major version. 2 bytes.
pub const HDR_VERSION_MAJOR: usize = 8;
/// Offset of the minor version. 2 bytes.
pub const HDR_VERSION_MINOR: usize = 10;
/// Offset of the header size field (always 128). 4 bytes.
pub const HDR_HEADER_SIZE: usize = 12;
/// Offset of the host engine's own page size (0 if unknown). 4 bytes.
pub const HDR_SOURCE_PAGE_SIZE: usize = 16;
/// Offset of the host engine version tag. 4 bytes.
pub const HDR_HOST_VERSION: usize = 20;
/// Offset of the count of logical pages in use. 4 bytes.
pub const HDR_TOTAL_PAGES: usize = 24;
/// Offset of the NUL-padded compression algorithm name. 12 bytes.
pub const HDR_COMPRESSION: usize = 28;
/// Offset of the NUL-padded encryption algorithm name. 12 bytes.
pub const HDR_ENCRYPTION: usize = 40;
/// Offset of the configured logical page size. 4 bytes.
pub const HDR_PAGE_SIZE: usize = 52;
/// Offset of the index table offset field (always 128). 8 bytes.
pub const HDR_INDEX_OFFSET: usize = 56;
/// Offset of the original (logical) size in bytes. 8 bytes.
pub const HDR_ORIGINAL_SIZE: usize = 64;
/// Offset of the physical data-region size in bytes. 8 bytes.
pub const HDR_PHYSICAL_SIZE: usize = 72;
/// Offset of the compression ratio percentage. 4 bytes.
pub const HDR_COMPRESS_RATIO: usize = 80;
/// Offset of the creation flags. 4 bytes.
pub const HDR_CREATION_FLAGS: usize = 84;
/// Offset of the master-key hash (0 when no key). 4 bytes.
pub const HDR_KEY_HASH: usize = 88;
/// Offset of the creation timestamp (unix seconds). 8 bytes.
pub const HDR_CREATED_AT: usize = 92;
/// Offset of the last assigned extent sequence number. 8 bytes.
pub const HDR_SEQUENCE: usize = 100;
/// Offset of the reserved area. 16 bytes, zero.
pub const HDR_RESERVED: usize = 108;
/// Offset of the header CRC32, computed over bytes [0..124). 4 bytes.
pub const HDR_CHECKSUM: usize = 124;
/// Number of header bytes covered by the header checksum.
pub const HDR_CHECKSUM_COVERAGE: usize = 124;

/// Maximum length of an algorithm name, on disk and in the registry.
pub const ALGORITHM_NAME_MAX: usize = 12;

// ── Index table ─────────────────────────────────────────────────────

/// Hard capacity of the persisted index table, in pages.
pub const MAX_PAGES: u32 = 65_536;
/// Size of one index entry in bytes.
pub const INDEX_ENTRY_SIZE: usize = 24;
/// Absolute offset of the index table.
pub const INDEX_OFFSET: u64 = HEADER_SIZE as u64;
/// Size of the persisted index region in bytes.
pub const INDEX_REGION_SIZE: u64 = MAX_PAGES as u64 * INDEX_ENTRY_SIZE as u64;
/// Absolute offset where the data region begins.
pub const DATA_REGION_START: u64 = INDEX_OFFSET + INDEX_REGION_SIZE;

/// Offset of the physical extent offset within an index entry. 8 bytes.
pub const IDX_PHYSICAL_OFFSET: usize = 0;
/// Offset of the stored payload size within an index entry. 4 bytes.
pub const IDX_COMPRESSED_SIZE: usize = 8;
/// Offset of the original page size within an index entry. 4 bytes.
pub const IDX_ORIGINAL_SIZE: usize = 12;
/// Offset of the plaintext CRC32 within an index entry. 4 bytes.
pub const IDX_CHECKSUM: usize = 16;
/// Offset of the flags field within an index entry. 4 bytes.
pub const IDX_FLAGS: usize = 20;

/// In-memory index capacity used for a freshly created container.
pub const INDEX_INITIAL_CAPACITY: usize = 64;
/// Extra in-memory entries allocated beyond `total_pages` at load time.
pub const INDEX_CAPACITY_SLACK: usize = 16;

// ── Extent header (32 bytes) ────────────────────────────────────────

/// Extent magic at the start of every extent (4 ASCII bytes).
pub const EXTENT_MAGIC: &[u8; 4] = b"BCCV";
/// Size of the extent header in bytes.
pub const EXTENT_HEADER_SIZE: usize = 32;

/// Offset of the extent magic. 4 bytes.
pub const EXT_MAGIC: usize = 0;
/// Offset of the logical page number. 4 bytes.
pub const EXT_PAGE_NO: usize = 4;
/// Offset of the original page size. 4 bytes.
pub const EXT_ORIGINAL_SIZE: usize = 8;
/// Offset of the stored payload size. 4 bytes.
pub const EXT_COMPRESSED_SIZE: usize = 12;
/// Offset of the plaintext CRC32. 4 bytes.
pub const EXT_CHECKSUM: usize = 16;
/// Offset of the flags field. 4 bytes.
pub const EXT_FLAGS: usize = 20;
/// Offset of the wall-clock write timestamp (unix seconds). 4 bytes.
pub const EXT_TIMESTAMP: usize = 24;
/// Offset of the per-file monotonic sequence number. 4 bytes.
pub const EXT_SEQUENCE: usize = 28;

// ── Page flags (shared by index entries and extent headers) ─────────

/// Payload is compressed with the container's configured algorithm.
pub const FLAG_COMPRESSED: u32 = 1 << 0;
/// Payload is encrypted with the container's configured cipher.
pub const FLAG_ENCRYPTED: u32 = 1 << 1;
/// Page is all zeros; the extent carries no payload.
pub const FLAG_SPARSE: u32 = 1 << 2;
/// Bit position of the 8-bit compression level field.
pub const FLAG_LEVEL_SHIFT: u32 = 8;
/// Mask of the 8-bit compression level field.
pub const FLAG_LEVEL_MASK: u32 = 0xFF << FLAG_LEVEL_SHIFT;

// ── Page sizes ──────────────────────────────────────────────────────

/// Smallest accepted logical page size.
pub const MIN_PAGE_SIZE: u32 = 512;
/// Largest accepted logical page size.
pub const MAX_PAGE_SIZE: u32 = 65_536;
/// Default logical page size (64 KiB).
pub const DEFAULT_PAGE_SIZE: u32 = 65_536;

// ── Write buffer limits ─────────────────────────────────────────────

/// Smallest accepted `max_entries` for the write buffer.
pub const BUFFER_MIN_ENTRIES: usize = 4;
/// Largest accepted `max_entries` for the write buffer.
pub const BUFFER_MAX_ENTRIES: usize = 4096;
/// Smallest accepted `max_buffer_size` in bytes (64 KiB).
pub const BUFFER_MIN_SIZE: usize = 64 * 1024;
/// Largest accepted `max_buffer_size` in bytes (256 MiB).
pub const BUFFER_MAX_SIZE: usize = 256 * 1024 * 1024;

// ── Hole tracking defaults ──────────────────────────────────────────

/// Default cap on the number of tracked holes.
pub const DEFAULT_MAX_HOLES: usize = 256;
/// Default smallest freed range worth tracking, in bytes. Small enough
/// that even a freed sparse extent (bare 32-byte header) is reclaimable.
pub const DEFAULT_MIN_HOLE_SIZE: u64 = 32;
