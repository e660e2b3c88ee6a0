//! Block-mapped compressed page store for embedded SQL database files.
//!
//! The `ccvfs` crate implements a transparent storage engine that sits
//! beneath an embedded SQL database's file abstraction. The host engine
//! issues ordinary page-granular reads and writes; on disk, the file is a
//! packed container of variable-size compressed (and optionally encrypted)
//! extents, each carrying a CRC32 of the original plaintext page.
//!
//! A container file starts with a fixed 128-byte header and a fixed-capacity
//! index table mapping every logical page number to the physical extent that
//! backs it. Freed extents become reusable holes; a bounded write-behind
//! buffer coalesces repeated writes to the same page before they reach disk.
//!
//! # Quick example
//!
//! ```no_run
//! use ccvfs::store::config::VfsConfig;
//! use ccvfs::store::vfs::{CcVfs, OpenOptions, StdVfs, VfsFile};
//!
//! let mut config = VfsConfig::default();
//! config.compression = Some("rle".to_string());
//!
//! let vfs = CcVfs::new(StdVfs::new(), config).unwrap();
//! let mut file = vfs.open("data.db", OpenOptions::main_db().create(true)).unwrap();
//!
//! file.write(0, b"hello").unwrap();
//! let mut buf = [0u8; 5];
//! file.read(0, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//! file.close().unwrap();
//! ```
//!
//! # Key entry points
//!
//! | Type / Function | Purpose |
//! |-----------------|---------|
//! | [`CcVfs`](store::vfs::CcVfs) | Open database files, route auxiliary files |
//! | [`PageStore`](store::pager::PageStore) | The page I/O core over one container file |
//! | [`VfsConfig`](store::config::VfsConfig) | Compression, encryption, buffer, and hole tuning |
//! | [`register_compressor`](store::registry::register_compressor) | Plug in a custom compression algorithm |
//! | [`register_cipher`](store::registry::register_cipher) | Plug in a custom cipher |
//!
//! # Module overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`store::vfs`] | Filesystem façade: open routing, pass-through files, file control |
//! | [`store::pager`] | Page I/O core: read/write/truncate/sync over the container |
//! | [`store::buffer`] | Coalescing write-behind buffer with LRU eviction |
//! | [`store::alloc`] | Hole tracking and best-fit extent placement |
//! | [`store::codec`] | Per-page compress/encrypt and decrypt/decompress pipeline |
//! | [`store::header`] | 128-byte container header |
//! | [`store::index`] | Logical-page-to-extent index table |
//! | [`store::extent`] | 32-byte on-disk extent header |
//! | [`store::registry`] | Named compression and cipher algorithm registry |
//! | [`store::checksum`] | CRC32 used for header and page integrity |
//! | [`store::config`] | Configuration surface and validation |
//! | [`store::constants`] | Container format constants |

pub mod store;

use thiserror::Error;

/// Errors returned by `ccvfs` operations.
#[derive(Error, Debug)]
pub enum CcvfsError {
    /// The file does not carry the container magic.
    #[error("Not a ccvfs container: {0}")]
    NotCcvfs(String),

    /// The container was written by an incompatible major version.
    #[error("Container version mismatch: file is v{file_major}, supported is v{supported_major}")]
    VersionMismatch {
        /// Major version found in the file header.
        file_major: u16,
        /// Major version this build understands.
        supported_major: u16,
    },

    /// The header checksum or a header field failed validation.
    #[error("Corrupt container header: {0}")]
    CorruptHeader(String),

    /// The index table could not be read back consistently.
    #[error("Corrupt index table: {0}")]
    CorruptIndex(String),

    /// A page failed its checksum or extent-header validation.
    #[error("Corrupt page {page}: {detail}")]
    CorruptPage {
        /// Logical page number that failed validation.
        page: u32,
        /// What failed (checksum mismatch, bad extent magic, ...).
        detail: String,
    },

    /// The fixed index region has no room for more pages.
    #[error("Index full: container limited to {max_pages} pages")]
    IndexFull {
        /// Hard capacity of the persisted index table.
        max_pages: u32,
    },

    /// Extent placement failed.
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// An underlying read, write, seek, or sync failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// The container is encrypted but no key is configured.
    #[error("Key required: {0}")]
    KeyRequired(String),

    /// The configured key does not match the container.
    #[error("Key mismatch: {0}")]
    KeyMismatch(String),

    /// An invalid argument was supplied (bad page size, null name, ...).
    #[error("Misuse: {0}")]
    Misuse(String),

    /// The container names a compression or cipher algorithm that is not registered.
    #[error("Unsupported algorithm: {0}")]
    Unsupported(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CcvfsError>;
