//! Filesystem façade.
//!
//! [`CcVfs`] intercepts exactly one thing: opening a main database file,
//! which gets a [`PageStore`]-backed compressed handle. Everything else
//! (journals, write-ahead logs, temp files, deletes, existence checks,
//! randomness, sleeping, clock reads) passes straight through to the
//! inner [`Vfs`], because the host's own journaling must see plain bytes.
//!
//! The [`VfsFile`] trait mirrors the host database's file-operation
//! contract; both the compressed and the plain handle implement it, so the
//! host cannot tell which one it got.

use std::fs::{File, OpenOptions as FsOpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;

use crate::store::config::VfsConfig;
use crate::store::pager::{PageStore, StoreStats, SyncLevel};
use crate::{CcvfsError, Result};

/// Host lock ladder, pass-through to the underlying file lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    /// No lock held.
    None,
    /// Shared read lock.
    Shared,
    /// Intent to write.
    Reserved,
    /// Waiting for readers to drain.
    Pending,
    /// Exclusive write lock.
    Exclusive,
}

/// What kind of file the host is opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// The main database file; gets the compressed container treatment.
    MainDb,
    /// Rollback journal; plain bytes.
    Journal,
    /// Write-ahead log; plain bytes.
    Wal,
    /// Temporary file; plain bytes.
    Temp,
}

/// Open flags, reduced to what the engine distinguishes.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    /// What the host is opening.
    pub kind: FileKind,
    /// Create the file (and for a main database, the container) if absent.
    pub create: bool,
    /// Open without write access.
    pub read_only: bool,
}

impl OpenOptions {
    /// Options for a main database file.
    pub fn main_db() -> Self {
        OpenOptions {
            kind: FileKind::MainDb,
            create: false,
            read_only: false,
        }
    }

    /// Options for a rollback journal.
    pub fn journal() -> Self {
        OpenOptions {
            kind: FileKind::Journal,
            create: true,
            read_only: false,
        }
    }

    /// Options for a write-ahead log.
    pub fn wal() -> Self {
        OpenOptions {
            kind: FileKind::Wal,
            create: true,
            read_only: false,
        }
    }

    /// Options for a temp file.
    pub fn temp() -> Self {
        OpenOptions {
            kind: FileKind::Temp,
            create: true,
            read_only: false,
        }
    }

    /// Set the create flag.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Set read-only access.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// File-control operations beyond the standard contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileControl {
    /// Engine counters and size accounting.
    Stats,
    /// Number of checksum mismatches tolerated so far.
    CorruptPages,
    /// Flush the write buffer without a full sync.
    FlushBuffer,
}

/// Reply to a [`FileControl`] request.
#[derive(Debug)]
pub enum FileControlReply {
    /// Counters snapshot.
    Stats(Box<StoreStats>),
    /// Corrupt-page count.
    CorruptPages(u64),
    /// Operation completed with nothing to report.
    Done,
}

impl FileControlReply {
    /// JSON rendering of the reply payload.
    pub fn to_json(&self) -> Result<String> {
        match self {
            FileControlReply::Stats(stats) => serde_json::to_string_pretty(stats)
                .map_err(|e| CcvfsError::Io(format!("Cannot serialize stats: {}", e))),
            FileControlReply::CorruptPages(count) => Ok(count.to_string()),
            FileControlReply::Done => Ok("null".to_string()),
        }
    }
}

/// The host database's file-operation contract.
pub trait VfsFile {
    /// Read exactly `buf.len()` bytes at `offset`; never-written regions
    /// read as zeros.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
    /// Write `buf` at `offset`.
    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()>;
    /// Shrink or grow to `size` bytes.
    fn truncate(&mut self, size: u64) -> Result<()>;
    /// Persist everything written so far.
    fn sync(&mut self, level: SyncLevel) -> Result<()>;
    /// Logical size in bytes.
    fn file_size(&mut self) -> Result<u64>;
    /// Take (or upgrade to) a lock level.
    fn lock(&mut self, level: LockLevel) -> Result<()>;
    /// Downgrade to a lock level.
    fn unlock(&mut self, level: LockLevel) -> Result<()>;
    /// Whether this handle holds a reserved-or-stronger lock.
    fn check_reserved_lock(&mut self) -> Result<bool>;
    /// Atomic-write granularity to advertise to the host.
    fn sector_size(&self) -> u32;
    /// Extended operations.
    fn file_control(&mut self, op: FileControl) -> Result<FileControlReply>;
    /// Flush, persist metadata, and release the file.
    fn close(&mut self) -> Result<()>;
}

/// The underlying filesystem: everything the engine needs from the OS.
pub trait Vfs {
    /// Open (optionally creating) a raw byte file.
    fn open_raw(&self, path: &Path, create: bool, read_only: bool) -> Result<File>;
    /// Delete a file.
    fn delete(&self, path: &Path) -> Result<()>;
    /// Whether a file exists.
    fn exists(&self, path: &Path) -> bool;
    /// Fill `buf` with randomness (temp-name quality, not key material).
    fn randomness(&self, buf: &mut [u8]);
    /// Block the calling thread for `micros` microseconds.
    fn sleep(&self, micros: u64);
    /// Wall-clock time, unix seconds.
    fn current_time(&self) -> u64;
}

/// [`Vfs`] over `std::fs`.
#[derive(Debug, Default)]
pub struct StdVfs;

impl StdVfs {
    /// The standard filesystem.
    pub fn new() -> Self {
        StdVfs
    }
}

impl Vfs for StdVfs {
    fn open_raw(&self, path: &Path, create: bool, read_only: bool) -> Result<File> {
        FsOpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(create && !read_only)
            .open(path)
            .map_err(|e| CcvfsError::Io(format!("Cannot open {}: {}", path.display(), e)))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)
            .map_err(|e| CcvfsError::Io(format!("Cannot delete {}: {}", path.display(), e)))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn randomness(&self, buf: &mut [u8]) {
        // Temp-name quality only. Seeded from the clock, stepped with a
        // 64-bit LCG.
        let mut state = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E3779B97F4A7C15);
        for byte in buf.iter_mut() {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *byte = (state >> 33) as u8;
        }
    }

    fn sleep(&self, micros: u64) {
        std::thread::sleep(std::time::Duration::from_micros(micros));
    }

    fn current_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

fn apply_lock(file: &File, held: &mut LockLevel, level: LockLevel) -> Result<()> {
    if level == *held {
        return Ok(());
    }
    let result = match level {
        LockLevel::None => file.unlock(),
        LockLevel::Shared => file.lock_shared(),
        LockLevel::Reserved | LockLevel::Pending | LockLevel::Exclusive => file.lock_exclusive(),
    };
    result.map_err(|e| CcvfsError::Io(format!("Cannot change file lock: {}", e)))?;
    *held = level;
    Ok(())
}

/// Compressed handle over a main database file.
pub struct CompressedFile {
    store: PageStore,
    held: LockLevel,
}

impl VfsFile for CompressedFile {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.store.read(offset, buf)
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.store.write(offset, buf)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.store.truncate(size)
    }

    fn sync(&mut self, level: SyncLevel) -> Result<()> {
        self.store.sync(level)
    }

    fn file_size(&mut self) -> Result<u64> {
        Ok(self.store.file_size())
    }

    fn lock(&mut self, level: LockLevel) -> Result<()> {
        apply_lock(self.store.file_handle(), &mut self.held, level)
    }

    fn unlock(&mut self, level: LockLevel) -> Result<()> {
        apply_lock(self.store.file_handle(), &mut self.held, level)
    }

    fn check_reserved_lock(&mut self) -> Result<bool> {
        Ok(self.held >= LockLevel::Reserved)
    }

    fn sector_size(&self) -> u32 {
        self.store.page_size()
    }

    fn file_control(&mut self, op: FileControl) -> Result<FileControlReply> {
        match op {
            FileControl::Stats => Ok(FileControlReply::Stats(Box::new(self.store.stats()))),
            FileControl::CorruptPages => {
                Ok(FileControlReply::CorruptPages(self.store.corrupt_pages_seen()))
            }
            FileControl::FlushBuffer => {
                self.store.flush_all()?;
                Ok(FileControlReply::Done)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.store.close()
    }
}

impl CompressedFile {
    /// The page store behind this handle (diagnostics and tests).
    pub fn store(&mut self) -> &mut PageStore {
        &mut self.store
    }
}

/// Pass-through handle for journals, WAL, temp, and non-container files.
pub struct PlainFile {
    file: File,
    path: PathBuf,
    held: LockLevel,
}

impl VfsFile for PlainFile {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| CcvfsError::Io(format!("Cannot seek in {}: {}", self.path.display(), e)))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    return Err(CcvfsError::Io(format!(
                        "Cannot read {}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }
        }
        // Short reads past end-of-file zero-fill, as the host expects.
        buf[filled..].fill(0);
        Ok(())
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| CcvfsError::Io(format!("Cannot seek in {}: {}", self.path.display(), e)))?;
        self.file
            .write_all(buf)
            .map_err(|e| CcvfsError::Io(format!("Cannot write {}: {}", self.path.display(), e)))
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.file
            .set_len(size)
            .map_err(|e| CcvfsError::Io(format!("Cannot truncate {}: {}", self.path.display(), e)))
    }

    fn sync(&mut self, level: SyncLevel) -> Result<()> {
        let result = match level {
            SyncLevel::DataOnly => self.file.sync_data(),
            SyncLevel::Full => self.file.sync_all(),
        };
        result.map_err(|e| CcvfsError::Io(format!("Cannot sync {}: {}", self.path.display(), e)))
    }

    fn file_size(&mut self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| CcvfsError::Io(format!("Cannot stat {}: {}", self.path.display(), e)))
    }

    fn lock(&mut self, level: LockLevel) -> Result<()> {
        apply_lock(&self.file, &mut self.held, level)
    }

    fn unlock(&mut self, level: LockLevel) -> Result<()> {
        apply_lock(&self.file, &mut self.held, level)
    }

    fn check_reserved_lock(&mut self) -> Result<bool> {
        Ok(self.held >= LockLevel::Reserved)
    }

    fn sector_size(&self) -> u32 {
        512
    }

    fn file_control(&mut self, _op: FileControl) -> Result<FileControlReply> {
        Err(CcvfsError::Unsupported(
            "file control on a plain file".to_string(),
        ))
    }

    fn close(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| CcvfsError::Io(format!("Cannot sync {}: {}", self.path.display(), e)))
    }
}

/// A handle returned by [`CcVfs::open`]: compressed or pass-through.
pub enum CcvfsFile {
    /// Main database file backed by a page store.
    Compressed(CompressedFile),
    /// Anything else, served verbatim.
    Plain(PlainFile),
}

impl CcvfsFile {
    /// True when this handle is container-backed.
    pub fn is_compressed(&self) -> bool {
        matches!(self, CcvfsFile::Compressed(_))
    }

    /// The compressed handle, if this is one.
    pub fn as_compressed(&mut self) -> Option<&mut CompressedFile> {
        match self {
            CcvfsFile::Compressed(file) => Some(file),
            CcvfsFile::Plain(_) => None,
        }
    }
}

impl VfsFile for CcvfsFile {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            CcvfsFile::Compressed(f) => f.read(offset, buf),
            CcvfsFile::Plain(f) => f.read(offset, buf),
        }
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        match self {
            CcvfsFile::Compressed(f) => f.write(offset, buf),
            CcvfsFile::Plain(f) => f.write(offset, buf),
        }
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        match self {
            CcvfsFile::Compressed(f) => f.truncate(size),
            CcvfsFile::Plain(f) => f.truncate(size),
        }
    }

    fn sync(&mut self, level: SyncLevel) -> Result<()> {
        match self {
            CcvfsFile::Compressed(f) => f.sync(level),
            CcvfsFile::Plain(f) => f.sync(level),
        }
    }

    fn file_size(&mut self) -> Result<u64> {
        match self {
            CcvfsFile::Compressed(f) => f.file_size(),
            CcvfsFile::Plain(f) => f.file_size(),
        }
    }

    fn lock(&mut self, level: LockLevel) -> Result<()> {
        match self {
            CcvfsFile::Compressed(f) => f.lock(level),
            CcvfsFile::Plain(f) => f.lock(level),
        }
    }

    fn unlock(&mut self, level: LockLevel) -> Result<()> {
        match self {
            CcvfsFile::Compressed(f) => f.unlock(level),
            CcvfsFile::Plain(f) => f.unlock(level),
        }
    }

    fn check_reserved_lock(&mut self) -> Result<bool> {
        match self {
            CcvfsFile::Compressed(f) => f.check_reserved_lock(),
            CcvfsFile::Plain(f) => f.check_reserved_lock(),
        }
    }

    fn sector_size(&self) -> u32 {
        match self {
            CcvfsFile::Compressed(f) => f.sector_size(),
            CcvfsFile::Plain(f) => f.sector_size(),
        }
    }

    fn file_control(&mut self, op: FileControl) -> Result<FileControlReply> {
        match self {
            CcvfsFile::Compressed(f) => f.file_control(op),
            CcvfsFile::Plain(f) => f.file_control(op),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            CcvfsFile::Compressed(f) => f.close(),
            CcvfsFile::Plain(f) => f.close(),
        }
    }
}

/// The compressing VFS: wraps an inner [`Vfs`] and a validated config.
pub struct CcVfs<V: Vfs = StdVfs> {
    inner: V,
    config: VfsConfig,
}

impl<V: Vfs> CcVfs<V> {
    /// Validate `config` and build the VFS.
    pub fn new(inner: V, config: VfsConfig) -> Result<Self> {
        config.validate()?;
        Ok(CcVfs { inner, config })
    }

    /// The active configuration.
    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    /// Open a file the way the host database would.
    ///
    /// Main database files become compressed handles; a main database that
    /// turns out not to be a container (and is not being created) passes
    /// through as plain bytes, as do journals, WAL, and temp files.
    pub fn open<P: AsRef<Path>>(&self, path: P, opts: OpenOptions) -> Result<CcvfsFile> {
        let path = path.as_ref();
        let file = self.inner.open_raw(path, opts.create, opts.read_only)?;

        if opts.kind != FileKind::MainDb {
            return Ok(CcvfsFile::Plain(PlainFile {
                file,
                path: path.to_path_buf(),
                held: LockLevel::None,
            }));
        }

        match PageStore::open_or_create(file, &self.config, opts.create && !opts.read_only) {
            Ok(store) => Ok(CcvfsFile::Compressed(CompressedFile {
                store,
                held: LockLevel::None,
            })),
            Err(CcvfsError::NotCcvfs(_)) => {
                log::debug!(
                    "{} is not a container, serving as a plain file",
                    path.display()
                );
                let file = self.inner.open_raw(path, false, opts.read_only)?;
                Ok(CcvfsFile::Plain(PlainFile {
                    file,
                    path: path.to_path_buf(),
                    held: LockLevel::None,
                }))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a file.
    pub fn delete<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.inner.delete(path.as_ref())
    }

    /// Whether a file exists.
    pub fn exists<P: AsRef<Path>>(&self, path: P) -> bool {
        self.inner.exists(path.as_ref())
    }

    /// Fill `buf` with randomness from the inner VFS.
    pub fn randomness(&self, buf: &mut [u8]) {
        self.inner.randomness(buf)
    }

    /// Sleep for `micros` microseconds.
    pub fn sleep(&self, micros: u64) {
        self.inner.sleep(micros)
    }

    /// Wall-clock time, unix seconds.
    pub fn current_time(&self) -> u64 {
        self.inner.current_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vfs_with(config: VfsConfig) -> CcVfs {
        CcVfs::new(StdVfs::new(), config).unwrap()
    }

    fn small_config() -> VfsConfig {
        let mut config = VfsConfig::default();
        config.page_size = 4096;
        config.compression = Some("rle".to_string());
        config
    }

    #[test]
    fn test_main_db_roundtrip_through_vfs() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs_with(small_config());
        let path = dir.path().join("main.db");

        let mut file = vfs.open(&path, OpenOptions::main_db().create(true)).unwrap();
        assert!(file.is_compressed());
        file.write(0, b"hello").unwrap();
        let mut buf = [0u8; 5];
        file.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        file.close().unwrap();

        // On disk it is a container, not the plain bytes.
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..7], b"CCVFSDB");
    }

    #[test]
    fn test_journal_passes_through_uncompressed() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs_with(small_config());
        let path = dir.path().join("main.db-journal");

        let mut journal = vfs.open(&path, OpenOptions::journal()).unwrap();
        assert!(!journal.is_compressed());
        journal.write(0, b"journal bytes").unwrap();
        journal.sync(SyncLevel::Full).unwrap();
        assert_eq!(journal.file_size().unwrap(), 13);

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw, b"journal bytes");
    }

    #[test]
    fn test_plain_file_short_read_zero_fills() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs_with(small_config());
        let path = dir.path().join("t.tmp");

        let mut tmp = vfs.open(&path, OpenOptions::temp()).unwrap();
        tmp.write(0, b"ab").unwrap();
        let mut buf = [0xEEu8; 8];
        tmp.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"ab\0\0\0\0\0\0");
    }

    #[test]
    fn test_non_container_main_db_served_plain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.db");
        std::fs::write(&path, b"plain legacy database").unwrap();

        let vfs = vfs_with(small_config());
        let mut file = vfs.open(&path, OpenOptions::main_db()).unwrap();
        assert!(!file.is_compressed());
        let mut buf = [0u8; 5];
        file.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"plain");
    }

    #[test]
    fn test_create_does_not_clobber_existing_plain_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.db");
        std::fs::write(&path, b"precious").unwrap();

        let vfs = vfs_with(small_config());
        let mut file = vfs
            .open(&path, OpenOptions::main_db().create(true))
            .unwrap();
        assert!(!file.is_compressed());
        file.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"precious");
    }

    #[test]
    fn test_file_control_stats_json() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs_with(small_config());
        let mut file = vfs
            .open(dir.path().join("main.db"), OpenOptions::main_db().create(true))
            .unwrap();
        file.write(0, &vec![7u8; 4096]).unwrap();

        let reply = file.file_control(FileControl::Stats).unwrap();
        let json = reply.to_json().unwrap();
        assert!(json.contains("\"total_pages\": 1"));
        assert!(json.contains("\"write_ops\": 1"));

        match file.file_control(FileControl::CorruptPages).unwrap() {
            FileControlReply::CorruptPages(0) => {}
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_lock_ladder_and_reserved_check() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs_with(small_config());
        let mut file = vfs
            .open(dir.path().join("main.db"), OpenOptions::main_db().create(true))
            .unwrap();

        assert!(!file.check_reserved_lock().unwrap());
        file.lock(LockLevel::Shared).unwrap();
        assert!(!file.check_reserved_lock().unwrap());
        file.lock(LockLevel::Reserved).unwrap();
        assert!(file.check_reserved_lock().unwrap());
        file.unlock(LockLevel::None).unwrap();
        assert!(!file.check_reserved_lock().unwrap());
    }

    #[test]
    fn test_vfs_utility_passthrough() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs_with(small_config());
        let path = dir.path().join("x.tmp");
        std::fs::write(&path, b"x").unwrap();

        assert!(vfs.exists(&path));
        vfs.delete(&path).unwrap();
        assert!(!vfs.exists(&path));

        let mut buf = [0u8; 16];
        vfs.randomness(&mut buf);
        assert!(vfs.current_time() > 0);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = small_config();
        config.page_size = 1000;
        assert!(matches!(
            CcVfs::new(StdVfs::new(), config),
            Err(CcvfsError::Misuse(_))
        ));
    }
}
