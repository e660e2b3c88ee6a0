//! Container CRC32 integrity primitive.
//!
//! Standard IEEE CRC32: polynomial 0xEDB88320 (reflected), initial value
//! 0xFFFFFFFF, final XOR 0xFFFFFFFF. The same function covers the header
//! self-check and the per-page plaintext checksums stored in index entries
//! and extent headers, so on-disk values are bit-exact across platforms.

/// CRC32 of a byte range.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// CRC32 across several non-contiguous ranges, chained in order.
///
/// Used when a structure is checksummed with a field skipped: pass the
/// slices before and after the skipped field.
pub fn crc32_parts(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}
