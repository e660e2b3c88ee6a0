//! Named compression and cipher algorithm registry.
//!
//! Process-wide, append-mostly table keyed by algorithm name (1..=12 bytes,
//! case-sensitive). A container header records the *names* of its
//! algorithms; the open path resolves them here exactly once and the file
//! handle keeps the resolved descriptors for its lifetime, so the registry
//! is never consulted per-I/O.
//!
//! Registrations must complete before any container is opened. The table
//! is initialized lazily with the built-ins: `rle` and `xor` (the format's
//! reference algorithms), plus `zlib`, `lz4`, and `aes`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, RwLock};

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use byteorder::{ByteOrder, LittleEndian};
use once_cell::sync::Lazy;

use crate::store::constants::ALGORITHM_NAME_MAX;
use crate::{CcvfsError, Result};

/// A pluggable compression algorithm.
///
/// Implementations are pure byte-in/byte-out: `compress` and `decompress`
/// fill `dst` from scratch. `decompress` receives the original length,
/// recorded in the index entry, for algorithms whose streams do not carry
/// their own output size.
pub trait Compressor: Send + Sync {
    /// Registry name (1..=12 bytes).
    fn name(&self) -> &str;

    /// Compress `src` into `dst` at the given level (0 = algorithm default).
    fn compress(&self, src: &[u8], dst: &mut Vec<u8>, level: u8) -> Result<()>;

    /// Decompress `src` into `dst`. `original_len` is the exact expected
    /// output size.
    fn decompress(&self, src: &[u8], dst: &mut Vec<u8>, original_len: usize) -> Result<()>;

    /// Worst-case compressed size for an input of `src_len` bytes.
    fn max_compressed_size(&self, src_len: usize) -> usize;
}

/// A pluggable cipher.
///
/// Ciphers are size-preserving and work in place. `nonce` is unique per
/// stored extent (logical page number and write sequence packed together),
/// giving counter-mode ciphers a fresh stream for every extent; simple
/// ciphers may ignore it.
pub trait Cipher: Send + Sync {
    /// Registry name (1..=12 bytes).
    fn name(&self) -> &str;

    /// Required key length in bytes; 0 accepts any non-empty key.
    fn key_len(&self) -> usize;

    /// Encrypt `buf` in place.
    fn encrypt(&self, key: &[u8], nonce: u64, buf: &mut [u8]) -> Result<()>;

    /// Decrypt `buf` in place.
    fn decrypt(&self, key: &[u8], nonce: u64, buf: &mut [u8]) -> Result<()>;
}

struct Registry {
    compressors: HashMap<String, Arc<dyn Compressor>>,
    ciphers: HashMap<String, Arc<dyn Cipher>>,
}

impl Registry {
    fn with_builtins() -> Self {
        let mut reg = Registry {
            compressors: HashMap::new(),
            ciphers: HashMap::new(),
        };
        reg.compressors
            .insert("rle".to_string(), Arc::new(RleCompressor));
        reg.compressors
            .insert("zlib".to_string(), Arc::new(ZlibCompressor));
        reg.compressors
            .insert("lz4".to_string(), Arc::new(Lz4Compressor));
        reg.ciphers.insert("xor".to_string(), Arc::new(XorCipher));
        reg.ciphers
            .insert("aes".to_string(), Arc::new(AesCtrCipher));
        reg
    }
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::with_builtins()));

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CcvfsError::Misuse("algorithm name is empty".to_string()));
    }
    if name.len() > ALGORITHM_NAME_MAX {
        return Err(CcvfsError::Misuse(format!(
            "algorithm name '{}' exceeds {} bytes",
            name, ALGORITHM_NAME_MAX
        )));
    }
    Ok(())
}

/// Register a compression algorithm. Re-registering a name replaces the
/// previous entry.
pub fn register_compressor(compressor: Arc<dyn Compressor>) -> Result<()> {
    validate_name(compressor.name())?;
    let mut reg = REGISTRY.write().expect("registry lock poisoned");
    reg.compressors
        .insert(compressor.name().to_string(), compressor);
    Ok(())
}

/// Register a cipher. Re-registering a name replaces the previous entry.
pub fn register_cipher(cipher: Arc<dyn Cipher>) -> Result<()> {
    validate_name(cipher.name())?;
    let mut reg = REGISTRY.write().expect("registry lock poisoned");
    reg.ciphers.insert(cipher.name().to_string(), cipher);
    Ok(())
}

/// Look up a compression algorithm by name.
pub fn find_compressor(name: &str) -> Option<Arc<dyn Compressor>> {
    let reg = REGISTRY.read().expect("registry lock poisoned");
    reg.compressors.get(name).cloned()
}

/// Look up a cipher by name.
pub fn find_cipher(name: &str) -> Option<Arc<dyn Cipher>> {
    let reg = REGISTRY.read().expect("registry lock poisoned");
    reg.ciphers.get(name).cloned()
}

// ── Built-in: run-length encoding ───────────────────────────────────

/// Escape byte introducing an encoded run: `0xFF <len:u16 LE> <byte>`.
const RLE_MARKER: u8 = 0xFF;
/// Shortest run worth encoding; shorter runs are emitted as literals.
const RLE_MIN_RUN: usize = 4;
/// Longest run one escape sequence can carry.
const RLE_MAX_RUN: usize = u16::MAX as usize;

/// Run-length encoding with a 0xFF marker escape.
///
/// Literal bytes pass through unchanged; runs of [`RLE_MIN_RUN`] or more
/// identical bytes (and every literal 0xFF, which would be mistaken for a
/// marker) are encoded as `0xFF`, a little-endian u16 run length, and the
/// repeated byte.
struct RleCompressor;

impl Compressor for RleCompressor {
    fn name(&self) -> &str {
        "rle"
    }

    fn compress(&self, src: &[u8], dst: &mut Vec<u8>, _level: u8) -> Result<()> {
        dst.clear();
        let mut i = 0;
        while i < src.len() {
            let byte = src[i];
            let mut run = 1;
            while i + run < src.len() && src[i + run] == byte && run < RLE_MAX_RUN {
                run += 1;
            }
            if run >= RLE_MIN_RUN || byte == RLE_MARKER {
                dst.push(RLE_MARKER);
                let mut len = [0u8; 2];
                LittleEndian::write_u16(&mut len, run as u16);
                dst.extend_from_slice(&len);
                dst.push(byte);
            } else {
                for _ in 0..run {
                    dst.push(byte);
                }
            }
            i += run;
        }
        Ok(())
    }

    fn decompress(&self, src: &[u8], dst: &mut Vec<u8>, original_len: usize) -> Result<()> {
        dst.clear();
        dst.reserve(original_len);
        let mut i = 0;
        while i < src.len() {
            if src[i] == RLE_MARKER {
                if i + 4 > src.len() {
                    return Err(CcvfsError::Io(
                        "rle: truncated escape sequence".to_string(),
                    ));
                }
                let run = LittleEndian::read_u16(&src[i + 1..]) as usize;
                let byte = src[i + 3];
                dst.resize(dst.len() + run, byte);
                i += 4;
            } else {
                dst.push(src[i]);
                i += 1;
            }
        }
        if dst.len() != original_len {
            return Err(CcvfsError::Io(format!(
                "rle: decoded {} bytes, expected {}",
                dst.len(),
                original_len
            )));
        }
        Ok(())
    }

    fn max_compressed_size(&self, src_len: usize) -> usize {
        // Worst case: every byte is an isolated 0xFF, 4 output bytes each.
        src_len * 4 + 4
    }
}

// ── Built-in: zlib (flate2) ─────────────────────────────────────────

struct ZlibCompressor;

impl Compressor for ZlibCompressor {
    fn name(&self) -> &str {
        "zlib"
    }

    fn compress(&self, src: &[u8], dst: &mut Vec<u8>, level: u8) -> Result<()> {
        dst.clear();
        let compression = if level == 0 {
            flate2::Compression::default()
        } else {
            flate2::Compression::new(level.min(9) as u32)
        };
        let mut encoder = flate2::write::ZlibEncoder::new(std::mem::take(dst), compression);
        encoder
            .write_all(src)
            .map_err(|e| CcvfsError::Io(format!("zlib compress failed: {}", e)))?;
        *dst = encoder
            .finish()
            .map_err(|e| CcvfsError::Io(format!("zlib finish failed: {}", e)))?;
        Ok(())
    }

    fn decompress(&self, src: &[u8], dst: &mut Vec<u8>, original_len: usize) -> Result<()> {
        dst.clear();
        dst.reserve(original_len);
        let mut decoder = flate2::read::ZlibDecoder::new(src);
        decoder
            .read_to_end(dst)
            .map_err(|e| CcvfsError::Io(format!("zlib decompress failed: {}", e)))?;
        Ok(())
    }

    fn max_compressed_size(&self, src_len: usize) -> usize {
        // Deflate's stored-block bound plus the zlib wrapper.
        src_len + src_len / 1000 + 64
    }
}

// ── Built-in: LZ4 (lz4_flex) ────────────────────────────────────────

struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn name(&self) -> &str {
        "lz4"
    }

    fn compress(&self, src: &[u8], dst: &mut Vec<u8>, _level: u8) -> Result<()> {
        *dst = lz4_flex::compress(src);
        Ok(())
    }

    fn decompress(&self, src: &[u8], dst: &mut Vec<u8>, original_len: usize) -> Result<()> {
        *dst = lz4_flex::decompress(src, original_len)
            .map_err(|e| CcvfsError::Io(format!("lz4 decompress failed: {}", e)))?;
        Ok(())
    }

    fn max_compressed_size(&self, src_len: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(src_len)
    }
}

// ── Built-in: XOR key cycling ───────────────────────────────────────

/// Byte-wise XOR against a cycled key. Symmetric; ignores the nonce so
/// the stored bytes depend only on key and plaintext.
struct XorCipher;

impl XorCipher {
    fn apply(key: &[u8], buf: &mut [u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CcvfsError::KeyRequired("xor cipher needs a key".to_string()));
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= key[i % key.len()];
        }
        Ok(())
    }
}

impl Cipher for XorCipher {
    fn name(&self) -> &str {
        "xor"
    }

    fn key_len(&self) -> usize {
        0
    }

    fn encrypt(&self, key: &[u8], _nonce: u64, buf: &mut [u8]) -> Result<()> {
        XorCipher::apply(key, buf)
    }

    fn decrypt(&self, key: &[u8], _nonce: u64, buf: &mut [u8]) -> Result<()> {
        XorCipher::apply(key, buf)
    }
}

// ── Built-in: AES-256 counter mode ──────────────────────────────────

/// AES-256 run as a counter-mode keystream over the block cipher.
///
/// The 16-byte counter block is the extent nonce in the low quadword and
/// the block index in the high quadword, so every extent gets a distinct
/// keystream. Symmetric and size-preserving.
struct AesCtrCipher;

impl AesCtrCipher {
    fn apply(key: &[u8], nonce: u64, buf: &mut [u8]) -> Result<()> {
        if key.len() != 32 {
            return Err(CcvfsError::KeyMismatch(format!(
                "aes cipher needs a 32-byte key, got {}",
                key.len()
            )));
        }
        let cipher = Aes256::new(GenericArray::from_slice(key));
        let mut counter_block = [0u8; 16];
        LittleEndian::write_u64(&mut counter_block[..8], nonce);
        for (block_idx, chunk) in buf.chunks_mut(16).enumerate() {
            LittleEndian::write_u64(&mut counter_block[8..], block_idx as u64);
            let mut keystream = GenericArray::clone_from_slice(&counter_block);
            cipher.encrypt_block(&mut keystream);
            for (b, k) in chunk.iter_mut().zip(keystream.iter()) {
                *b ^= k;
            }
        }
        Ok(())
    }
}

impl Cipher for AesCtrCipher {
    fn name(&self) -> &str {
        "aes"
    }

    fn key_len(&self) -> usize {
        32
    }

    fn encrypt(&self, key: &[u8], nonce: u64, buf: &mut [u8]) -> Result<()> {
        AesCtrCipher::apply(key, nonce, buf)
    }

    fn decrypt(&self, key: &[u8], nonce: u64, buf: &mut [u8]) -> Result<()> {
        AesCtrCipher::apply(key, nonce, buf)
    }
}
