//! Per-page encode/decode pipeline.
//!
//! Write path: checksum the plaintext, compress (falling back to plaintext
//! when compression does not win), then encrypt in place. Read path runs
//! the inverse order and re-verifies the checksum. All-zero pages short-
//! circuit to an empty SPARSE payload in both directions.

use std::sync::Arc;

use crate::store::constants::*;
use crate::store::checksum::crc32;
use crate::store::registry::{Cipher, Compressor};
use crate::{CcvfsError, Result};

/// The resolved algorithm pair (plus key) a container was opened with.
///
/// Resolved from the registry once at open; cloning shares the `Arc`s.
#[derive(Clone)]
pub struct Codec {
    /// Compression algorithm, if configured.
    pub compressor: Option<Arc<dyn Compressor>>,
    /// Cipher, if configured.
    pub cipher: Option<Arc<dyn Cipher>>,
    /// Encryption key; required when `cipher` is set.
    pub key: Option<Vec<u8>>,
    /// Compression level recorded into page flags.
    pub level: u8,
}

/// Output of the write-path pipeline for one page.
pub struct EncodedPage {
    /// Payload bytes to store after the extent header. Empty for SPARSE.
    pub payload: Vec<u8>,
    /// COMPRESSED / ENCRYPTED / SPARSE bits plus the level field.
    pub flags: u32,
    /// CRC32 of the plaintext page.
    pub checksum: u32,
}

/// Output of the read-path pipeline for one page.
pub struct DecodedPage {
    /// Recovered plaintext page.
    pub bytes: Vec<u8>,
    /// Whether the recovered bytes match the stored checksum.
    pub checksum_ok: bool,
    /// CRC32 computed over the recovered bytes.
    pub computed: u32,
}

impl Codec {
    /// Codec for an unencrypted, uncompressed container.
    pub fn passthrough() -> Self {
        Codec {
            compressor: None,
            cipher: None,
            key: None,
            level: 0,
        }
    }

    /// Run the write pipeline over one plaintext page.
    pub fn encode(&self, page: &[u8], nonce: u64) -> Result<EncodedPage> {
        let checksum = crc32(page);

        if page.iter().all(|&b| b == 0) {
            return Ok(EncodedPage {
                payload: Vec::new(),
                flags: FLAG_SPARSE,
                checksum,
            });
        }

        let mut flags = 0u32;
        let mut payload;
        match &self.compressor {
            Some(compressor) => {
                let mut packed = Vec::with_capacity(compressor.max_compressed_size(page.len()));
                compressor.compress(page, &mut packed, self.level)?;
                if packed.len() >= page.len() {
                    // Compression did not win; store plaintext.
                    payload = page.to_vec();
                } else {
                    flags |= FLAG_COMPRESSED | ((self.level as u32) << FLAG_LEVEL_SHIFT);
                    payload = packed;
                }
            }
            None => payload = page.to_vec(),
        }

        if let Some(cipher) = &self.cipher {
            let key = self.key.as_deref().ok_or_else(|| {
                CcvfsError::KeyRequired("cipher configured without a key".to_string())
            })?;
            cipher.encrypt(key, nonce, &mut payload)?;
            flags |= FLAG_ENCRYPTED;
        }

        Ok(EncodedPage {
            payload,
            flags,
            checksum,
        })
    }

    /// Run the read pipeline over one stored payload.
    ///
    /// A checksum mismatch is reported in the result rather than as an
    /// error so callers can honor strict and recovery modes; structural
    /// failures (missing key, undecodable payload) are errors.
    pub fn decode(
        &self,
        payload: &[u8],
        flags: u32,
        original_size: usize,
        stored_checksum: u32,
        nonce: u64,
        page_no: u32,
    ) -> Result<DecodedPage> {
        if flags & FLAG_SPARSE != 0 {
            let bytes = vec![0u8; original_size];
            let computed = crc32(&bytes);
            return Ok(DecodedPage {
                checksum_ok: computed == stored_checksum,
                computed,
                bytes,
            });
        }

        let mut work = payload.to_vec();

        if flags & FLAG_ENCRYPTED != 0 {
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                CcvfsError::KeyRequired(format!(
                    "page {} is encrypted but the container was opened without a cipher",
                    page_no
                ))
            })?;
            let key = self.key.as_deref().ok_or_else(|| {
                CcvfsError::KeyRequired(format!(
                    "page {} is encrypted and no key is configured",
                    page_no
                ))
            })?;
            cipher.decrypt(key, nonce, &mut work)?;
        }

        let bytes = if flags & FLAG_COMPRESSED != 0 {
            let compressor = self.compressor.as_ref().ok_or_else(|| {
                CcvfsError::Unsupported(format!(
                    "page {} is compressed but the container was opened without a compressor",
                    page_no
                ))
            })?;
            let mut unpacked = Vec::with_capacity(original_size);
            compressor
                .decompress(&work, &mut unpacked, original_size)
                .map_err(|e| CcvfsError::CorruptPage {
                    page: page_no,
                    detail: format!("payload does not decompress: {}", e),
                })?;
            unpacked
        } else {
            work
        };

        if bytes.len() != original_size {
            return Err(CcvfsError::CorruptPage {
                page: page_no,
                detail: format!("decoded {} bytes, expected {}", bytes.len(), original_size),
            });
        }

        let computed = crc32(&bytes);
        Ok(DecodedPage {
            checksum_ok: computed == stored_checksum,
            computed,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::registry::{find_cipher, find_compressor};

    fn rle_xor_codec() -> Codec {
        Codec {
            compressor: find_compressor("rle"),
            cipher: find_cipher("xor"),
            key: Some(b"key01234".to_vec()),
            level: 3,
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = rle_xor_codec();
        let mut page = vec![0u8; 4096];
        page[..5].copy_from_slice(b"hello");

        let encoded = codec.encode(&page, 7).unwrap();
        assert!(encoded.flags & FLAG_COMPRESSED != 0);
        assert!(encoded.flags & FLAG_ENCRYPTED != 0);
        assert_eq!(encoded.checksum, crc32(&page));

        let decoded = codec
            .decode(&encoded.payload, encoded.flags, 4096, encoded.checksum, 7, 0)
            .unwrap();
        assert!(decoded.checksum_ok);
        assert_eq!(decoded.bytes, page);
    }

    #[test]
    fn test_sparse_page_has_empty_payload() {
        let codec = rle_xor_codec();
        let page = vec![0u8; 4096];
        let encoded = codec.encode(&page, 1).unwrap();
        assert_eq!(encoded.flags, FLAG_SPARSE);
        assert!(encoded.payload.is_empty());

        let decoded = codec
            .decode(&encoded.payload, encoded.flags, 4096, encoded.checksum, 1, 0)
            .unwrap();
        assert!(decoded.checksum_ok);
        assert_eq!(decoded.bytes, vec![0u8; 4096]);
    }

    #[test]
    fn test_incompressible_page_stays_plaintext() {
        let codec = Codec {
            compressor: find_compressor("rle"),
            cipher: None,
            key: None,
            level: 0,
        };
        // High-entropy page RLE cannot shrink.
        let mut state: u64 = 0xDEADBEEF_CAFEBABE;
        let page: Vec<u8> = (0..4096)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect();

        let encoded = codec.encode(&page, 0).unwrap();
        assert_eq!(encoded.flags & FLAG_COMPRESSED, 0);
        assert_eq!(encoded.payload, page);
    }

    #[test]
    fn test_level_recorded_in_flags() {
        let codec = rle_xor_codec();
        let encoded = codec.encode(&vec![0x41u8; 4096], 0).unwrap();
        assert_eq!((encoded.flags & FLAG_LEVEL_MASK) >> FLAG_LEVEL_SHIFT, 3);
    }

    #[test]
    fn test_decode_without_key_is_key_required() {
        let codec = rle_xor_codec();
        let encoded = codec.encode(&vec![0x41u8; 4096], 0).unwrap();

        let keyless = Codec {
            key: None,
            ..codec.clone()
        };
        assert!(matches!(
            keyless.decode(&encoded.payload, encoded.flags, 4096, encoded.checksum, 0, 0),
            Err(CcvfsError::KeyRequired(_))
        ));
    }

    #[test]
    fn test_decode_flags_checksum_mismatch() {
        let codec = Codec {
            compressor: None,
            cipher: None,
            key: None,
            level: 0,
        };
        let page = b"some plain page bytes".to_vec();
        let encoded = codec.encode(&page, 0).unwrap();
        let decoded = codec
            .decode(&encoded.payload, encoded.flags, page.len(), !encoded.checksum, 0, 0)
            .unwrap();
        assert!(!decoded.checksum_ok);
        assert_eq!(decoded.bytes, page);
    }

    #[test]
    fn test_decode_wrong_key_fails_checksum() {
        let codec = rle_xor_codec();
        let page = vec![0x41u8; 4096];
        let encoded = codec.encode(&page, 9).unwrap();

        let wrong = Codec {
            key: Some(b"other-key".to_vec()),
            ..codec
        };
        // Wrong key garbles the compressed stream: either it refuses to
        // decompress or the checksum fails. Both must surface.
        match wrong.decode(&encoded.payload, encoded.flags, 4096, encoded.checksum, 9, 0) {
            Ok(decoded) => assert!(!decoded.checksum_ok),
            Err(CcvfsError::CorruptPage { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
}
