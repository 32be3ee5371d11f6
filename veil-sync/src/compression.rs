//! LZ4 compression of change payloads.
//!
//! Payloads are compressed before they leave the device, whether inline in
//! a batch item or as a standalone blob. The block format carries its
//! uncompressed size, so `decompress(compress(x)) == x` exactly.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("decompression failed: {0}")]
pub struct CompressionError(String);

pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    lz4_flex::decompress_size_prepended(data).map_err(|e| CompressionError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog, twice: the quick brown fox";
        let compressed = compress(data);
        assert_eq!(decompress(&compressed).unwrap(), data.to_vec());
    }

    #[test]
    fn test_repetitive_payload_shrinks() {
        let data = vec![7u8; 64 * 1024];
        assert!(compress(&data).len() < data.len() / 10);
    }

    #[test]
    fn test_empty_payload() {
        assert!(decompress(&compress(&[])).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_rejected() {
        let err = decompress(&[0x10, 0, 0, 0, 0xFF, 0xFF]).unwrap_err();
        assert!(err.to_string().starts_with("decompression failed"));
        assert!(decompress(&[1, 2]).is_err());
    }
}
