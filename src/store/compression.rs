//! Block compression for file-backed stores

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Compression applied to stored block payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Zstd,
}

impl CompressionAlgorithm {
    /// One-byte tag written into block headers
    pub(crate) fn tag(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Zstd => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionAlgorithm::None),
            1 => Ok(CompressionAlgorithm::Zstd),
            other => Err(Error::Store(format!("Unknown compression tag {}", other))),
        }
    }
}

/// zstd level used for newly written blocks
const ZSTD_LEVEL: i32 = 3;

pub(crate) fn compress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Zstd => zstd::encode_all(data, ZSTD_LEVEL)
            .map_err(|e| Error::Store(format!("Failed to compress block: {}", e))),
    }
}

pub(crate) fn decompress(payload: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(payload.to_vec()),
        CompressionAlgorithm::Zstd => zstd::decode_all(payload)
            .map_err(|e| Error::Store(format!("Corrupt zstd block: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_zstd_payload() {
        let garbage = b"not a zstd frame";
        assert!(decompress(garbage, CompressionAlgorithm::Zstd).is_err());
        assert_eq!(
            decompress(garbage, CompressionAlgorithm::None).ok().as_deref(),
            Some(&garbage[..])
        );
    }

    #[test]
    fn test_compression_zstd() -> Result<()> {
        // Flat terrain compresses well
        let data = 125.5f64.to_le_bytes().repeat(512);
        let compressed = compress(&data, CompressionAlgorithm::Zstd)?;
        assert!(compressed.len() < data.len());

        let decompressed = decompress(&compressed, CompressionAlgorithm::Zstd)?;
        assert_eq!(decompressed, data);
        Ok(())
    }

    #[test]
    fn test_compression_tags() -> Result<()> {
        for algorithm in [CompressionAlgorithm::None, CompressionAlgorithm::Zstd] {
            assert_eq!(CompressionAlgorithm::from_tag(algorithm.tag())?, algorithm);
        }
        assert!(CompressionAlgorithm::from_tag(9).is_err());
        Ok(())
    }
}
