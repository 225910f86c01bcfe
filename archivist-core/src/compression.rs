/*!
Compression adapters for archive payloads.

Each archive records the algorithm it was written with, so restore always
selects the matching decompressor from metadata rather than sniffing content.
*/

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use flate2::{
    read::{DeflateDecoder, GzDecoder},
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use serde::{Deserialize, Serialize};

use crate::{ArchivistError, Result};

/// Default compression level (flate2's default)
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Highest accepted compression level
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_WINDOW_BITS: u32 = 22;

/// Compression abstraction for archive payloads
///
/// Implementations must form an exact round trip:
/// `decompress(compress(x)) == x` for every byte sequence, including the empty one.
pub trait CompressionAdapter: Send + Sync {
    /// Compress the input data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress the input data
    ///
    /// A malformed stream yields `ArchivistError::Decompression`.
    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>>;

    /// The algorithm this adapter implements
    fn algorithm(&self) -> CompressionAlgorithm;
}

/// Closed set of supported archive compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    Gzip,
    Deflate,
    Brotli,
}

impl CompressionAlgorithm {
    /// Name as recorded in metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Brotli => "brotli",
        }
    }

    /// Build the adapter for this algorithm at the given level (0-9)
    pub fn compressor(&self, level: u32) -> Box<dyn CompressionAdapter> {
        match self {
            Self::Gzip => Box::new(GzipCompressor::with_level(level)),
            Self::Deflate => Box::new(DeflateCompressor::with_level(level)),
            Self::Brotli => Box::new(BrotliCompressor::with_level(level)),
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = ArchivistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" => Ok(Self::Gzip),
            "deflate" => Ok(Self::Deflate),
            "brotli" => Ok(Self::Brotli),
            other => Err(ArchivistError::config(format!(
                "Unknown compression algorithm: {other} (expected gzip, deflate or brotli)"
            ))),
        }
    }
}

/// Gzip compression adapter
///
/// # Example
/// ```rust
/// use archivist_core::compression::{CompressionAdapter, GzipCompressor};
///
/// let compressor = GzipCompressor::new();
/// let data = b"some collection data to compress";
/// let compressed = compressor.compress(data)?;
/// let decompressed = compressor.decompress(&compressed)?;
/// assert_eq!(data, &decompressed[..]);
/// # Ok::<(), archivist_core::ArchivistError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
}

impl GzipCompressor {
    /// Create a new gzip compressor with default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// Create a new gzip compressor with the specified compression level (0-9)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level.min(MAX_COMPRESSION_LEVEL)),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression_level);

        encoder.write_all(data).map_err(|e| {
            ArchivistError::compression(format!("Failed to write data for gzip compression: {e}"))
        })?;

        encoder
            .finish()
            .map_err(|e| ArchivistError::compression(format!("Failed to finish gzip stream: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(compressed_data);
        let mut decompressed = Vec::new();

        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| ArchivistError::decompression(format!("Invalid gzip stream: {e}")))?;

        Ok(decompressed)
    }

    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Gzip
    }
}

/// Raw DEFLATE compression adapter (no gzip header/trailer)
#[derive(Debug, Clone)]
pub struct DeflateCompressor {
    compression_level: Compression,
}

impl DeflateCompressor {
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level.min(MAX_COMPRESSION_LEVEL)),
        }
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for DeflateCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), self.compression_level);

        encoder.write_all(data).map_err(|e| {
            ArchivistError::compression(format!(
                "Failed to write data for deflate compression: {e}"
            ))
        })?;

        encoder.finish().map_err(|e| {
            ArchivistError::compression(format!("Failed to finish deflate stream: {e}"))
        })
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(compressed_data);
        let mut decompressed = Vec::new();

        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| ArchivistError::decompression(format!("Invalid deflate stream: {e}")))?;

        Ok(decompressed)
    }

    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Deflate
    }
}

/// Brotli compression adapter
///
/// The 0-9 level scale is used directly as brotli quality (brotli accepts 0-11).
#[derive(Debug, Clone)]
pub struct BrotliCompressor {
    quality: u32,
}

impl BrotliCompressor {
    pub fn new() -> Self {
        Self::with_level(DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn with_level(level: u32) -> Self {
        Self {
            quality: level.min(MAX_COMPRESSION_LEVEL),
        }
    }
}

impl Default for BrotliCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for BrotliCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = brotli::CompressorWriter::new(
            Vec::new(),
            BROTLI_BUFFER_SIZE,
            self.quality,
            BROTLI_WINDOW_BITS,
        );

        encoder.write_all(data).map_err(|e| {
            ArchivistError::compression(format!("Failed to write data for brotli compression: {e}"))
        })?;

        // into_inner finishes the stream
        Ok(encoder.into_inner())
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = brotli::Decompressor::new(compressed_data, BROTLI_BUFFER_SIZE);
        let mut decompressed = Vec::new();

        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| ArchivistError::decompression(format!("Invalid brotli stream: {e}")))?;

        Ok(decompressed)
    }

    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Brotli
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CompressionAlgorithm; 3] = [
        CompressionAlgorithm::Gzip,
        CompressionAlgorithm::Deflate,
        CompressionAlgorithm::Brotli,
    ];

    #[test]
    fn test_roundtrip_every_algorithm() {
        let original = b"{\"users\":[{\"_id\":1,\"name\":\"ada\"}]} ".repeat(50);

        for algorithm in ALL {
            let compressor = algorithm.compressor(DEFAULT_COMPRESSION_LEVEL);
            let compressed = compressor.compress(&original).unwrap();

            assert!(
                compressed.len() < original.len(),
                "{algorithm} should shrink repetitive input"
            );
            assert_eq!(compressor.decompress(&compressed).unwrap(), original);
            assert_eq!(compressor.algorithm(), algorithm);
        }
    }

    #[test]
    fn test_empty_input_roundtrip() {
        for algorithm in ALL {
            let compressor = algorithm.compressor(DEFAULT_COMPRESSION_LEVEL);
            let compressed = compressor.compress(b"").unwrap();
            assert!(
                compressor.decompress(&compressed).unwrap().is_empty(),
                "{algorithm} empty roundtrip"
            );
        }
    }

    #[test]
    fn test_levels_roundtrip() {
        let data = b"Some test data to compress with different levels".repeat(20);

        for algorithm in ALL {
            for level in [0, 1, 9] {
                let compressor = algorithm.compressor(level);
                let compressed = compressor.compress(&data).unwrap();
                assert_eq!(compressor.decompress(&compressed).unwrap(), data);
            }
        }
    }

    #[test]
    fn test_invalid_stream_is_decompression_error() {
        let garbage = b"this is definitely not a compressed stream \xff\xfe\x00\x01";

        let result = GzipCompressor::new().decompress(garbage);
        assert!(matches!(result, Err(ArchivistError::Decompression(_))));
    }

    #[test]
    fn test_truncated_gzip_stream_fails() {
        let compressor = GzipCompressor::new();
        let compressed = compressor.compress(&b"truncate me".repeat(100)).unwrap();
        let truncated = &compressed[..compressed.len() / 2];

        assert!(matches!(
            compressor.decompress(truncated),
            Err(ArchivistError::Decompression(_))
        ));
    }

    #[test]
    fn test_algorithm_names_and_parsing() {
        for algorithm in ALL {
            assert_eq!(algorithm.as_str().parse::<CompressionAlgorithm>().unwrap(), algorithm);
        }
        assert_eq!(" GZIP ".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Gzip);
        assert!(matches!(
            "zstd".parse::<CompressionAlgorithm>(),
            Err(ArchivistError::Config(_))
        ));
    }

    #[test]
    fn test_algorithm_serde_representation() {
        let json = serde_json::to_string(&CompressionAlgorithm::Brotli).unwrap();
        assert_eq!(json, "\"brotli\"");
        let parsed: CompressionAlgorithm = serde_json::from_str("\"deflate\"").unwrap();
        assert_eq!(parsed, CompressionAlgorithm::Deflate);
    }
}
