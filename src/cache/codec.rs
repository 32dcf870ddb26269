//! Value Codec
//!
//! Serializes values to JSON and compresses them with LZ4, falling back to
//! storing the bytes uncompressed when compression does not pay off.
//!
//! # Frame Layout
//!
//! ```text
//! ┌──────────┬──────────────────────────────────────────────┐
//! │ tag (1B) │ body                                         │
//! ├──────────┼──────────────────────────────────────────────┤
//! │ 0x00     │ raw JSON                                     │
//! │ 0x01     │ LZ4 block, little-endian i32 size prepended  │
//! └──────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use tiered_cache::cache::Codec;
//!
//! let codec = Codec::new();
//! let encoded = codec.encode(&vec![1u32, 2, 3]).unwrap();
//! let decoded: Vec<u32> = codec.decode(&encoded.bytes).unwrap();
//! assert_eq!(decoded, vec![1, 2, 3]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::finite::check_finite;
use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 - fast compression
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Frame tag byte
    pub fn tag(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
        }
    }

    /// Algorithm for a frame tag byte
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Minimum serialized size to compress (smaller values are stored raw)
    pub min_size_bytes: usize,
    /// LZ4 high-compression level
    pub level: i32,
    /// Upper bound on the size a compressed frame may claim
    pub max_decoded_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 256,
            level: 4,
            max_decoded_bytes: 256 * 1024 * 1024,
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Encoded value ready to be stored in a tier
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Framed payload
    pub bytes: Bytes,
    /// The value serialized to JSON `null` (a "no value" result)
    pub is_null: bool,
    /// Algorithm used for the body
    pub algorithm: CompressionAlgorithm,
}

/// Serialize-then-compress codec
#[derive(Debug, Clone, Default)]
pub struct Codec {
    config: CompressionConfig,
}

impl Codec {
    /// Create a codec with default config
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Serialize and compress a value
    ///
    /// Values holding NaN or an infinity are rejected: JSON would store them
    /// as `null` and they would not decode back.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Encoded> {
        check_finite(value).map_err(|e| Error::Codec(e.to_string()))?;
        let json = serde_json::to_vec(value)?;
        let is_null = json.as_slice() == b"null";

        let (body, algorithm) = self.compress(json);

        let mut frame = BytesMut::with_capacity(body.len() + 1);
        frame.put_u8(algorithm.tag());
        frame.put_slice(&body);

        Ok(Encoded {
            bytes: frame.freeze(),
            is_null,
            algorithm,
        })
    }

    /// Decompress and deserialize a framed payload
    pub fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T> {
        let (&tag, body) = frame
            .split_first()
            .ok_or_else(|| Error::Codec("empty frame".into()))?;
        let algorithm = CompressionAlgorithm::from_tag(tag)
            .ok_or_else(|| Error::Codec(format!("unknown compression tag {:#04x}", tag)))?;

        match algorithm {
            CompressionAlgorithm::None => Ok(serde_json::from_slice(body)?),
            CompressionAlgorithm::Lz4 => {
                let json = self.decompress_lz4(body)?;
                Ok(serde_json::from_slice(&json)?)
            }
        }
    }

    /// Compress serialized bytes when it is worth it
    fn compress(&self, json: Vec<u8>) -> (Vec<u8>, CompressionAlgorithm) {
        // Skip compression for small data
        if json.len() < self.config.min_size_bytes {
            return (json, CompressionAlgorithm::None);
        }

        match lz4::block::compress(
            &json,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.config.level)),
            true,
        ) {
            // Only use compressed if it's actually smaller
            Ok(compressed) if compressed.len() < json.len() => {
                (compressed, CompressionAlgorithm::Lz4)
            }
            Ok(_) => (json, CompressionAlgorithm::None),
            Err(e) => {
                let err = Error::CompressionFailed {
                    algorithm: CompressionAlgorithm::Lz4.name().into(),
                    reason: e.to_string(),
                };
                tracing::warn!("{}, storing uncompressed", err);
                (json, CompressionAlgorithm::None)
            }
        }
    }

    fn decompress_lz4(&self, body: &[u8]) -> Result<Vec<u8>> {
        let failed = |reason: String| Error::DecompressionFailed {
            algorithm: CompressionAlgorithm::Lz4.name().into(),
            reason,
        };

        // Validate the prepended size before the decoder allocates for it
        let header: [u8; 4] = body
            .get(..4)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| failed("truncated size header".into()))?;
        let claimed = i32::from_le_bytes(header);
        if claimed < 0 || claimed as usize > self.config.max_decoded_bytes {
            return Err(failed(format!("implausible decoded size {}", claimed)));
        }

        lz4::block::decompress(body, None).map_err(|e| failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    const TEST_TEXT: &str = "Hello, this is test data that should compress well. \
        It has some repetition: Hello, this is test data that should compress well. \
        Hello, this is test data that should compress well. Hello again and again.";

    #[test]
    fn test_small_value_stored_raw() {
        let codec = Codec::new();
        let encoded = codec.encode(&16i64).unwrap();

        assert_eq!(encoded.algorithm, CompressionAlgorithm::None);
        assert_eq!(encoded.bytes.as_ref(), b"\x0016");
        assert!(!encoded.is_null);
        assert_eq!(codec.decode::<i64>(&encoded.bytes).unwrap(), 16);
    }

    #[test]
    fn test_large_value_compressed() {
        let codec = Codec::new();
        let value: Vec<String> = (0..20).map(|_| TEST_TEXT.to_string()).collect();
        let encoded = codec.encode(&value).unwrap();

        assert_eq!(encoded.algorithm, CompressionAlgorithm::Lz4);
        assert_eq!(encoded.bytes[0], 1);
        assert!(encoded.bytes.len() < serde_json::to_vec(&value).unwrap().len());

        let decoded: Vec<String> = codec.decode(&encoded.bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_structured_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Profile {
            name: String,
            pitch: f64,
            tags: BTreeMap<String, Vec<u8>>,
        }

        let mut tags = BTreeMap::new();
        tags.insert("formants".to_string(), vec![1, 2, 3]);
        let profile = Profile {
            name: "baritone".into(),
            pitch: -2.5,
            tags,
        };

        let codec = Codec::new();
        let encoded = codec.encode(&profile).unwrap();
        assert_eq!(codec.decode::<Profile>(&encoded.bytes).unwrap(), profile);
    }

    #[test]
    fn test_null_detection() {
        let codec = Codec::new();
        assert!(codec.encode(&Option::<u8>::None).unwrap().is_null);
        assert!(codec.encode(&()).unwrap().is_null);
        assert!(!codec.encode(&Some(0u8)).unwrap().is_null);
        assert!(!codec.encode("null").unwrap().is_null);
    }

    #[test]
    fn test_incompressible_data_falls_back() {
        let codec = Codec::with_config(CompressionConfig {
            min_size_bytes: 0,
            ..Default::default()
        });
        let encoded = codec.encode(&1u8).unwrap();
        assert_eq!(encoded.algorithm, CompressionAlgorithm::None);
    }

    #[test]
    fn test_corrupt_frames() {
        let codec = Codec::new();

        assert_matches!(codec.decode::<u8>(&[]), Err(Error::Codec(_)));
        assert_matches!(codec.decode::<u8>(&[9, b'1']), Err(Error::Codec(_)));
        assert_matches!(codec.decode::<u8>(b"\x00{not json"), Err(Error::Serialization(_)));
        assert_matches!(
            codec.decode::<u8>(&[1, 0, 0]),
            Err(Error::DecompressionFailed { .. })
        );
        // Claims a 2GiB body
        assert_matches!(
            codec.decode::<u8>(&[1, 0xff, 0xff, 0xff, 0x7f, 0, 0]),
            Err(Error::DecompressionFailed { .. })
        );
    }

    #[test]
    fn test_truncated_lz4_body() {
        let codec = Codec::new();
        let value: Vec<String> = (0..20).map(|_| TEST_TEXT.to_string()).collect();
        let encoded = codec.encode(&value).unwrap();

        let truncated = &encoded.bytes[..encoded.bytes.len() / 2];
        assert!(codec.decode::<Vec<String>>(truncated).is_err());
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let codec = Codec::new();
        let encoded = codec.encode("text").unwrap();
        assert_matches!(codec.decode::<u64>(&encoded.bytes), Err(Error::Serialization(_)));
    }

    #[test]
    fn test_non_finite_floats_rejected() {
        let codec = Codec::new();

        assert_matches!(codec.encode(&Some(f64::INFINITY)), Err(Error::Codec(_)));
        assert_matches!(codec.encode(&vec![1.0f32, f32::NAN]), Err(Error::Codec(_)));

        #[derive(Serialize)]
        struct Gain {
            db: f64,
        }
        assert_matches!(codec.encode(&Gain { db: f64::NEG_INFINITY }), Err(Error::Codec(_)));

        let encoded = codec.encode(&Some(1.5f64)).unwrap();
        assert!(!encoded.is_null);
        assert_eq!(codec.decode::<Option<f64>>(&encoded.bytes).unwrap(), Some(1.5));
    }

    #[test]
    fn test_algorithm_tags() {
        for algorithm in [CompressionAlgorithm::None, CompressionAlgorithm::Lz4] {
            assert_eq!(CompressionAlgorithm::from_tag(algorithm.tag()), Some(algorithm));
        }
        assert_eq!(CompressionAlgorithm::from_tag(7), None);
        assert_eq!(CompressionAlgorithm::Lz4.to_string(), "lz4");
    }
}
