//! Error types for the tiered cache

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tiered cache
///
/// Only [`Error::KeyDerivation`] ever reaches callers of
/// `CacheManager::get_or_compute`; every tier and codec failure is absorbed
/// by the manager and turned into a miss or a skipped write.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Redis client error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Key Errors
    // =========================================================================
    /// Call arguments could not be serialized into a key
    #[error("Key derivation failed for operation '{operation}': {reason}")]
    KeyDerivation { operation: String, reason: String },

    /// Externally supplied key is not a derived key
    #[error("Invalid cache key '{0}': expected 64 lowercase hex characters")]
    InvalidKey(String),

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Payload frame is malformed
    #[error("Codec error: {0}")]
    Codec(String),

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Tier Errors
    // =========================================================================
    /// Tier could not be reached at construction
    #[error("{tier} tier unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    /// A single tier operation failed
    #[error("{tier} tier {operation} failed: {reason}")]
    TierOperation {
        tier: String,
        operation: String,
        reason: String,
    },

    /// A tier operation exceeded its deadline
    #[error("{tier} tier {operation} timed out after {after:?}")]
    Timeout {
        tier: String,
        operation: String,
        after: Duration,
    },
}

impl Error {
    /// Whether the error is a cache-internal failure that callers never see
    pub fn is_absorbed(&self) -> bool {
        !matches!(self, Error::KeyDerivation { .. })
    }
}
