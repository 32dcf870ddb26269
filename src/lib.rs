//! Tiered Cache - multi-layer cache-aside engine
//!
//! Memoizes the results of expensive operations across three tiers:
//! in-process memory, a shared Redis instance and local disk. Values are
//! serialized to JSON and LZ4-compressed; keys are SHA-256 digests of the
//! operation name and its arguments.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ CacheManager ──▶ Memory ──▶ Remote (Redis) ──▶ Disk ──▶ compute
//!                 │                                                   │
//!                 └────────────── write through selected tiers ◀──────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tiered_cache::cache::{create_cache, CacheOptions, CallArgs};
//!
//! # async fn run() -> tiered_cache::Result<()> {
//! let cache = create_cache("localhost", 6379, 0, "/tmp/tiered-cache").await?;
//!
//! let area: u64 = cache
//!     .get_or_compute("area", &CallArgs::new().arg(&12), CacheOptions::new(), || async {
//!         Ok::<_, tiered_cache::Error>(12 * 12)
//!     })
//!     .await?;
//! assert_eq!(area, 144);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, codec, key derivation and the manager
//! - [`error`] - Error types
//! - [`telemetry`] - Logging setup and Prometheus exposition

pub mod cache;
pub mod error;
pub mod telemetry;

// Re-export commonly used types
pub use cache::{create_cache, CacheConfig, CacheManager, CacheOptions, CallArgs, TierPolicy};
pub use error::{Error, Result};
