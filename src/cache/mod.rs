//! Multi-Tier Cache
//!
//! Cache-aside memoization over three tiers of decreasing speed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                     CacheManager::get_or_compute                         │
//! │        derive_key(operation, args) ──▶ probe ──▶ compute on miss         │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  Memory Tier          │ Remote Tier            │ Disk Tier               │
//! │  ┌────────────────┐   │ ┌──────────────────┐   │ ┌───────────────────┐   │
//! │  │ DashMap        │   │ │ Redis            │   │ │ one JSON record   │   │
//! │  │ process-local  │   │ │ native expiry    │   │ │ per key, renamed  │   │
//! │  │                │   │ │ may be absent    │   │ │ into place        │   │
//! │  └────────────────┘   │ └──────────────────┘   │ └───────────────────┘   │
//! │         ▲             │          ▲             │           │             │
//! │         └─────────────┴──────────┴─ backfill ──┴───────────┘             │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │          Codec: serde_json ──▶ LZ4 (tagged frame) ──▶ CacheEntry         │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Failure Model
//!
//! - Remote unreachable at construction: tier disabled for the process lifetime
//! - Tier read/write failures: absorbed as miss / skipped write, logged, counted
//! - Undecodable entries: treated as a miss and deleted from their tier
//! - Only key derivation errors and the computation's own error reach callers

mod clock;
mod codec;
mod disk;
mod entry;
mod finite;
mod flight;
mod health;
mod key;
mod manager;
mod memory;
mod metrics;
mod proptest;
mod remote;
mod sweeper;
mod tier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, CompressionAlgorithm, CompressionConfig, Encoded};
pub use disk::{DiskConfig, DiskTier, STALE_TEMP_AGE};
pub use entry::{CacheEntry, NEVER_EXPIRES};
pub use flight::{Flight, FlightFollower, FlightLeader, FlightOutcome, FlightRegistry};
pub use health::{HealthReport, HealthStatus, TierHealth};
pub use key::{derive_key, CacheKey, CallArgs, KEY_LEN};
pub use manager::{create_cache, CacheConfig, CacheManager, CacheOptions, PurgeStats};
pub use memory::MemoryTier;
pub use metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot, TierSnapshot};
pub use remote::{InMemoryRemoteStore, RedisStore, RemoteConfig, RemoteStore, RemoteTier};
pub use sweeper::Sweeper;
pub use tier::{Tier, TierKind, TierPolicy};

use std::time::Duration;

/// Entry lifetime when a call does not set one
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default interval between background sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
