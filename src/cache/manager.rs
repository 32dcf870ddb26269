//! Cache Manager - cache-aside over three tiers
//!
//! Probes memory → remote → disk, returns the first hit and otherwise runs
//! the caller's computation and writes its result through every selected
//! tier. Tier failures never reach the caller: a failing read is a miss and
//! a failing write is skipped, both logged and counted.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::codec::{Codec, CompressionConfig};
use super::disk::{DiskConfig, DiskTier};
use super::entry::CacheEntry;
use super::flight::{Flight, FlightLeader, FlightOutcome, FlightRegistry};
use super::health::{HealthReport, TierHealth};
use super::key::{derive_key, CacheKey, CallArgs};
use super::memory::MemoryTier;
use super::metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
use super::remote::{RemoteConfig, RemoteStore, RemoteTier};
use super::tier::{Tier, TierKind, TierPolicy};
use super::DEFAULT_TTL;
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Remote tier
    pub remote: RemoteConfig,
    /// Disk tier
    pub disk: DiskConfig,
    /// Value compression
    pub compression: CompressionConfig,
    /// TTL used when a call does not set one
    pub default_ttl_secs: u64,
    /// Copy hits from slower tiers into the faster ones
    pub backfill: bool,
    /// Let one caller compute a missing key while the others wait
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            disk: DiskConfig::default(),
            compression: CompressionConfig::default(),
            default_ttl_secs: DEFAULT_TTL.as_secs(),
            backfill: true,
            single_flight: true,
        }
    }
}

impl CacheConfig {
    /// Parse a YAML document; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(format!("invalid cache config: {}", e)))
    }

    /// Load from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&raw)
    }

    /// Default TTL as a duration
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Per-call caching options
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// Entry lifetime; `None` uses the configured default
    pub ttl: Option<Duration>,
    /// Tiers to read and write
    pub tiers: TierPolicy,
    /// Also cache results that serialize to `null`
    pub cache_none: bool,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry lifetime
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Select the tiers
    pub fn tiers(mut self, tiers: TierPolicy) -> Self {
        self.tiers = tiers;
        self
    }

    /// Cache `null` results too
    pub fn cache_none(mut self, cache_none: bool) -> Self {
        self.cache_none = cache_none;
        self
    }
}

/// Entries removed by one purge pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeStats {
    pub memory: usize,
    pub disk: usize,
}

// =============================================================================
// Cache Manager
// =============================================================================

/// Multi-tier cache manager
pub struct CacheManager {
    memory: MemoryTier,
    remote: RemoteTier,
    disk: DiskTier,
    /// Remote tier was asked for, so its absence degrades health
    remote_expected: bool,
    codec: Codec,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    metrics: Arc<CacheMetrics>,
    flights: FlightRegistry,
}

impl CacheManager {
    /// Connect using the system clock and a Redis remote tier
    ///
    /// An unreachable remote service is not an error: the manager starts in
    /// degraded mode with memory and disk only.
    pub async fn connect(config: CacheConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let remote = RemoteTier::establish(&config.remote, clock.clone()).await;
        let remote_expected = config.remote.enabled;
        Self::assemble(config, remote, remote_expected, clock).await
    }

    /// Build from an explicit remote store and clock
    ///
    /// `None` runs without a remote tier.
    pub async fn from_parts(
        config: CacheConfig,
        remote_store: Option<Arc<dyn RemoteStore>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let remote_expected = remote_store.is_some();
        let remote = match remote_store {
            Some(store) => RemoteTier::with_store(store, &config.remote, clock.clone()).await,
            None => RemoteTier::unavailable("no remote store configured", &config.remote, clock.clone()),
        };
        Self::assemble(config, remote, remote_expected, clock).await
    }

    async fn assemble(
        config: CacheConfig,
        remote: RemoteTier,
        remote_expected: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let disk = DiskTier::open(&config.disk, clock.clone()).await?;

        info!(
            remote = remote.is_available(),
            disk = %config.disk.dir.display(),
            "Cache manager ready"
        );

        Ok(Self {
            memory: MemoryTier::new(clock.clone()),
            remote,
            disk,
            remote_expected,
            codec: Codec::with_config(config.compression.clone()),
            clock,
            config,
            metrics: Arc::new(CacheMetrics::new()),
            flights: FlightRegistry::new(),
        })
    }

    fn tier(&self, kind: TierKind) -> &dyn Tier {
        match kind {
            TierKind::Memory => &self.memory,
            TierKind::Remote => &self.remote,
            TierKind::Disk => &self.disk,
        }
    }

    /// Selected tiers that are currently serving, fastest first
    fn serving(&self, policy: TierPolicy) -> impl Iterator<Item = TierKind> + '_ {
        TierKind::ALL
            .into_iter()
            .filter(move |kind| policy.includes(*kind) && self.tier(*kind).is_available())
    }

    /// Log and count a tier failure that the caller will never see
    fn absorb(&self, kind: TierKind, operation: &str, err: &Error) {
        self.metrics.record_error(kind);
        if kind == TierKind::Remote {
            error!("Remote cache {} failed: {}", operation, err);
        } else {
            warn!("{} cache {} failed: {}", kind, operation, err);
        }
    }

    /// Derive the key for a call
    pub fn derive_key(&self, operation: &str, args: &CallArgs) -> Result<CacheKey> {
        derive_key(operation, args)
    }

    /// Return the cached result of `operation(args)`, computing it on a miss
    ///
    /// Only key derivation failures and the computation's own error reach
    /// the caller.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        operation: &str,
        args: &CallArgs,
        options: CacheOptions,
        compute: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let key = derive_key(operation, args)?;

        self.metrics.record_lookup();
        if let Some(value) = self.probe(&key, options.tiers).await {
            return Ok(value);
        }

        let mut leader: Option<FlightLeader<'_>> = None;
        if self.config.single_flight {
            match self.flights.join(&key) {
                Flight::Leader(lead) => leader = Some(lead),
                Flight::Follower(follower) => {
                    self.metrics.record_flight_wait();
                    match follower.wait().await {
                        FlightOutcome::Shared(frame) => match self.codec.decode::<T>(&frame) {
                            Ok(value) => return Ok(value),
                            Err(e) => warn!("Shared result of {} did not decode: {}", operation, e),
                        },
                        FlightOutcome::Abandoned => {
                            debug!(operation, key = %key, "In-flight computation abandoned")
                        }
                    }
                }
            }
        }

        debug!(operation, key = %key, "Cache miss, computing");
        self.metrics.record_computation();
        let value = compute().await?;

        let encoded = match self.codec.encode(&value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Result of {} could not be cached: {}", operation, e);
                self.metrics.record_uncacheable();
                return Ok(value);
            }
        };
        if let Some(lead) = leader.as_mut() {
            lead.land(encoded.bytes.clone());
        }

        let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());
        if ttl.is_zero() || (encoded.is_null && !options.cache_none) {
            debug!(operation, "Result not cached");
        } else {
            let entry = CacheEntry::with_ttl(encoded.bytes, self.clock.now_millis(), ttl);
            self.write_through(&key, entry, options.tiers).await;
        }

        Ok(value)
    }

    /// Look a key up in the selected tiers
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey, tiers: TierPolicy) -> Option<T> {
        self.metrics.record_lookup();
        self.probe(key, tiers).await
    }

    /// Store a value in every selected tier
    ///
    /// Fails only if the value cannot be encoded; tier failures are absorbed.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
        tiers: TierPolicy,
    ) -> Result<()> {
        if let Some(entry) = self.encode(value, ttl)? {
            self.write_through(key, entry, tiers).await;
        }
        Ok(())
    }

    /// Delete one key, or clear everything, in the selected tiers
    pub async fn invalidate(&self, key: Option<&CacheKey>, tiers: TierPolicy) {
        let results = join_all(self.serving(tiers).map(|kind| async move {
            let tier = self.tier(kind);
            let result = match key {
                Some(key) => tier.delete(key).await.map(|_| ()),
                None => tier.clear().await,
            };
            (kind, result)
        }))
        .await;

        for (kind, result) in results {
            match result {
                Ok(()) => debug!(tier = %kind, key = ?key.map(CacheKey::as_str), "Invalidated"),
                Err(e) => self.absorb(kind, "invalidate", &e),
            }
        }

        match key {
            Some(key) => info!("Invalidated {} in {} cache", key, tiers),
            None => info!("Cleared {} cache", tiers),
        }
    }

    /// Drop expired memory entries and disk records
    pub async fn purge_expired(&self) -> Result<PurgeStats> {
        let memory = self.memory.purge_expired();
        let disk = self.disk.purge_expired().await?;
        Ok(PurgeStats { memory, disk })
    }

    /// Per-tier availability
    ///
    /// A missing or read-only disk directory makes the cache unhealthy.
    pub fn health(&self) -> HealthReport {
        let remote = if self.remote.is_available() {
            TierHealth::available(TierKind::Remote)
        } else {
            let reason = self
                .remote
                .unavailable_reason()
                .unwrap_or_else(|| "unavailable".to_string());
            if self.remote_expected {
                TierHealth::down(TierKind::Remote, reason)
            } else {
                TierHealth::disabled(TierKind::Remote, reason)
            }
        };

        let disk = match self.disk.check() {
            Ok(()) => TierHealth::available(TierKind::Disk),
            Err(reason) => TierHealth::failed(TierKind::Disk, reason),
        };

        HealthReport::new(vec![TierHealth::available(TierKind::Memory), remote, disk])
    }

    /// Get metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Close the remote connection; disk records are kept
    pub fn shutdown(&self) {
        self.remote.close();
        info!("Cache manager shut down");
    }

    /// Get configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get reference to the memory tier
    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    /// Get reference to the remote tier
    pub fn remote(&self) -> &RemoteTier {
        &self.remote
    }

    /// Get reference to the disk tier
    pub fn disk(&self) -> &DiskTier {
        &self.disk
    }

    /// Encode a value into an entry; `None` when the TTL leaves nothing to store
    fn encode<T: Serialize + ?Sized>(&self, value: &T, ttl: Duration) -> Result<Option<CacheEntry>> {
        if ttl.is_zero() {
            return Ok(None);
        }
        let encoded = self.codec.encode(value)?;
        Ok(Some(CacheEntry::with_ttl(encoded.bytes, self.clock.now_millis(), ttl)))
    }

    async fn write_through(&self, key: &CacheKey, entry: CacheEntry, tiers: TierPolicy) {
        for kind in self.serving(tiers) {
            match self.tier(kind).set(key, entry.clone()).await {
                Ok(()) => self.metrics.record_write(kind),
                Err(e) => self.absorb(kind, "write", &e),
            }
        }
    }

    /// First decodable live entry across the selected tiers
    async fn probe<T: DeserializeOwned>(&self, key: &CacheKey, tiers: TierPolicy) -> Option<T> {
        for kind in self.serving(tiers) {
            let tracker = LatencyTracker::start();
            let entry = match self.tier(kind).get(key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.metrics.record_miss(kind);
                    continue;
                }
                Err(e) => {
                    self.metrics.record_miss(kind);
                    self.absorb(kind, "read", &e);
                    continue;
                }
            };
            self.metrics.record_read_latency(kind, tracker.elapsed());

            match self.codec.decode::<T>(entry.payload()) {
                Ok(value) => {
                    debug!(tier = %kind, key = %key, "Cache hit");
                    self.metrics.record_hit(kind);
                    if self.config.backfill {
                        self.backfill(key, &entry, kind, tiers).await;
                    }
                    return Some(value);
                }
                Err(e) => {
                    warn!("Discarding undecodable {} cache entry {}: {}", kind, key, e);
                    self.metrics.record_decode_failure();
                    self.metrics.record_miss(kind);
                    if let Err(e) = self.tier(kind).delete(key).await {
                        self.absorb(kind, "delete", &e);
                    }
                }
            }
        }
        None
    }

    /// Copy a hit into the faster selected tiers, keeping its expiry
    async fn backfill(&self, key: &CacheKey, entry: &CacheEntry, found_in: TierKind, tiers: TierPolicy) {
        for kind in self.serving(tiers).take_while(|kind| *kind != found_in) {
            match self.tier(kind).set(key, entry.clone()).await {
                Ok(()) => self.metrics.record_backfill(kind),
                Err(e) => self.absorb(kind, "backfill", &e),
            }
        }
    }
}

/// Build a manager for the given remote service and disk directory
pub async fn create_cache(
    remote_host: &str,
    remote_port: u16,
    remote_db: i64,
    disk_dir: impl Into<PathBuf>,
) -> Result<CacheManager> {
    let config = CacheConfig {
        remote: RemoteConfig {
            host: remote_host.to_string(),
            port: remote_port,
            db: remote_db,
            ..Default::default()
        },
        disk: DiskConfig { dir: disk_dir.into() },
        ..Default::default()
    };
    CacheManager::connect(config).await
}

// =============================================================================
// Tests
// =============================================================================
