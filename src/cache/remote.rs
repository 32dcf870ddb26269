//! Remote Tier - shared key-value service
//!
//! Backed by Redis in production. The connection is probed once at
//! construction; if the service is unreachable the tier stays disabled for
//! the rest of the process lifetime and every lookup skips it.
//!
//! # Design
//!
//! - Expiry is native (`PSETEX`), never checked client-side
//! - Hits carry their remaining lifetime (`GET` + `PTTL` pipelined)
//! - Every call is bounded by `operation_timeout_ms`
//! - Pluggable [`RemoteStore`] backend, with an in-process store for tests

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::entry::{CacheEntry, NEVER_EXPIRES};
use super::key::CacheKey;
use super::tier::{Tier, TierKind};
use crate::error::{Error, Result};

/// Remote tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Connect at all (false runs memory + disk only)
    pub enabled: bool,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Logical database number
    pub db: i64,
    /// Deadline for the initial connection and ping
    pub connect_timeout_ms: u64,
    /// Deadline for each get/set/delete/clear
    pub operation_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            connect_timeout_ms: 2_000,
            operation_timeout_ms: 500,
        }
    }
}

impl RemoteConfig {
    /// Connection URL for the Redis client
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }

    /// Connect deadline
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-operation deadline
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

// =============================================================================
// Remote Store Backends
// =============================================================================

/// Native operations of the remote key-value service
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Liveness check
    async fn ping(&self) -> Result<()>;

    /// Get a value and its remaining lifetime (`None` = no expiry)
    async fn get(&self, key: &str) -> Result<Option<(Bytes, Option<Duration>)>>;

    /// Set a value that the service expires after `ttl`
    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete a value, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every value in the selected database
    async fn flush(&self) -> Result<()>;
}

/// Redis-backed store over a multiplexed, auto-reconnecting connection
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Open a connection, bounded by the configured connect timeout
    pub async fn connect(config: &RemoteConfig) -> Result<Self> {
        let client = redis::Client::open(config.url())?;
        let timeout = config.connect_timeout();

        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| Error::Timeout {
                tier: TierKind::Remote.name().into(),
                operation: "connect".into(),
                after: timeout,
            })??;

        Ok(Self { conn })
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis answered {}", pong);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, Option<Duration>)>> {
        let mut conn = self.conn.clone();
        let (payload, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .get(key)
            .pttl(key)
            .query_async(&mut conn)
            .await?;

        Ok(payload.and_then(|bytes| match pttl {
            // key vanished between GET and PTTL
            -2 => None,
            -1 => Some((Bytes::from(bytes), None)),
            ms => Some((Bytes::from(bytes), Some(Duration::from_millis(ms.max(0) as u64)))),
        }))
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = redis::cmd("PSETEX")
            .arg(key)
            .arg(millis)
            .arg(value.as_ref())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn flush(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-process remote store for testing
///
/// Expires values against the shared [`Clock`] and can be switched
/// unreachable to exercise the fail-open paths.
#[derive(Debug)]
pub struct InMemoryRemoteStore {
    values: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
    reachable: AtomicBool,
    calls: AtomicU64,
}

impl InMemoryRemoteStore {
    /// Create an empty, reachable store
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            values: DashMap::new(),
            clock,
            reachable: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        }
    }

    /// Make every subsequent call succeed or fail
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of stored values (expired ones included)
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Total calls received, failed ones included
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Raw stored payload, ignoring expiry
    pub fn raw(&self, key: &str) -> Option<Bytes> {
        self.values.get(key).map(|e| e.payload().clone())
    }

    fn check(&self, operation: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::TierOperation {
                tier: TierKind::Remote.name().into(),
                operation: operation.into(),
                reason: "connection refused".into(),
            })
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn ping(&self) -> Result<()> {
        self.check("ping")
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, Option<Duration>)>> {
        self.check("get")?;
        let now = self.clock.now_millis();
        if self
            .values
            .remove_if(key, |_, e| e.is_expired_at(now))
            .is_some()
        {
            return Ok(None);
        }
        Ok(self
            .values
            .get(key)
            .map(|e| (e.payload().clone(), e.remaining_ttl(now))))
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.check("set")?;
        let entry = CacheEntry::with_ttl(value, self.clock.now_millis(), ttl);
        self.values.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check("delete")?;
        Ok(self.values.remove(key).is_some())
    }

    async fn flush(&self) -> Result<()> {
        self.check("clear")?;
        self.values.clear();
        Ok(())
    }
}

// =============================================================================
// Remote Tier
// =============================================================================

/// Remote tier wrapping an optional store
pub struct RemoteTier {
    store: RwLock<Option<Arc<dyn RemoteStore>>>,
    unavailable_reason: RwLock<Option<String>>,
    operation_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RemoteTier {
    /// Connect to Redis as configured; never fails, degrades instead
    pub async fn establish(config: &RemoteConfig, clock: Arc<dyn Clock>) -> Self {
        if !config.enabled {
            info!("Remote cache tier disabled by configuration");
            return Self::unavailable("disabled by configuration", config, clock);
        }

        match RedisStore::connect(config).await {
            Ok(store) => Self::with_store(Arc::new(store), config, clock).await,
            Err(e) => {
                warn!(
                    "Remote cache connection to {} failed, falling back to local caching: {}",
                    config.url(),
                    e
                );
                Self::unavailable(e.to_string(), config, clock)
            }
        }
    }

    /// Wrap an existing store after a bounded liveness check
    pub async fn with_store(
        store: Arc<dyn RemoteStore>,
        config: &RemoteConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let timeout = config.connect_timeout();
        let probe = match tokio::time::timeout(timeout, store.ping()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                tier: TierKind::Remote.name().into(),
                operation: "ping".into(),
                after: timeout,
            }),
        };

        match probe {
            Ok(()) => {
                info!("Remote cache connection established successfully");
                Self {
                    store: RwLock::new(Some(store)),
                    unavailable_reason: RwLock::new(None),
                    operation_timeout: config.operation_timeout(),
                    clock,
                }
            }
            Err(e) => {
                let err = Error::TierUnavailable {
                    tier: TierKind::Remote.name().into(),
                    reason: e.to_string(),
                };
                warn!("{}. Falling back to local caching.", err);
                Self::unavailable(e.to_string(), config, clock)
            }
        }
    }

    /// A tier that never takes part in lookups
    pub fn unavailable(
        reason: impl Into<String>,
        config: &RemoteConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store: RwLock::new(None),
            unavailable_reason: RwLock::new(Some(reason.into())),
            operation_timeout: config.operation_timeout(),
            clock,
        }
    }

    /// Why the tier is disabled, if it is
    pub fn unavailable_reason(&self) -> Option<String> {
        self.unavailable_reason.read().clone()
    }

    /// Drop the connection; the tier is unavailable afterwards
    pub fn close(&self) {
        if self.store.write().take().is_some() {
            *self.unavailable_reason.write() = Some("closed".to_string());
            info!("Remote cache connection closed");
        }
    }

    fn current_store(&self) -> Option<Arc<dyn RemoteStore>> {
        self.store.read().clone()
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                tier: TierKind::Remote.name().into(),
                operation: operation.into(),
                after: self.operation_timeout,
            }),
        }
    }
}

#[async_trait]
impl Tier for RemoteTier {
    fn kind(&self) -> TierKind {
        TierKind::Remote
    }

    fn is_available(&self) -> bool {
        self.store.read().is_some()
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let Some(store) = self.current_store() else {
            return Ok(None);
        };

        let found = self.bounded("get", store.get(key.as_str())).await?;
        let now = self.clock.now_millis();

        Ok(found.map(|(payload, remaining)| {
            let expires_at_ms = match remaining {
                Some(ttl) => now.saturating_add(ttl.as_millis() as u64),
                None => NEVER_EXPIRES,
            };
            CacheEntry::new(payload, expires_at_ms)
        }))
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> Result<()> {
        let Some(store) = self.current_store() else {
            return Ok(());
        };

        let now = self.clock.now_millis();
        let ttl = match entry.remaining_ttl(now) {
            Some(ttl) if ttl.is_zero() => return Ok(()),
            Some(ttl) => ttl,
            None => Duration::from_secs(u32::MAX as u64),
        };

        self.bounded("set", store.set_ex(key.as_str(), entry.payload().clone(), ttl))
            .await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let Some(store) = self.current_store() else {
            return Ok(false);
        };
        self.bounded("delete", store.delete(key.as_str())).await
    }

    async fn clear(&self) -> Result<()> {
        let Some(store) = self.current_store() else {
            return Ok(());
        };
        self.bounded("clear", store.flush()).await
    }
}

// =============================================================================
// Tests
// =============================================================================
