//! Memory Tier - in-process hot cache
//!
//! Lives for the process lifetime. Backed by a `DashMap`, so get/set/delete
//! on the same key are atomic with respect to each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::clock::Clock;
use super::entry::CacheEntry;
use super::key::CacheKey;
use super::tier::{Tier, TierKind};
use crate::error::Result;

/// In-process memory tier
pub struct MemoryTier {
    entries: DashMap<CacheKey, CacheEntry>,
    clock: Arc<dyn Clock>,
    /// Entries dropped because they were found expired
    expirations: AtomicU64,
}

impl MemoryTier {
    /// Create an empty memory tier
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            expirations: AtomicU64::new(0),
        }
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the tier is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry (live or not yet purged) is stored for `key`
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Total payload bytes held
    pub fn size_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.value().size() as u64).sum()
    }

    /// Entries dropped on expiry so far
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before.saturating_sub(self.entries.len());
        self.expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }
}

#[async_trait]
impl Tier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let now = self.clock.now_millis();

        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired_at(now))
            .is_some()
        {
            self.expirations.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        Ok(self
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
            .filter(|entry| !entry.is_expired_at(now)))
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> Result<()> {
        self.entries.insert(key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
