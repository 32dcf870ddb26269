//! Cache Metrics Collection
//!
//! Lock-free counters per tier plus orchestrator-level totals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::tier::TierKind;

/// Counters for one tier
#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
    backfills: AtomicU64,
    // microseconds, exponential moving average
    read_latency_us: AtomicU64,
}

impl TierCounters {
    fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.misses.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    fn snapshot(&self, tier: TierKind) -> TierSnapshot {
        TierSnapshot {
            tier,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            backfills: self.backfills.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
            read_latency_us: self.read_latency_us.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.errors,
            &self.writes,
            &self.backfills,
            &self.read_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    memory: TierCounters,
    remote: TierCounters,
    disk: TierCounters,

    // Orchestrator
    lookups: AtomicU64,
    computations: AtomicU64,
    decode_failures: AtomicU64,
    uncacheable: AtomicU64,
    flight_waits: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    fn tier(&self, tier: TierKind) -> &TierCounters {
        match tier {
            TierKind::Memory => &self.memory,
            TierKind::Remote => &self.remote,
            TierKind::Disk => &self.disk,
        }
    }

    pub fn record_hit(&self, tier: TierKind) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, tier: TierKind) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, tier: TierKind) {
        self.tier(tier).errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, tier: TierKind) {
        self.tier(tier).writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backfill(&self, tier: TierKind) {
        self.tier(tier).backfills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_latency(&self, tier: TierKind, duration: Duration) {
        update_latency_ema(&self.tier(tier).read_latency_us, duration);
    }

    pub fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_computation(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A computed value that could not be encoded and was returned uncached
    pub fn record_uncacheable(&self) {
        self.uncacheable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flight_wait(&self) {
        self.flight_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self, tier: TierKind) -> u64 {
        self.tier(tier).hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self, tier: TierKind) -> u64 {
        self.tier(tier).misses.load(Ordering::Relaxed)
    }

    pub fn errors(&self, tier: TierKind) -> u64 {
        self.tier(tier).errors.load(Ordering::Relaxed)
    }

    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Share of lookups answered by any tier
    pub fn overall_hit_ratio(&self) -> f64 {
        let lookups = self.lookups.load(Ordering::Relaxed);
        if lookups == 0 {
            return 0.0;
        }
        let hits: u64 = TierKind::ALL.iter().map(|t| self.hits(*t)).sum();
        (hits as f64 / lookups as f64).min(1.0)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tiers: TierKind::ALL
                .iter()
                .map(|t| self.tier(*t).snapshot(*t))
                .collect(),
            lookups: self.lookups.load(Ordering::Relaxed),
            computations: self.computations(),
            decode_failures: self.decode_failures(),
            uncacheable: self.uncacheable.load(Ordering::Relaxed),
            flight_waits: self.flight_waits.load(Ordering::Relaxed),
            overall_hit_ratio: self.overall_hit_ratio(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for tier in TierKind::ALL {
            self.tier(tier).reset();
        }
        self.lookups.store(0, Ordering::Relaxed);
        self.computations.store(0, Ordering::Relaxed);
        self.decode_failures.store(0, Ordering::Relaxed);
        self.uncacheable.store(0, Ordering::Relaxed);
        self.flight_waits.store(0, Ordering::Relaxed);
    }
}

fn update_latency_ema(target: &AtomicU64, duration: Duration) {
    let new_us = duration.as_micros() as u64;
    let alpha = 0.1; // EMA smoothing factor

    loop {
        let current = target.load(Ordering::Relaxed);
        let updated = if current == 0 {
            new_us
        } else {
            ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
        };

        if target
            .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

/// Point-in-time counters for one tier
#[derive(Debug, Clone, Serialize)]
pub struct TierSnapshot {
    pub tier: TierKind,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub writes: u64,
    pub backfills: u64,
    pub hit_ratio: f64,
    pub read_latency_us: u64,
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Per tier, fastest first
    pub tiers: Vec<TierSnapshot>,
    pub lookups: u64,
    pub computations: u64,
    pub decode_failures: u64,
    pub uncacheable: u64,
    pub flight_waits: u64,
    pub overall_hit_ratio: f64,
}

impl MetricsSnapshot {
    /// Counters for one tier
    pub fn tier(&self, tier: TierKind) -> Option<&TierSnapshot> {
        self.tiers.iter().find(|t| t.tier == tier)
    }
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
