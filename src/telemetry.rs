//! Logging and Metrics Exposition
//!
//! Installs the `tracing` subscriber for the binary and renders cache
//! metrics snapshots in the Prometheus text format.

use prometheus::{Encoder, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cache::{HealthReport, HealthStatus, MetricsSnapshot};
use crate::error::{Error, Result};

// =============================================================================
// Logging Setup
// =============================================================================

/// Parse a log level name, defaulting to INFO
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber; `RUST_LOG` takes precedence over `level`
pub fn init_logging(level: &str, json: bool) {
    let level = parse_level(level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},hyper=warn,redis=warn", level.to_string().to_lowercase()))
    });

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Prometheus Exposition
// =============================================================================

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics encoding failed: {}", e))
}

fn tier_counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), &["tier"]).map_err(prom_err)?;
    registry.register(Box::new(counter.clone())).map_err(prom_err)?;
    Ok(counter)
}

fn counter(registry: &Registry, name: &str, help: &str, value: u64) -> Result<()> {
    let counter = IntCounter::new(name, help).map_err(prom_err)?;
    registry.register(Box::new(counter.clone())).map_err(prom_err)?;
    counter.inc_by(value);
    Ok(())
}

/// Render a snapshot (and optionally tier health) as Prometheus text
pub fn encode_prometheus(snapshot: &MetricsSnapshot, health: Option<&HealthReport>) -> Result<String> {
    let registry = Registry::new();

    let hits = tier_counter(&registry, "tiered_cache_hits_total", "Cache hits per tier")?;
    let misses = tier_counter(&registry, "tiered_cache_misses_total", "Cache misses per tier")?;
    let errors = tier_counter(&registry, "tiered_cache_errors_total", "Absorbed tier failures")?;
    let writes = tier_counter(&registry, "tiered_cache_writes_total", "Entries written per tier")?;
    let backfills = tier_counter(
        &registry,
        "tiered_cache_backfills_total",
        "Hits copied into a faster tier",
    )?;
    let latency = GaugeVec::new(
        Opts::new(
            "tiered_cache_read_latency_seconds",
            "Smoothed read latency per tier",
        ),
        &["tier"],
    )
    .map_err(prom_err)?;
    registry.register(Box::new(latency.clone())).map_err(prom_err)?;

    for tier in &snapshot.tiers {
        let label = [tier.tier.name()];
        hits.with_label_values(&label).inc_by(tier.hits);
        misses.with_label_values(&label).inc_by(tier.misses);
        errors.with_label_values(&label).inc_by(tier.errors);
        writes.with_label_values(&label).inc_by(tier.writes);
        backfills.with_label_values(&label).inc_by(tier.backfills);
        latency
            .with_label_values(&label)
            .set(tier.read_latency_us as f64 / 1_000_000.0);
    }

    counter(&registry, "tiered_cache_lookups_total", "Cache lookups", snapshot.lookups)?;
    counter(
        &registry,
        "tiered_cache_computations_total",
        "Values computed on a miss",
        snapshot.computations,
    )?;
    counter(
        &registry,
        "tiered_cache_decode_failures_total",
        "Entries discarded as undecodable",
        snapshot.decode_failures,
    )?;
    counter(
        &registry,
        "tiered_cache_uncacheable_total",
        "Computed values that could not be encoded",
        snapshot.uncacheable,
    )?;
    counter(
        &registry,
        "tiered_cache_flight_waits_total",
        "Callers that waited on another caller's computation",
        snapshot.flight_waits,
    )?;

    if let Some(health) = health {
        let available = GaugeVec::new(
            Opts::new("tiered_cache_tier_available", "1 if the tier is serving"),
            &["tier"],
        )
        .map_err(prom_err)?;
        registry.register(Box::new(available.clone())).map_err(prom_err)?;
        for tier in &health.tiers {
            available
                .with_label_values(&[tier.tier.name()])
                .set(if tier.available { 1.0 } else { 0.0 });
        }

        let degraded = GaugeVec::new(
            Opts::new("tiered_cache_degraded", "1 if a configured tier is down"),
            &["version"],
        )
        .map_err(prom_err)?;
        registry.register(Box::new(degraded.clone())).map_err(prom_err)?;
        degraded
            .with_label_values(&[health.version.as_str()])
            .set(if health.status == HealthStatus::Healthy { 0.0 } else { 1.0 });
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(prom_err)?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheMetrics, TierHealth, TierKind};

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_encode_prometheus() {
        let metrics = CacheMetrics::new();
        metrics.record_hit(TierKind::Memory);
        metrics.record_hit(TierKind::Memory);
        metrics.record_error(TierKind::Remote);
        metrics.record_computation();

        let text = encode_prometheus(&metrics.snapshot(), None).unwrap();
        assert!(text.contains("tiered_cache_hits_total{tier=\"memory\"} 2"));
        assert!(text.contains("tiered_cache_errors_total{tier=\"remote\"} 1"));
        assert!(text.contains("tiered_cache_computations_total 1"));
        assert!(!text.contains("tiered_cache_tier_available"));
    }

    #[test]
    fn test_encode_with_health() {
        let health = HealthReport::new(vec![
            TierHealth::available(TierKind::Memory),
            TierHealth::down(TierKind::Remote, "refused"),
            TierHealth::available(TierKind::Disk),
        ]);
        let text = encode_prometheus(&CacheMetrics::new().snapshot(), Some(&health)).unwrap();

        assert!(text.contains("tiered_cache_tier_available{tier=\"remote\"} 0"));
        assert!(text.contains("tiered_cache_tier_available{tier=\"disk\"} 1"));
        assert!(text.contains("tiered_cache_degraded{"));
    }
}
