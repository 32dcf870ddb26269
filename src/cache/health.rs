//! Health Reporting
//!
//! Per-tier availability rolled up into one status. Losing the remote tier
//! degrades the cache but never makes it unusable; losing the disk directory
//! does.

use serde::{Deserialize, Serialize};

use super::tier::TierKind;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Every configured tier is serving
    Healthy,
    /// A configured tier is down, lookups fall through to the others
    Degraded,
    /// The cache cannot serve
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Check if status is healthy
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// State of one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierHealth {
    pub tier: TierKind,
    /// Taking part in lookups and writes
    pub available: bool,
    /// Contribution to the overall status
    pub status: HealthStatus,
    pub message: Option<String>,
}

impl TierHealth {
    /// A serving tier
    pub fn available(tier: TierKind) -> Self {
        Self {
            tier,
            available: true,
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// A tier that is off on purpose (not configured)
    pub fn disabled(tier: TierKind, message: impl Into<String>) -> Self {
        Self {
            tier,
            available: false,
            status: HealthStatus::Healthy,
            message: Some(message.into()),
        }
    }

    /// A configured tier that is not serving
    pub fn down(tier: TierKind, message: impl Into<String>) -> Self {
        Self {
            tier,
            available: false,
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    /// A tier the cache depends on that is failing
    pub fn failed(tier: TierKind, message: impl Into<String>) -> Self {
        Self {
            tier,
            available: false,
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Overall health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst status across tiers
    pub status: HealthStatus,
    pub tiers: Vec<TierHealth>,
    pub version: String,
}

impl HealthReport {
    pub fn new(tiers: Vec<TierHealth>) -> Self {
        let status = tiers
            .iter()
            .map(|t| t.status)
            .max_by_key(HealthStatus::severity)
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            tiers,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Entry for one tier
    pub fn tier(&self, tier: TierKind) -> Option<&TierHealth> {
        self.tiers.iter().find(|t| t.tier == tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_available_is_healthy() {
        let report = HealthReport::new(TierKind::ALL.iter().map(|t| TierHealth::available(*t)).collect());
        assert!(report.status.is_healthy());
        assert!(report.tier(TierKind::Remote).unwrap().available);
    }

    #[test]
    fn test_remote_down_degrades() {
        let report = HealthReport::new(vec![
            TierHealth::available(TierKind::Memory),
            TierHealth::down(TierKind::Remote, "connection refused"),
            TierHealth::available(TierKind::Disk),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.status.is_operational());
    }

    #[test]
    fn test_disabled_remote_stays_healthy() {
        let report = HealthReport::new(vec![
            TierHealth::available(TierKind::Memory),
            TierHealth::disabled(TierKind::Remote, "disabled by configuration"),
        ]);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(!report.tier(TierKind::Remote).unwrap().available);
    }

    #[test]
    fn test_failed_disk_is_unhealthy() {
        let report = HealthReport::new(vec![
            TierHealth::available(TierKind::Memory),
            TierHealth::down(TierKind::Remote, "connection refused"),
            TierHealth::failed(TierKind::Disk, "/var/cache/tiered: No such file or directory"),
        ]);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.status.is_operational());
        assert!(!report.tier(TierKind::Disk).unwrap().available);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(HealthStatus::Degraded.to_string(), "Degraded");
        assert!(!HealthStatus::Unhealthy.is_operational());
    }
}
