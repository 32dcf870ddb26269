//! Tier Abstraction
//!
//! Every storage tier exposes the same four operations. Tiers report their
//! failures as errors; the manager decides how to absorb them.

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::entry::CacheEntry;
use super::key::CacheKey;
use crate::error::{Error, Result};

/// Tier identity, in lookup priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// In-process memory (hot)
    Memory,
    /// Shared remote key-value service (warm)
    Remote,
    /// Local disk (cold, survives restarts)
    Disk,
}

impl TierKind {
    /// All tiers, fastest first
    pub const ALL: [TierKind; 3] = [TierKind::Memory, TierKind::Remote, TierKind::Disk];

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            TierKind::Memory => "memory",
            TierKind::Remote => "remote",
            TierKind::Disk => "disk",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which tiers a call reads from and writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierPolicy {
    /// Memory tier only
    Memory,
    /// Remote tier only
    #[serde(alias = "redis")]
    Remote,
    /// Disk tier only
    Disk,
    /// All three tiers
    #[default]
    Multi,
}

impl TierPolicy {
    /// Whether the policy selects `tier`
    pub fn includes(&self, tier: TierKind) -> bool {
        match self {
            TierPolicy::Multi => true,
            TierPolicy::Memory => tier == TierKind::Memory,
            TierPolicy::Remote => tier == TierKind::Remote,
            TierPolicy::Disk => tier == TierKind::Disk,
        }
    }

    /// Selected tiers in lookup order
    pub fn tiers(&self) -> impl Iterator<Item = TierKind> + '_ {
        TierKind::ALL.into_iter().filter(move |t| self.includes(*t))
    }
}

impl FromStr for TierPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(TierPolicy::Memory),
            "remote" | "redis" => Ok(TierPolicy::Remote),
            "disk" => Ok(TierPolicy::Disk),
            "multi" => Ok(TierPolicy::Multi),
            other => Err(Error::Config(format!(
                "unknown tier policy '{}' (expected memory, remote, disk or multi)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for TierPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TierPolicy::Memory => "memory",
            TierPolicy::Remote => "remote",
            TierPolicy::Disk => "disk",
            TierPolicy::Multi => "multi",
        };
        write!(f, "{}", name)
    }
}

/// Storage tier contract
#[async_trait]
pub trait Tier: Send + Sync {
    /// Which tier this is
    fn kind(&self) -> TierKind;

    /// Whether the tier takes part in lookups and writes
    fn is_available(&self) -> bool {
        true
    }

    /// Get a live entry; expired entries are removed and reported as a miss
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Store an entry, replacing any previous one
    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> Result<()>;

    /// Remove an entry, returning whether one existed
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("memory".parse::<TierPolicy>().unwrap(), TierPolicy::Memory);
        assert_eq!("redis".parse::<TierPolicy>().unwrap(), TierPolicy::Remote);
        assert_eq!("remote".parse::<TierPolicy>().unwrap(), TierPolicy::Remote);
        assert_eq!("disk".parse::<TierPolicy>().unwrap(), TierPolicy::Disk);
        assert_eq!("multi".parse::<TierPolicy>().unwrap(), TierPolicy::Multi);
        assert_matches!("l1".parse::<TierPolicy>(), Err(Error::Config(_)));
        assert_matches!("".parse::<TierPolicy>(), Err(Error::Config(_)));
    }

    #[test]
    fn test_policy_tier_order() {
        let all: Vec<_> = TierPolicy::Multi.tiers().collect();
        assert_eq!(all, vec![TierKind::Memory, TierKind::Remote, TierKind::Disk]);

        let disk: Vec<_> = TierPolicy::Disk.tiers().collect();
        assert_eq!(disk, vec![TierKind::Disk]);
        assert!(!TierPolicy::Memory.includes(TierKind::Remote));
    }

    #[test]
    fn test_policy_display_roundtrip() {
        for policy in [
            TierPolicy::Memory,
            TierPolicy::Remote,
            TierPolicy::Disk,
            TierPolicy::Multi,
        ] {
            assert_eq!(policy.to_string().parse::<TierPolicy>().unwrap(), policy);
        }
        assert_eq!(TierPolicy::default(), TierPolicy::Multi);
    }

    #[test]
    fn test_policy_deserialize() {
        let policy: TierPolicy = serde_yaml::from_str("redis").unwrap();
        assert_eq!(policy, TierPolicy::Remote);
        assert!(serde_yaml::from_str::<TierPolicy>("everything").is_err());
    }
}
