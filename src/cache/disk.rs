//! Disk Tier - one file per key
//!
//! ```text
//! <dir>/
//! ├── 3f9c…e1        {"expires_at_ms": 1718000000000, "payload": "01a4…"}
//! ├── 7b02…4d
//! └── .7b02…4d.<uuid>.tmp   (in-flight write, renamed over the key file)
//! ```
//!
//! Records survive restarts. A record that cannot be read or parsed is
//! deleted and reported as a miss.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::clock::Clock;
use super::entry::CacheEntry;
use super::key::CacheKey;
use super::tier::{Tier, TierKind};
use crate::error::{Error, Result};

/// Age after which a leftover temp file is treated as abandoned
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(600);

/// Disk tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Directory holding one record file per key
    pub dir: PathBuf,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("tiered-cache"),
        }
    }
}

/// On-disk record
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    expires_at_ms: u64,
    payload: String,
}

impl DiskRecord {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            expires_at_ms: entry.expires_at_ms(),
            payload: hex::encode(entry.payload()),
        }
    }

    fn into_entry(self) -> Result<CacheEntry> {
        let payload = hex::decode(&self.payload)
            .map_err(|e| Error::Codec(format!("invalid payload encoding: {}", e)))?;
        Ok(CacheEntry::new(Bytes::from(payload), self.expires_at_ms))
    }
}

/// Outcome of reading one record file
enum Loaded {
    Missing,
    Live(CacheEntry),
    Expired,
    Corrupt(Error),
}

/// Local disk tier
pub struct DiskTier {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    /// Record files deleted because they could not be read
    corrupt_removed: AtomicU64,
}

impl DiskTier {
    /// Open the tier, creating the directory if needed
    pub async fn open(config: &DiskConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.dir).await?;
        debug!("Disk cache tier at {}", config.dir.display());

        Ok(Self {
            dir: config.dir.clone(),
            clock,
            corrupt_removed: AtomicU64::new(0),
        })
    }

    /// Directory holding the records
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Corrupt records removed so far
    pub fn corrupt_removed(&self) -> u64 {
        self.corrupt_removed.load(Ordering::Relaxed)
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    async fn load(&self, path: &Path) -> Loaded {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Loaded::Missing,
            Err(e) => return Loaded::Corrupt(e.into()),
        };

        let entry = match serde_json::from_slice::<DiskRecord>(&raw) {
            Ok(record) => record.into_entry(),
            Err(e) => Err(e.into()),
        };

        match entry {
            Ok(entry) if entry.is_expired_at(self.clock.now_millis()) => Loaded::Expired,
            Ok(entry) => Loaded::Live(entry),
            Err(e) => Loaded::Corrupt(e),
        }
    }

    /// Remove a file, treating "already gone" as success
    async fn remove(&self, path: &Path) -> std::io::Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn discard_corrupt(&self, path: &Path, cause: &Error) {
        warn!("Discarding unreadable cache record {}: {}", path.display(), cause);
        self.corrupt_removed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.remove(path).await {
            warn!("Failed to remove cache record {}: {}", path.display(), e);
        }
    }

    /// Record files currently stored (expired ones included)
    pub async fn len(&self) -> Result<usize> {
        let mut count = 0;
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            if is_record_name(&item.file_name().to_string_lossy()) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Check if no records are stored
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Check that the directory is still usable
    pub fn check(&self) -> std::result::Result<(), String> {
        match std::fs::metadata(&self.dir) {
            Ok(meta) if !meta.is_dir() => Err(format!("{} is not a directory", self.dir.display())),
            Ok(meta) if meta.permissions().readonly() => {
                Err(format!("{} is read-only", self.dir.display()))
            }
            Ok(_) => Ok(()),
            Err(e) => Err(format!("{}: {}", self.dir.display(), e)),
        }
    }

    /// Remove expired and corrupt records, plus temp files left by
    /// interrupted writes, returning how many files were removed
    pub async fn purge_expired(&self) -> Result<usize> {
        let mut removed = 0;
        let mut dir = tokio::fs::read_dir(&self.dir).await?;

        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            let path = item.path();

            if is_temp_name(&name) {
                if self.is_stale_temp(&item).await && self.remove(&path).await.unwrap_or(false) {
                    debug!("Removed abandoned temp file {}", path.display());
                    removed += 1;
                }
                continue;
            }
            if !is_record_name(&name) {
                continue;
            }
            match self.load(&path).await {
                Loaded::Missing | Loaded::Live(_) => {}
                Loaded::Expired => {
                    if self.remove(&path).await.unwrap_or(false) {
                        removed += 1;
                    }
                }
                Loaded::Corrupt(e) => {
                    self.discard_corrupt(&path, &e).await;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!("Purged {} disk cache records", removed);
        }
        Ok(removed)
    }

    async fn is_stale_temp(&self, item: &tokio::fs::DirEntry) -> bool {
        let modified = match item.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= STALE_TEMP_AGE)
            .unwrap_or(false)
    }
}

/// Record files are named by their key
fn is_record_name(name: &str) -> bool {
    CacheKey::from_hex(name).is_ok()
}

/// Temp files are `.<key>.<uuid>.tmp`
fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

#[async_trait]
impl Tier for DiskTier {
    fn kind(&self) -> TierKind {
        TierKind::Disk
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);

        match self.load(&path).await {
            Loaded::Missing => Ok(None),
            Loaded::Live(entry) => Ok(Some(entry)),
            Loaded::Expired => {
                self.remove(&path).await?;
                Ok(None)
            }
            Loaded::Corrupt(e) => {
                self.discard_corrupt(&path, &e).await;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> Result<()> {
        let record = serde_json::to_vec(&DiskRecord::from_entry(&entry))?;
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));

        if let Err(e) = tokio::fs::write(&tmp, &record).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, self.path_for(key)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.remove(&self.path_for(key)).await?)
    }

    async fn clear(&self) -> Result<()> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut failures = 0usize;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let is_file = item.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Err(e) = self.remove(&path).await {
                warn!("Error removing cache file {}: {}", path.display(), e);
                failures += 1;
            }
        }

        if failures > 0 {
            warn!("Disk cache cleared with {} files left behind", failures);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::key::{derive_key, CallArgs};
    use tempfile::TempDir;

    fn make_key(n: i32) -> CacheKey {
        derive_key("disk-test", &CallArgs::new().arg(&n)).unwrap()
    }

    async fn setup() -> (TempDir, Arc<ManualClock>, DiskTier) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(10_000_000));
        let config = DiskConfig {
            dir: dir.path().join("cache"),
        };
        let tier = DiskTier::open(&config, clock.clone()).await.unwrap();
        (dir, clock, tier)
    }

    fn entry(clock: &ManualClock, data: &'static [u8], ttl_secs: u64) -> CacheEntry {
        CacheEntry::with_ttl(
            Bytes::from_static(data),
            clock.now_millis(),
            Duration::from_secs(ttl_secs),
        )
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let (_dir, _clock, tier) = setup().await;
        assert!(tier.dir().is_dir());
        assert!(tier.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_set_get_survives_reopen() {
        let (_dir, clock, tier) = setup().await;
        let key = make_key(1);
        let stored = entry(&clock, b"\x01\x02binary", 60);
        tier.set(&key, stored.clone()).await.unwrap();

        let reopened = DiskTier::open(
            &DiskConfig {
                dir: tier.dir().to_path_buf(),
            },
            clock.clone(),
        )
        .await
        .unwrap();

        let found = reopened.get(&key).await.unwrap().unwrap();
        assert_eq!(found, stored);
        assert!(tier.dir().join(key.as_str()).is_file());
    }

    #[tokio::test]
    async fn test_record_format() {
        let (_dir, clock, tier) = setup().await;
        let key = make_key(1);
        tier.set(&key, entry(&clock, b"ab", 1)).await.unwrap();

        let raw = std::fs::read(tier.dir().join(key.as_str())).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["payload"], "6162");
        assert_eq!(json["expires_at_ms"], 10_001_000u64);
    }

    #[tokio::test]
    async fn test_expired_record_removed() {
        let (_dir, clock, tier) = setup().await;
        let key = make_key(1);
        tier.set(&key, entry(&clock, b"data", 60)).await.unwrap();

        clock.advance(Duration::from_secs(61));
        assert!(tier.get(&key).await.unwrap().is_none());
        assert!(!tier.dir().join(key.as_str()).exists());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_miss_and_removed() {
        let (_dir, _clock, tier) = setup().await;
        let key = make_key(1);
        let path = tier.dir().join(key.as_str());

        std::fs::write(&path, b"{\"expires_at_ms\": 1, \"payl").unwrap();
        assert!(tier.get(&key).await.unwrap().is_none());
        assert!(!path.exists());

        std::fs::write(&path, br#"{"expires_at_ms": 99999999999999, "payload": "zz"}"#).unwrap();
        assert!(tier.get(&key).await.unwrap().is_none());
        assert!(!path.exists());
        assert_eq!(tier.corrupt_removed(), 2);
    }

    #[tokio::test]
    async fn test_overwrite_last_writer_wins() {
        let (_dir, clock, tier) = setup().await;
        let key = make_key(1);
        tier.set(&key, entry(&clock, b"first", 60)).await.unwrap();
        tier.set(&key, entry(&clock, b"second", 60)).await.unwrap();

        let found = tier.get(&key).await.unwrap().unwrap();
        assert_eq!(found.payload().as_ref(), b"second");
        assert_eq!(tier.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (_dir, clock, tier) = setup().await;
        let key = make_key(1);
        assert!(!tier.delete(&key).await.unwrap());

        tier.set(&key, entry(&clock, b"x", 60)).await.unwrap();
        assert!(tier.delete(&key).await.unwrap());
        assert!(tier.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_all_files() {
        let (_dir, clock, tier) = setup().await;
        for i in 0..4 {
            tier.set(&make_key(i), entry(&clock, b"x", 60)).await.unwrap();
        }
        std::fs::write(tier.dir().join("stray.txt"), b"left by someone").unwrap();

        tier.clear().await.unwrap();
        assert_eq!(std::fs::read_dir(tier.dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (_dir, clock, tier) = setup().await;
        tier.set(&make_key(1), entry(&clock, b"short", 5)).await.unwrap();
        tier.set(&make_key(2), entry(&clock, b"long", 500)).await.unwrap();
        std::fs::write(tier.dir().join(make_key(3).as_str()), b"garbage").unwrap();

        clock.advance(Duration::from_secs(10));
        assert_eq!(tier.purge_expired().await.unwrap(), 2);
        assert_eq!(tier.len().await.unwrap(), 1);
        assert!(tier.get(&make_key(2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_removes_abandoned_temp_files() {
        let (_dir, clock, tier) = setup().await;
        let key = make_key(1);
        tier.set(&key, entry(&clock, b"kept", 500)).await.unwrap();

        let abandoned = tier.dir().join(format!(".{}.0001.tmp", key));
        let in_progress = tier.dir().join(format!(".{}.0002.tmp", key));
        std::fs::write(&abandoned, b"{\"expires_at_ms\": 1").unwrap();
        std::fs::write(&in_progress, b"{\"expires_at_ms\": 2").unwrap();

        let old = SystemTime::now() - STALE_TEMP_AGE - Duration::from_secs(60);
        std::fs::File::options()
            .write(true)
            .open(&abandoned)
            .unwrap()
            .set_modified(old)
            .unwrap();

        assert_eq!(tier.purge_expired().await.unwrap(), 1);
        assert!(!abandoned.exists());
        assert!(in_progress.exists());
        assert!(tier.get(&key).await.unwrap().is_some());
        assert_eq!(tier.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_check_reports_missing_directory() {
        let (_dir, _clock, tier) = setup().await;
        assert!(tier.check().is_ok());

        std::fs::remove_dir_all(tier.dir()).unwrap();
        let err = tier.check().unwrap_err();
        assert!(err.contains("cache"));
    }

    #[tokio::test]
    async fn test_concurrent_writes_leave_no_temp_files() {
        let (_dir, clock, tier) = setup().await;
        let tier = Arc::new(tier);
        let key = make_key(7);

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let tier = tier.clone();
            let key = key.clone();
            let e = CacheEntry::with_ttl(Bytes::from(vec![i; 32]), clock.now_millis(), Duration::from_secs(60));
            handles.push(tokio::spawn(async move { tier.set(&key, e).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let found = tier.get(&key).await.unwrap().unwrap();
        assert_eq!(found.size(), 32);
        assert_eq!(std::fs::read_dir(tier.dir()).unwrap().count(), 1);
    }
}
