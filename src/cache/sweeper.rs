//! Background Expiry Sweeper
//!
//! Expired entries are otherwise only dropped when they are next read. The
//! sweeper purges memory and disk on a fixed interval; remote expiry is
//! handled by the service itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manager::CacheManager;

/// Periodic purge task
pub struct Sweeper;

impl Sweeper {
    /// Start sweeping every `interval` until `cancel` fires
    pub fn spawn(
        manager: Arc<CacheManager>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            info!("Cache sweeper started (interval {:?})", interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match manager.purge_expired().await {
                            Ok(stats) => debug!(
                                memory = stats.memory,
                                disk = stats.disk,
                                "Sweep complete"
                            ),
                            Err(e) => warn!("Cache sweep failed: {}", e),
                        }
                    }
                }
            }
            info!("Cache sweeper stopped");
        })
    }
}
