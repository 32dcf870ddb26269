//! Single-Flight Registry
//!
//! Coalesces concurrent misses on the same key. The first caller becomes the
//! leader and computes; later callers follow and wait for the leader to land
//! its encoded result, whether or not that result was written to any tier.
//!
//! ```text
//! leader:   join ──▶ compute ──▶ land(frame) ──▶ write-through ──▶ drop
//! follower: join ──▶ wait ─────────────┴──▶ decode frame
//! ```
//!
//! A leader dropped without landing (computation error, unencodable value,
//! cancelled task) releases its followers with [`FlightOutcome::Abandoned`];
//! they then compute on their own, concurrently.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use super::key::CacheKey;

/// What a leader left for its followers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightOutcome {
    /// Encoded frame of the computed value
    Shared(Bytes),
    /// No shareable result
    Abandoned,
}

type Slot = Arc<watch::Sender<Option<FlightOutcome>>>;

/// In-progress computations by key
#[derive(Debug, Default)]
pub struct FlightRegistry {
    flights: DashMap<CacheKey, Slot>,
}

impl FlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys with a computation in progress
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Lead the computation for `key`, or follow the one in progress
    pub fn join(&self, key: &CacheKey) -> Flight<'_> {
        match self.flights.entry(key.clone()) {
            Entry::Occupied(slot) => Flight::Follower(FlightFollower {
                outcome: slot.get().subscribe(),
            }),
            Entry::Vacant(vacant) => {
                let (sender, _) = watch::channel(None);
                let slot = Arc::new(sender);
                vacant.insert(slot.clone());
                Flight::Leader(FlightLeader {
                    registry: self,
                    key: key.clone(),
                    slot,
                    landed: false,
                })
            }
        }
    }
}

/// Role taken by a caller that joined a flight
pub enum Flight<'a> {
    Leader(FlightLeader<'a>),
    Follower(FlightFollower),
}

/// Held by the caller computing a key
pub struct FlightLeader<'a> {
    registry: &'a FlightRegistry,
    key: CacheKey,
    slot: Slot,
    landed: bool,
}

impl FlightLeader<'_> {
    /// Hand the encoded result to every follower
    ///
    /// The flight stays registered until the leader is dropped, so callers
    /// arriving during write-through still follow it.
    pub fn land(&mut self, frame: Bytes) {
        self.slot.send_replace(Some(FlightOutcome::Shared(frame)));
        self.landed = true;
    }
}

impl Drop for FlightLeader<'_> {
    fn drop(&mut self) {
        if !self.landed {
            self.slot.send_replace(Some(FlightOutcome::Abandoned));
        }
        self.registry
            .flights
            .remove_if(&self.key, |_, slot| Arc::ptr_eq(slot, &self.slot));
    }
}

/// Waits for a leader's outcome
pub struct FlightFollower {
    outcome: watch::Receiver<Option<FlightOutcome>>,
}

impl FlightFollower {
    pub async fn wait(mut self) -> FlightOutcome {
        loop {
            if let Some(outcome) = self.outcome.borrow_and_update().clone() {
                return outcome;
            }
            if self.outcome.changed().await.is_err() {
                return self
                    .outcome
                    .borrow()
                    .clone()
                    .unwrap_or(FlightOutcome::Abandoned);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::{derive_key, CallArgs};
    use std::time::Duration;

    fn make_key(n: i32) -> CacheKey {
        derive_key("flight-test", &CallArgs::new().arg(&n)).unwrap()
    }

    fn leader(flight: Flight<'_>) -> FlightLeader<'_> {
        match flight {
            Flight::Leader(leader) => leader,
            Flight::Follower(_) => panic!("expected to lead"),
        }
    }

    fn follower(flight: Flight<'_>) -> FlightFollower {
        match flight {
            Flight::Follower(follower) => follower,
            Flight::Leader(_) => panic!("expected to follow"),
        }
    }

    #[tokio::test]
    async fn test_slot_removed_after_leader_drops() {
        let registry = FlightRegistry::new();
        {
            let _leader = leader(registry.join(&make_key(1)));
            assert_eq!(registry.in_flight(), 1);
        }
        assert_eq!(registry.in_flight(), 0);
        let _again = leader(registry.join(&make_key(1)));
    }

    #[tokio::test]
    async fn test_distinct_keys_each_lead() {
        let registry = FlightRegistry::new();
        let _a = leader(registry.join(&make_key(1)));
        let _b = leader(registry.join(&make_key(2)));
        assert_eq!(registry.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_followers_receive_landed_frame() {
        let registry = Arc::new(FlightRegistry::new());
        let mut lead = leader(registry.join(&make_key(1)));

        let waiting: Vec<_> = (0..4)
            .map(|_| tokio::spawn(follower(registry.join(&make_key(1))).wait()))
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        lead.land(Bytes::from_static(b"\x00null"));

        // still registered until dropped
        let late = follower(registry.join(&make_key(1)));
        assert_eq!(
            late.wait().await,
            FlightOutcome::Shared(Bytes::from_static(b"\x00null"))
        );
        drop(lead);

        for handle in waiting {
            assert_eq!(
                handle.await.unwrap(),
                FlightOutcome::Shared(Bytes::from_static(b"\x00null"))
            );
        }
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unlanded_leader_abandons_followers() {
        let registry = FlightRegistry::new();
        let lead = leader(registry.join(&make_key(1)));
        let waiting = follower(registry.join(&make_key(1)));

        drop(lead);
        assert_eq!(waiting.wait().await, FlightOutcome::Abandoned);
        assert_eq!(registry.in_flight(), 0);
    }
}
