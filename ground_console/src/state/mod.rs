//! In-memory session state. All mutation goes through whole-state
//! transitions under one lock, so readers only ever see complete
//! generations; a `watch` channel wakes the convergence driver after every
//! committed transition.

use std::sync::Arc;

use shared_formats::{PacketState, SatelliteId};
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, info};

use crate::logging;

/// A derived value produced by one gateway call, ready to commit.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncApply {
    Hub(String),
    Slot(SatelliteId, String),
    Message(SatelliteId, String),
}

impl SyncApply {
    fn kind(&self) -> &'static str {
        match self {
            SyncApply::Hub(_) => "hub",
            SyncApply::Slot(..) => "slot",
            SyncApply::Message(..) => "message",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    Applied,
    /// The result belongs to a generation that has been reset or superseded;
    /// it was dropped without touching state.
    Stale,
}

/// Shared handle to one session's `PacketState`.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<Mutex<PacketState>>,
    version_tx: Arc<watch::Sender<u64>>,
    call_gate: Arc<Mutex<()>>,
}

impl StateHandle {
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(Mutex::new(PacketState::new())),
            version_tx: Arc::new(version_tx),
            call_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Receiver that observes a new value after every committed transition.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    pub async fn snapshot(&self) -> PacketState {
        self.inner.lock().await.clone()
    }

    /// Seed one slot with operator-authored data; starts a new generation
    /// (hub, other slots and all messages die with the old one).
    pub async fn author(&self, sat: SatelliteId, payload: String) -> PacketState {
        let snap = {
            let mut g = self.inner.lock().await;
            g.author(sat, payload);
            g.clone()
        };
        info!(sat = %sat, generation = snap.generation, "slot authored");
        self.bump();
        snap
    }

    pub async fn reset(&self) -> PacketState {
        let snap = {
            let mut g = self.inner.lock().await;
            g.reset();
            g.clone()
        };
        info!(generation = snap.generation, "state reset");
        self.bump();
        snap
    }

    /// Commit a derived value, but only if it still belongs to the current
    /// generation. Out-of-generation results are dropped silently and
    /// counted.
    pub async fn apply(&self, generation: u64, value: SyncApply) -> ApplyResult {
        let kind = value.kind();
        let stale_gen = {
            let mut g = self.inner.lock().await;
            if g.generation != generation {
                Some(g.generation)
            } else {
                match value {
                    SyncApply::Hub(payload) => g.set_hub(payload),
                    SyncApply::Slot(sat, payload) => g.set_slot(sat, payload),
                    SyncApply::Message(sat, text) => g.set_message(sat, text),
                }
                None
            }
        };

        match stale_gen {
            Some(current) => {
                debug!(kind, for_generation = generation, current, "stale result dropped");
                logging::stale_drop();
                logging::csv::log_stale(generation, kind).await;
                ApplyResult::Stale
            }
            None => {
                debug!(kind, generation, "derived value committed");
                self.bump();
                ApplyResult::Applied
            }
        }
    }

    /// Permit for an external codec call on behalf of this state. Held across
    /// the call, it keeps at most one call in flight per session, which the
    /// convergence rule depends on.
    pub async fn call_permit(&self) -> MutexGuard<'_, ()> {
        self.call_gate.lock().await
    }

    fn bump(&self) {
        self.version_tx.send_modify(|v| *v = v.wrapping_add(1));
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_formats::SlotMessage;

    #[tokio::test]
    async fn apply_commits_for_the_current_generation() {
        let handle = StateHandle::new();
        let snap = handle.author(SatelliteId::Satellite1, "aos(HI)".into()).await;

        let res = handle
            .apply(snap.generation, SyncApply::Hub("ccsds(HI)".into()))
            .await;
        assert_eq!(res, ApplyResult::Applied);
        assert_eq!(handle.snapshot().await.hub.as_deref(), Some("ccsds(HI)"));
    }

    #[tokio::test]
    async fn apply_drops_results_from_a_dead_generation() {
        let handle = StateHandle::new();
        let snap = handle.author(SatelliteId::Satellite1, "aos(HI)".into()).await;
        handle.reset().await;

        let res = handle
            .apply(snap.generation, SyncApply::Hub("ccsds(HI)".into()))
            .await;
        assert_eq!(res, ApplyResult::Stale);
        assert!(handle.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn author_supersedes_in_flight_derivations() {
        let handle = StateHandle::new();
        let first = handle.author(SatelliteId::Satellite1, "aos(A)".into()).await;
        // Operator re-submits before the hub conversion lands.
        handle.author(SatelliteId::Satellite2, "tm(B)".into()).await;

        let res = handle
            .apply(first.generation, SyncApply::Hub("ccsds(A)".into()))
            .await;
        assert_eq!(res, ApplyResult::Stale);

        let snap = handle.snapshot().await;
        assert_eq!(snap.hub, None);
        assert_eq!(snap.slot(SatelliteId::Satellite2), Some("tm(B)"));
        assert_eq!(
            snap.message(SatelliteId::Satellite2),
            Some(&SlotMessage::Authored)
        );
    }

    #[tokio::test]
    async fn transitions_wake_subscribers() {
        let handle = StateHandle::new();
        let mut rx = handle.subscribe();
        let before = *rx.borrow_and_update();

        handle.author(SatelliteId::Satellite3, "tc(X)".into()).await;
        rx.changed().await.unwrap();
        assert_ne!(*rx.borrow(), before);
    }
}
