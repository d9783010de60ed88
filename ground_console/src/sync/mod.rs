//! Convergence driver: reacts to every committed state transition with at
//! most one codec call, applies the result back (generation-fenced), and
//! lets the resulting transition re-trigger it until the state reaches its
//! fixed point.

use std::sync::Arc;

use shared_formats::{ProtocolId, SyncStep, next_step};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{CodecError, PacketCodec, canonical_payload};
use crate::state::{ApplyResult, StateHandle, SyncApply};

/// Spawn the driver task for one session.
///
/// The task waits for a state change, computes the single missing fact with
/// the highest priority, performs one gateway call for it, and commits the
/// result if its generation is still current. A failed call leaves state
/// untouched, so the driver parks until the operator supplies new input
/// rather than retrying into the same failure.
pub fn spawn_driver(state: StateHandle, codec: Arc<dyn PacketCodec>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut version = state.subscribe();
        loop {
            // Mark the version seen *before* snapshotting, so a transition
            // landing between the snapshot and the next wait still wakes us.
            let _ = version.borrow_and_update();
            let snap = state.snapshot().await;

            let Some(step) = next_step(&snap) else {
                if snap.is_converged() {
                    debug!(generation = snap.generation, "state converged");
                }
                if version.changed().await.is_err() {
                    break; // state handle gone; session over
                }
                continue;
            };

            let kind = step.kind();
            match run_step(&state, codec.as_ref(), snap.generation, step).await {
                Ok(ApplyResult::Applied) => {} // recompute immediately
                Ok(ApplyResult::Stale) => {
                    debug!(kind, "step result was stale; recomputing");
                }
                Err(e) => {
                    warn!(kind, error = %e, "convergence step failed; awaiting new input");
                    if version.changed().await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Perform one step's gateway call under the session's call permit and
/// commit the derived value.
async fn run_step(
    state: &StateHandle,
    codec: &dyn PacketCodec,
    generation: u64,
    step: SyncStep,
) -> Result<ApplyResult, CodecError> {
    let _permit = state.call_permit().await;
    let apply = match step {
        SyncStep::LeafToHub { sat, payload } => {
            let out = codec
                .convert(sat.leaf_format(), ProtocolId::HUB, &payload)
                .await?;
            SyncApply::Hub(canonical_payload(&out)?)
        }
        SyncStep::HubToLeaf { sat, hub } => {
            let out = codec
                .convert(ProtocolId::HUB, sat.leaf_format(), &hub)
                .await?;
            SyncApply::Slot(sat, canonical_payload(&out)?)
        }
        SyncStep::DecodeLeaf { sat, payload } => {
            let out = codec.decode(sat.leaf_format(), &payload).await?;
            SyncApply::Message(sat, canonical_payload(&out)?)
        }
    };
    Ok(state.apply(generation, apply).await)
}
