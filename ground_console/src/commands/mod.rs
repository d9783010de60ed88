//! Operator commands. The only producer of *new* raw data: encoding a
//! human-readable message seeds exactly one satellite slot as a new
//! generation; everything else the system derives on its own.

use shared_formats::{PacketState, SatelliteId};
use tracing::info;

use crate::codec::{CodecError, PacketCodec, canonical_payload};
use crate::state::StateHandle;

/// Encode `message` in `sat`'s leaf format and seed that slot. The encode
/// call happens before any state is touched; only a usable payload opens the
/// new generation.
pub async fn encode_input(
    state: &StateHandle,
    codec: &dyn PacketCodec,
    sat: SatelliteId,
    message: &str,
) -> Result<PacketState, CodecError> {
    let payload = {
        let _permit = state.call_permit().await;
        let out = codec.encode(sat.leaf_format(), message).await?;
        canonical_payload(&out)?
    };

    let snap = state.author(sat, payload).await;
    info!(sat = %sat, generation = snap.generation, "operator message encoded");
    Ok(snap)
}

/// Drop the whole session state. Safe at any time; conversion results still
/// in flight for the old generation are fenced off by the generation bump.
pub async fn reset(state: &StateHandle) -> PacketState {
    state.reset().await
}
