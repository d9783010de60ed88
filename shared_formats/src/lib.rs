// lib.rs — Shared packet-format model for the satellite format console

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================== Common =====================================

pub type Timestamp = DateTime<Utc>;

/// Wire tokens the codec understands, and the only ones we will hand it.
pub const SUPPORTED_TOKENS: [&str; 4] = ["aos", "pus_tm", "pus_tc", "ccsds"];

pub const SATELLITE_COUNT: usize = 3;

// =============================== Formats ====================================

/// A packet encoding known to the external codec. `Ccsds` is the hub form
/// every cross-format conversion is routed through; the other three are the
/// per-satellite leaf encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolId {
    Aos,
    PusTm,
    PusTc,
    Ccsds,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported format token: {0:?}")]
pub struct UnknownFormat(pub String);

impl ProtocolId {
    pub const HUB: ProtocolId = ProtocolId::Ccsds;

    pub fn as_token(self) -> &'static str {
        match self {
            ProtocolId::Aos => "aos",
            ProtocolId::PusTm => "pus_tm",
            ProtocolId::PusTc => "pus_tc",
            ProtocolId::Ccsds => "ccsds",
        }
    }

    pub fn is_hub(self) -> bool {
        self == Self::HUB
    }
}

impl FromStr for ProtocolId {
    type Err = UnknownFormat;

    // Tokens are case-sensitive: "AOS" is not a format.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aos" => Ok(ProtocolId::Aos),
            "pus_tm" => Ok(ProtocolId::PusTm),
            "pus_tc" => Ok(ProtocolId::PusTc),
            "ccsds" => Ok(ProtocolId::Ccsds),
            other => Err(UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

// ============================== Satellites ==================================

/// One of the three fixed satellite slots, each bound 1:1 to a leaf encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SatelliteId {
    Satellite1,
    Satellite2,
    Satellite3,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown satellite: {0:?}")]
pub struct UnknownSatellite(pub String);

impl SatelliteId {
    /// Fixed enumeration order; the convergence rule and every fan-out walk
    /// the slots in exactly this order.
    pub const ALL: [SatelliteId; SATELLITE_COUNT] = [
        SatelliteId::Satellite1,
        SatelliteId::Satellite2,
        SatelliteId::Satellite3,
    ];

    pub fn leaf_format(self) -> ProtocolId {
        match self {
            SatelliteId::Satellite1 => ProtocolId::Aos,
            SatelliteId::Satellite2 => ProtocolId::PusTm,
            SatelliteId::Satellite3 => ProtocolId::PusTc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SatelliteId::Satellite1 => "satellite1",
            SatelliteId::Satellite2 => "satellite2",
            SatelliteId::Satellite3 => "satellite3",
        }
    }

    pub fn index(self) -> usize {
        match self {
            SatelliteId::Satellite1 => 0,
            SatelliteId::Satellite2 => 1,
            SatelliteId::Satellite3 => 2,
        }
    }
}

impl FromStr for SatelliteId {
    type Err = UnknownSatellite;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "satellite1" => Ok(SatelliteId::Satellite1),
            "satellite2" => Ok(SatelliteId::Satellite2),
            "satellite3" => Ok(SatelliteId::Satellite3),
            other => Err(UnknownSatellite(other.to_string())),
        }
    }
}

impl fmt::Display for SatelliteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================= Packet state =================================

/// Message entry for one slot. An operator-authored slot carries `Authored`
/// instead of decoded text: its plaintext came straight from the operator, so
/// it is never sent back through the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotMessage {
    Authored,
    Decoded(String),
}

impl SlotMessage {
    pub fn decoded(&self) -> Option<&str> {
        match self {
            SlotMessage::Authored => None,
            SlotMessage::Decoded(text) => Some(text),
        }
    }
}

/// The unit of synchronization: one encoded payload per satellite slot, one
/// canonical hub payload, and the decoded message cache. All derived values
/// (hub, fanned-out slots, messages) belong to the generation stamped here;
/// authoring or resetting starts a new generation and drops them wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketState {
    pub slots: [Option<String>; SATELLITE_COUNT],
    pub hub: Option<String>,
    pub messages: [Option<SlotMessage>; SATELLITE_COUNT],
    pub generation: u64,
    pub authored_at: Option<Timestamp>,
}

impl PacketState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, sat: SatelliteId) -> Option<&str> {
        self.slots[sat.index()].as_deref()
    }

    pub fn message(&self, sat: SatelliteId) -> Option<&SlotMessage> {
        self.messages[sat.index()].as_ref()
    }

    /// Seed one slot with freshly authored data. This opens a new generation:
    /// the hub, every other slot, and every cached message are invalidated,
    /// since they all derive from a payload that no longer is the source of
    /// truth.
    pub fn author(&mut self, sat: SatelliteId, payload: String) {
        self.slots = Default::default();
        self.messages = Default::default();
        self.slots[sat.index()] = Some(payload);
        self.messages[sat.index()] = Some(SlotMessage::Authored);
        self.hub = None;
        self.generation += 1;
        self.authored_at = Some(Utc::now());
    }

    /// Clear everything. Also a generation change, so late conversion results
    /// for the old contents can be recognized and dropped.
    pub fn reset(&mut self) {
        self.slots = Default::default();
        self.messages = Default::default();
        self.hub = None;
        self.generation += 1;
        self.authored_at = None;
    }

    pub fn set_hub(&mut self, payload: String) {
        self.hub = Some(payload);
    }

    pub fn set_slot(&mut self, sat: SatelliteId, payload: String) {
        self.slots[sat.index()] = Some(payload);
    }

    pub fn set_message(&mut self, sat: SatelliteId, text: String) {
        self.messages[sat.index()] = Some(SlotMessage::Decoded(text));
    }

    /// No payloads and no messages anywhere (the state a fresh session or a
    /// reset leaves behind, whatever the generation counter says).
    pub fn is_empty(&self) -> bool {
        self.hub.is_none()
            && self.slots.iter().all(Option::is_none)
            && self.messages.iter().all(Option::is_none)
    }

    /// At the fixed point nothing is missing: hub present, every slot
    /// populated, every slot's message entry filled (decoded or authored).
    pub fn is_converged(&self) -> bool {
        self.hub.is_some()
            && self.slots.iter().all(Option::is_some)
            && self.messages.iter().all(Option::is_some)
    }
}

// ============================ Convergence rule ==============================

/// The single outward codec call that moves a state one step closer to its
/// fixed point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStep {
    /// No canonical form yet: convert one leaf payload to the hub format.
    LeafToHub { sat: SatelliteId, payload: String },
    /// Fan the hub value out into an empty slot.
    HubToLeaf { sat: SatelliteId, hub: String },
    /// Recover the human-readable message from a populated slot.
    DecodeLeaf { sat: SatelliteId, payload: String },
}

impl SyncStep {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncStep::LeafToHub { .. } => "leaf_to_hub",
            SyncStep::HubToLeaf { .. } => "hub_to_leaf",
            SyncStep::DecodeLeaf { .. } => "decode_leaf",
        }
    }
}

/// Decide the next codec call for `state`, or `None` at a fixed point.
///
/// Priority is strict: a hub value must exist before any fan-out, because
/// fan-out converts *from* the hub; with the hub in place, slots are walked in
/// `SatelliteId::ALL` order and the first missing fact (empty slot, then
/// missing message) wins. When several slots are populated and no hub exists
/// yet (bulk import), the first populated slot in enumeration order defines
/// the generation.
///
/// Each successful step resolves exactly one missing fact and never
/// reintroduces one, so iterating this rule terminates in at most
/// `1 + 2 * SATELLITE_COUNT` rounds.
pub fn next_step(state: &PacketState) -> Option<SyncStep> {
    let Some(hub) = state.hub.as_deref() else {
        return SatelliteId::ALL.iter().find_map(|&sat| {
            state.slot(sat).map(|payload| SyncStep::LeafToHub {
                sat,
                payload: payload.to_owned(),
            })
        });
    };

    for sat in SatelliteId::ALL {
        match state.slot(sat) {
            None => {
                return Some(SyncStep::HubToLeaf {
                    sat,
                    hub: hub.to_owned(),
                });
            }
            Some(payload) if state.message(sat).is_none() => {
                return Some(SyncStep::DecodeLeaf {
                    sat,
                    payload: payload.to_owned(),
                });
            }
            Some(_) => {}
        }
    }

    None
}

// ================================ Tests =====================================
