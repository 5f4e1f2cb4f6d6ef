//! Epidemic dissemination of per-member key/value state.
//!
//! Each member owns the values it sets, versioned by a member-local sequence number. The
//! [`Informer`] remembers, per peer and per origin member, the highest sequence number the peer
//! acknowledged, and only ever sends newer entries. Merging keeps the entry with the highest
//! sequence number, so replaying old state changes nothing.
//!
//! The [`GossipActor`] owns the informer and is the only code that touches gossip state, so none
//! of it is behind a lock.

mod consensus;
mod gossip_actor;
mod informer;
mod state;

pub const TOPOLOGY_KEY: &str = "topology";
pub const HEARTBEAT_KEY: &str = "heartbeat";
pub const GRACEFULLY_LEFT_KEY: &str = "left";

#[rustfmt::skip]
pub use {
  consensus::all_members_agree,
  consensus::ConsensusCheck,
  consensus::ConsensusCheckBuilder,
  consensus::ConsensusHandle,
  consensus::ConsensusReached,
  consensus::ConsensusUpdate,
  gossip_actor::GossipActor,
  gossip_actor::TOPOLOGY_CONSENSUS_ID,
  gossip_actor::GossipMsg,
  informer::Informer,
  informer::MemberStateDelta,
  informer::OffsetKey,
  state::merge_state,
  state::GossipKeyValue,
  state::GossipMemberState,
  state::GossipState,
  state::GossipUpdate,
};
