use crate::cluster::gossip::{ConsensusReached, GossipState, GossipUpdate};
use crate::cluster::{ClusterIdentity, ClusterTopology, Member};
use crate::core::Pid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A grain and where it runs.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Activation {
  pub identity: ClusterIdentity,
  pub pid: Pid,
}

/// Everything members say to each other.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum IntraClusterMsg {
  ActivationRequest {
    identity: ClusterIdentity,
  },
  ActivationResponse {
    pid: Option<Pid>,
  },
  ActivationTerminated {
    identity: ClusterIdentity,
    pid: Pid,
  },
  IdentityHandoverRequest {
    topology_hash: u64,
    members: Vec<Arc<Member>>,
    address: String,
  },
  IdentityHandoverResponse {
    actors: Vec<Activation>,
  },
  GossipRequest {
    member_id: String,
    state: GossipState,
  },
  /// `state` is `None` when the requester was rejected. `ack_id` is set when the response carries
  /// state the requester should acknowledge.
  GossipResponse {
    state: Option<GossipState>,
    ack_id: Option<u64>,
  },
  GossipResponseAck {
    member_id: String,
    ack_id: u64,
  },
  GrainRequest {
    payload: Vec<u8>,
  },
  GrainResponse {
    payload: Vec<u8>,
  },
}

#[derive(Clone, Debug)]
pub enum ClusterEvent {
  Topology(Arc<ClusterTopology>),
  GossipUpdate(GossipUpdate),
  Consensus(ConsensusReached),
  ActivationTerminated(Activation),
}
impl ClusterEvent {
  pub fn event_type(&self) -> ClusterEventType {
    match self {
      ClusterEvent::Topology(_) => ClusterEventType::Topology,
      ClusterEvent::GossipUpdate(_) => ClusterEventType::GossipUpdate,
      ClusterEvent::Consensus(_) => ClusterEventType::Consensus,
      ClusterEvent::ActivationTerminated(_) => ClusterEventType::ActivationTerminated,
    }
  }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ClusterEventType {
  Topology,
  GossipUpdate,
  Consensus,
  ActivationTerminated,
}
