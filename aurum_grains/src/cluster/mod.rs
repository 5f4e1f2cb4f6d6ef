//! Placement of virtual actors across the members of a cluster, and the gossip that keeps
//! members informed about each other.
//!
//! ### Ownership
//! Every [`ClusterIdentity`] has exactly one owning member under a given [`ClusterTopology`],
//! computed independently by every member with [`Rendezvous`] hashing. Changing membership only
//! moves the identities owned by the members that joined or left. The owner runs the identity
//! actor that answers "where does this grain live", and activates the grain through a placement
//! actor when nobody hosts it yet.
//!
//! ### Handover
//! When the topology changes, each identity actor clears its table and asks the placement actor of
//! every member for the activations it now owns. Placement actors answer from the requester's
//! topology and never stop grains while doing so, so the previous owner keeps serving its cached
//! entries until it learns about the new topology. Lookups during that window are eventually
//! consistent, not linearizable.
//!
//! ### Gossip
//! Members push key/value state to a few random peers every round. Each member only sends what a
//! peer has not acknowledged yet, so state spreads epidemically without a coordinator. Consensus
//! checks watch the gossip state and fire when all members agree on a value.
//!
//! ### Using [`cluster`](crate::cluster)
//! Start a [`Cluster`] on a [`Node`](crate::core::Node), register the grain [`Kind`]s this member
//! hosts, and feed it the member list whenever membership changes.
//!
//! ```ignore
//! let node = Node::new(Socket::new(HOST, 5500), &switchboard, LogLevel::Warn);
//! let me = Member::new("m1", node.socket().clone(), vec!["user".to_string()]);
//! let cluster = Cluster::start(&node, me.clone(), ClusterConfig::default(), vec![
//!   Kind::new("user", |_: &ClusterIdentity| UserGrain::default()),
//! ]);
//! cluster.update_topology(vec![me, other]);
//! let pid = cluster.get(&ClusterIdentity::new("user-42", "user")).await;
//! ```

use crate::testkit::LogLevel;

mod cluster;
mod config;
mod errors;
mod event_stream;
pub mod gossip;
mod identity;
mod kind;
mod member;
mod member_strategy;
mod messages;
pub mod partition;
mod pid_cache;
mod rendezvous;

pub const LOG_LEVEL: LogLevel = LogLevel::Warn;

pub const GOSSIP_ACTOR_NAME: &str = "gossip";
pub const IDENTITY_ACTOR_NAME: &str = "partition-identity";
pub const PLACEMENT_ACTOR_NAME: &str = "partition-activator";
pub const EVENT_STREAM_NAME: &str = "cluster-events";

#[rustfmt::skip]
pub use {
  cluster::Cluster,
  config::ClusterConfig,
  config::PlacementStrategy,
  errors::SpawnError,
  event_stream::EventStream,
  event_stream::EventStreamMsg,
  event_stream::EventStreamRef,
  event_stream::Subscription,
  identity::ClusterIdentity,
  kind::GrainMsg,
  kind::GrainRequest,
  kind::Kind,
  member::ClusterTopology,
  member::Member,
  member::MemberList,
  member::topology_hash,
  member_strategy::MemberStatus,
  member_strategy::MemberStatusValue,
  member_strategy::MemberStrategy,
  member_strategy::WeightedMemberStatusValue,
  member_strategy::WeightedMemberStrategy,
  member_strategy::WeightedRoundRobin,
  messages::Activation,
  messages::ClusterEvent,
  messages::ClusterEventType,
  messages::IntraClusterMsg,
  pid_cache::PidCache,
  rendezvous::get_owner,
  rendezvous::Rendezvous,
};
