//! The actor runtime underneath the cluster: spawning actors, addressing them across members and
//! waiting for replies.
//!
//! ### Actors
//! An actor is any type implementing [`Actor`] for its message type. Every actor runs on its own
//! task and processes one message at a time, so actor state never needs a lock. Actors are spawned
//! on a [`Node`] under a name that is unique within that node. The name together with the node's
//! address forms a [`Pid`].
//!
//! ```ignore
//! struct Counter(u64);
//!
//! #[async_trait]
//! impl Actor<u64> for Counter {
//!   async fn recv(&mut self, _: &ActorContext<u64>, msg: u64) {
//!     self.0 += msg;
//!   }
//! }
//!
//! let node = Node::new(Socket::new(HOST, 5500), &switchboard, LogLevel::Warn);
//! let counter: LocalRef<u64> = node.spawn(Counter(0), "counter");
//! counter.send(5);
//! ```
//!
//! ### Remote Messages
//! Actors spawned with [`Node::spawn_remote`] can also receive messages from other members. Their
//! message type must be constructible from an [`Inbound`], which carries a serialized payload and,
//! for requests, a [`Responder`]. Members exchange [`serde_cbor`] encoded envelopes over a
//! [`Switchboard`]. [`Node::request`] returns a future that resolves with the decoded reply, or
//! with a [`RemotingError`] once the timeout elapses.
//!
//! ### Watching and Stopping
//! [`Node::watch`] registers interest in the termination of a local actor, [`Node::stop`] asks it
//! to stop and [`Node::poison`] does both, resolving once the actor has run its
//! [`post_stop`](Actor::post_stop).
//!
//! ### Logging
//! Every node runs a [`Logger`](crate::testkit::Logger). Modules declare a `LOG_LEVEL` constant and
//! log through the [`trace`](crate::trace), [`debug`](crate::debug), [`info`](crate::info),
//! [`warn`](crate::warn), [`error`](crate::error) and [`fatal`](crate::fatal) macros.
//!
//! ```ignore
//! const LEVEL: LogLevel = LogLevel::Debug;
//! // Not logged, the level is Debug, which is above Trace
//! trace!(LEVEL, &node, "kelp");
//! // This is logged, Warn is above Debug
//! warn!(LEVEL, &node, "sharks");
//! ```

use crate::testkit::LogLevel;

mod actor;
mod actor_ref;
mod actor_tasks_unit;
mod errors;
mod node;
mod packets;
mod registry;
mod remoting;
mod switchboard;

pub const LOG_LEVEL: LogLevel = LogLevel::Warn;

#[rustfmt::skip]
pub(in crate::core) use {
  actor::local_actor_msg_convert,
  actor_tasks_unit::unit_single,
  packets::Envelope,
  registry::ActorEntry,
  registry::Registry,
  registry::RemoteRecvr,
};

#[rustfmt::skip]
pub use {
  actor::Actor,
  actor::ActorContext,
  actor::ActorSignal,
  actor::LocalActorMsg,
  actor_ref::LocalRef,
  actor_ref::Pid,
  errors::RemotingError,
  node::Node,
  packets::Inbound,
  packets::Responder,
  registry::RegistryMsg,
  registry::Terminated,
  remoting::Host,
  remoting::Socket,
  switchboard::Switchboard,
};
