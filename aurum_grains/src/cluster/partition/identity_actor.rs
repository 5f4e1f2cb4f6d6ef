use crate::cluster::{
  Activation, ClusterConfig, ClusterEvent, ClusterIdentity, ClusterTopology, EventStreamRef,
  IntraClusterMsg, MemberList, PlacementStrategy, Rendezvous, LOG_LEVEL, PLACEMENT_ACTOR_NAME,
};
use crate::core::{Actor, ActorContext, Inbound, Pid, Responder};
use crate::{debug, info, trace, warn};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::oneshot;

pub enum IdentityMsg {
  Remote(Inbound),
  Topology(Arc<ClusterTopology>),
  SpawnCompleted {
    identity: ClusterIdentity,
    pid: Option<Pid>,
  },
  Lookup(oneshot::Sender<BTreeMap<String, Activation>>),
}
impl From<Inbound> for IdentityMsg {
  fn from(inbound: Inbound) -> Self {
    IdentityMsg::Remote(inbound)
  }
}

/// Which member owns which identity, and where the owned grains run.
#[derive(Default)]
pub struct OwnershipTable {
  topology_hash: Option<u64>,
  event_id: u64,
  rendezvous: Rendezvous,
  lookup: BTreeMap<String, Activation>,
}
impl OwnershipTable {
  pub fn new() -> OwnershipTable {
    OwnershipTable::default()
  }

  /// Switches to `topology` and clears the lookup. `false` if the topology is the current one or
  /// older, in which case nothing changes.
  pub fn apply_topology(&mut self, topology: &ClusterTopology) -> bool {
    if self.topology_hash == Some(topology.topology_hash) || topology.event_id < self.event_id {
      return false;
    }
    self.topology_hash = Some(topology.topology_hash);
    self.event_id = topology.event_id;
    self.rendezvous.update_members(&topology.members);
    self.lookup.clear();
    true
  }

  pub fn topology_hash(&self) -> Option<u64> {
    self.topology_hash
  }

  pub fn has_members(&self) -> bool {
    !self.rendezvous.is_empty()
  }

  pub fn owner(&self, identity: &ClusterIdentity) -> Option<String> {
    self.rendezvous.get_by_identity(identity).map(|m| m.address())
  }

  pub fn get(&self, identity: &ClusterIdentity) -> Option<&Pid> {
    self.lookup.get(&identity.as_key()).map(|a| &a.pid)
  }

  pub fn insert(&mut self, activation: Activation) {
    self.lookup.insert(activation.identity.as_key(), activation);
  }

  /// Records handed over activations. An entry is only replaced if the new one lives on another
  /// member. Returns how many entries changed.
  pub fn take_ownership(&mut self, actors: Vec<Activation>) -> usize {
    let mut taken = 0;
    for activation in actors {
      let key = activation.identity.as_key();
      let same_member = self
        .lookup
        .get(&key)
        .map_or(false, |old| old.pid.address == activation.pid.address);
      if !same_member {
        self.lookup.insert(key, activation);
        taken += 1;
      }
    }
    taken
  }

  /// Removes the entry for `identity` if it still points at `pid`.
  pub fn remove(&mut self, identity: &ClusterIdentity, pid: &Pid) -> bool {
    let key = identity.as_key();
    match self.lookup.get(&key) {
      Some(activation) if activation.pid == *pid => {
        self.lookup.remove(&key);
        true
      }
      _ => false,
    }
  }

  pub fn snapshot(&self) -> BTreeMap<String, Activation> {
    self.lookup.clone()
  }
}

/// Callers waiting on activations that have not completed yet, by identity key.
struct InFlight<W> {
  waiting: HashMap<String, Vec<W>>,
}
impl<W> InFlight<W> {
  fn new() -> InFlight<W> {
    InFlight {
      waiting: HashMap::new(),
    }
  }

  fn is_running(&self, key: &str) -> bool {
    self.waiting.contains_key(key)
  }

  /// Adds `waiter` to the running activation of `key`, or hands it back if there is none.
  fn join(&mut self, key: &str, waiter: W) -> Result<(), W> {
    match self.waiting.get_mut(key) {
      Some(waiters) => {
        waiters.push(waiter);
        Ok(())
      }
      None => Err(waiter),
    }
  }

  fn start(&mut self, key: String, waiter: W) {
    self.waiting.insert(key, vec![waiter]);
  }

  fn complete(&mut self, key: &str) -> Vec<W> {
    self.waiting.remove(key).unwrap_or_default()
  }

  fn drain(&mut self) -> Vec<W> {
    self.waiting.drain().flat_map(|(_, waiters)| waiters).collect()
  }
}

#[derive(Debug, PartialEq)]
enum Purge {
  Removed,
  Stale,
  Activating,
}

/// Drops `identity` from `table` when `pid` is still its grain. While an activation of the same
/// identity is running the report is ignored, since the table entry about to be written belongs
/// to the new grain.
fn purge_terminated<W>(
  table: &mut OwnershipTable,
  in_flight: &InFlight<W>,
  identity: &ClusterIdentity,
  pid: &Pid,
) -> Purge {
  if in_flight.is_running(&identity.as_key()) {
    Purge::Activating
  } else if table.remove(identity, pid) {
    Purge::Removed
  } else {
    Purge::Stale
  }
}

/// Answers activation requests for the identities this member owns. Concurrent requests for the
/// same identity share one activation attempt.
pub struct IdentityActor {
  config: ClusterConfig,
  events: EventStreamRef,
  table: OwnershipTable,
  members: MemberList,
  in_flight: InFlight<Responder>,
}
impl IdentityActor {
  pub fn new(config: ClusterConfig, events: EventStreamRef) -> IdentityActor {
    IdentityActor {
      config: config,
      events: events,
      table: OwnershipTable::new(),
      members: MemberList::new(),
      in_flight: InFlight::new(),
    }
  }

  fn respond(ctx: &ActorContext<IdentityMsg>, responder: Responder, pid: Option<Pid>) {
    if let Err(e) = responder.respond(&IntraClusterMsg::ActivationResponse { pid: pid }) {
      debug!(LOG_LEVEL, &ctx.node, format!("Could not answer activation request: {}", e));
    }
  }

  fn activation_request(
    &mut self,
    ctx: &ActorContext<IdentityMsg>,
    identity: ClusterIdentity,
    responder: Option<Responder>,
  ) {
    let responder = match responder {
      Some(r) => r,
      None => {
        warn!(
          LOG_LEVEL,
          &ctx.node,
          format!("Activation of {} sent without a reply address", identity)
        );
        return;
      }
    };
    if !self.table.has_members() {
      debug!(LOG_LEVEL, &ctx.node, format!("No members to activate {} on", identity));
      Self::respond(ctx, responder, None);
      return;
    }
    if self.table.owner(&identity).as_deref() != Some(ctx.node.address()) {
      debug!(LOG_LEVEL, &ctx.node, format!("Not the owner of {}", identity));
      Self::respond(ctx, responder, None);
      return;
    }
    if let Some(pid) = self.table.get(&identity) {
      Self::respond(ctx, responder, Some(pid.clone()));
      return;
    }
    let key = identity.as_key();
    let responder = match self.in_flight.join(&key, responder) {
      Ok(()) => {
        trace!(LOG_LEVEL, &ctx.node, format!("Joining activation of {}", identity));
        return;
      }
      Err(responder) => responder,
    };
    let activator = match self.config.placement {
      PlacementStrategy::Owner => Some(ctx.node.address().to_string()),
      PlacementStrategy::RoundRobin => self.members.get_activator(&identity.kind),
    };
    let activator = match activator {
      Some(a) => a,
      None => {
        warn!(LOG_LEVEL, &ctx.node, format!("No member hosts kind {}", identity.kind));
        Self::respond(ctx, responder, None);
        return;
      }
    };
    self.in_flight.start(key, responder);
    debug!(LOG_LEVEL, &ctx.node, format!("Activating {} on {}", identity, activator));
    let node = ctx.node.clone();
    let recvr = ctx.local_interface::<IdentityMsg>();
    let timeout = self.config.request_timeout;
    ctx.node.rt().spawn(async move {
      let placement = Pid::new(activator, PLACEMENT_ACTOR_NAME);
      let request = IntraClusterMsg::ActivationRequest {
        identity: identity.clone(),
      };
      let pid = match node.request(&placement, &request, timeout).await {
        Ok(IntraClusterMsg::ActivationResponse { pid }) => pid,
        _ => None,
      };
      recvr.send(IdentityMsg::SpawnCompleted {
        identity: identity,
        pid: pid,
      })
    });
  }

  fn spawn_completed(
    &mut self,
    ctx: &ActorContext<IdentityMsg>,
    identity: ClusterIdentity,
    pid: Option<Pid>,
  ) {
    let waiters = self.in_flight.complete(&identity.as_key());
    // A handover may have filled the entry while the activation was running.
    let pid = match self.table.get(&identity) {
      Some(existing) => Some(existing.clone()),
      None => {
        let owner = self.table.owner(&identity);
        if let (Some(pid), Some(owner)) = (&pid, owner) {
          if owner == ctx.node.address() {
            self.table.insert(Activation {
              identity: identity.clone(),
              pid: pid.clone(),
            });
          }
        }
        pid
      }
    };
    if pid.is_none() {
      info!(LOG_LEVEL, &ctx.node, format!("Activation of {} failed", identity));
    }
    for responder in waiters {
      Self::respond(ctx, responder, pid.clone());
    }
  }

  fn activation_terminated(
    &mut self,
    ctx: &ActorContext<IdentityMsg>,
    identity: ClusterIdentity,
    pid: Pid,
  ) {
    match purge_terminated(&mut self.table, &self.in_flight, &identity, &pid) {
      Purge::Activating => debug!(
        LOG_LEVEL,
        &ctx.node,
        format!("Ignoring termination of {} while it is being activated", identity)
      ),
      Purge::Removed => trace!(LOG_LEVEL, &ctx.node, format!("Removed {} at {}", identity, pid)),
      Purge::Stale => {}
    }
    self.events.publish(ClusterEvent::ActivationTerminated(Activation {
      identity: identity,
      pid: pid,
    }));
  }

  async fn topology(&mut self, ctx: &ActorContext<IdentityMsg>, topology: &ClusterTopology) {
    self
      .members
      .update_cluster_topology(topology.members.iter().map(|m| (**m).clone()).collect());
    if !self.table.apply_topology(topology) {
      trace!(
        LOG_LEVEL,
        &ctx.node,
        format!("Skipping topology {}", topology.topology_hash)
      );
      return;
    }
    let request = IntraClusterMsg::IdentityHandoverRequest {
      topology_hash: topology.topology_hash,
      members: topology.members.clone(),
      address: ctx.node.address().to_string(),
    };
    let node = &ctx.node;
    let request = &request;
    let timeout = self.config.handover_timeout;
    let replies = join_all(topology.members.iter().map(|member| async move {
      let placement = Pid::new(member.address(), PLACEMENT_ACTOR_NAME);
      let reply = node
        .request::<IntraClusterMsg, IntraClusterMsg>(&placement, request, timeout)
        .await;
      (placement, reply)
    }))
    .await;
    let mut taken = 0;
    for (placement, reply) in replies {
      match reply {
        Ok(IntraClusterMsg::IdentityHandoverResponse { actors }) => {
          taken += self.table.take_ownership(actors);
        }
        Ok(other) => {
          warn!(
            LOG_LEVEL,
            &ctx.node,
            format!("Invalid handover response from {}: {:?}", placement, other)
          );
        }
        Err(e) => {
          info!(LOG_LEVEL, &ctx.node, format!("No handover from {}: {}", placement, e));
        }
      }
    }
    info!(
      LOG_LEVEL,
      &ctx.node,
      format!(
        "Topology {} with {} members, took ownership of {} activations",
        topology.topology_hash,
        topology.members.len(),
        taken
      )
    );
  }
}
#[async_trait]
impl Actor<IdentityMsg> for IdentityActor {
  async fn recv(&mut self, ctx: &ActorContext<IdentityMsg>, msg: IdentityMsg) {
    match msg {
      IdentityMsg::Remote(inbound) => {
        let sender = inbound.sender().to_string();
        match inbound.into_parts::<IntraClusterMsg>() {
          Ok((IntraClusterMsg::ActivationRequest { identity }, responder)) => {
            self.activation_request(ctx, identity, responder);
          }
          Ok((IntraClusterMsg::ActivationTerminated { identity, pid }, _)) => {
            self.activation_terminated(ctx, identity, pid);
          }
          Ok((other, _)) => {
            warn!(
              LOG_LEVEL,
              &ctx.node,
              format!("Identity actor got unexpected message from {}: {:?}", sender, other)
            );
          }
          Err(e) => {
            warn!(LOG_LEVEL, &ctx.node, format!("Undecodable message from {}: {}", sender, e));
          }
        }
      }
      IdentityMsg::Topology(topology) => self.topology(ctx, &topology).await,
      IdentityMsg::SpawnCompleted { identity, pid } => {
        self.spawn_completed(ctx, identity, pid);
      }
      IdentityMsg::Lookup(tx) => {
        let _ = tx.send(self.table.snapshot());
      }
    }
  }

  async fn post_stop(&mut self, ctx: &ActorContext<IdentityMsg>) {
    for responder in self.in_flight.drain() {
      Self::respond(ctx, responder, None);
    }
  }
}

#[cfg(test)]
fn topology_of(ids: &[(&str, u16)], event_id: u64) -> ClusterTopology {
  use crate::cluster::{topology_hash, Member};
  use crate::core::{Host, Socket};
  let members: Vec<Arc<Member>> = ids
    .iter()
    .map(|(id, port)| {
      Arc::new(Member::new(
        *id,
        Socket::new(Host::from("127.0.0.1"), *port),
        vec!["user".to_string()],
      ))
    })
    .collect();
  ClusterTopology {
    topology_hash: topology_hash(members.iter().map(|m| &**m)),
    members: members,
    joined: vec![],
    left: vec![],
    event_id: event_id,
  }
}

#[cfg(test)]
fn activation(identity: &str, address: &str) -> Activation {
  Activation {
    identity: ClusterIdentity::new(identity, "user"),
    pid: Pid::new(address, format!("{}/{}", PLACEMENT_ACTOR_NAME, identity)),
  }
}

#[test]
fn test_same_topology_is_applied_once() {
  let mut table = OwnershipTable::new();
  let topology = topology_of(&[("a", 7000), ("b", 7001)], 1);
  assert!(table.apply_topology(&topology));
  table.take_ownership(vec![
    activation("x", "127.0.0.1:7000"),
    activation("y", "127.0.0.1:7001"),
  ]);
  let before = table.snapshot();
  assert!(!table.apply_topology(&topology));
  assert_eq!(table.snapshot(), before);
  assert_eq!(table.topology_hash(), Some(topology.topology_hash));

  let older = topology_of(&[("a", 7000)], 0);
  assert!(!table.apply_topology(&older));
  assert_eq!(table.snapshot(), before);
}

#[test]
fn test_new_topology_clears_lookup() {
  let mut table = OwnershipTable::new();
  assert!(!table.has_members());
  table.apply_topology(&topology_of(&[("a", 7000), ("b", 7001)], 1));
  table.take_ownership(vec![activation("x", "127.0.0.1:7000")]);
  assert!(table.apply_topology(&topology_of(&[("a", 7000)], 2)));
  assert!(table.snapshot().is_empty());
  assert!(table.has_members());
  assert_eq!(
    table.owner(&ClusterIdentity::new("x", "user")),
    Some("127.0.0.1:7000".to_string())
  );
  assert_eq!(table.owner(&ClusterIdentity::new("x", "room")), None);
}

#[test]
fn test_take_ownership_keeps_same_member_entries() {
  let mut table = OwnershipTable::new();
  let first = activation("x", "127.0.0.1:7000");
  assert_eq!(table.take_ownership(vec![first.clone()]), 1);
  let mut same_member = first.clone();
  same_member.pid.id = "elsewhere".to_string();
  assert_eq!(table.take_ownership(vec![same_member]), 0);
  assert_eq!(table.get(&first.identity), Some(&first.pid));

  let moved = activation("x", "127.0.0.1:7001");
  assert_eq!(table.take_ownership(vec![moved.clone()]), 1);
  assert_eq!(table.get(&first.identity), Some(&moved.pid));
}

#[test]
fn test_remove_requires_matching_pid() {
  let mut table = OwnershipTable::new();
  let current = activation("x", "127.0.0.1:7001");
  table.insert(current.clone());
  let stale = activation("x", "127.0.0.1:7000");
  assert!(!table.remove(&stale.identity, &stale.pid));
  assert!(table.get(&current.identity).is_some());
  assert!(table.remove(&current.identity, &current.pid));
  assert!(table.get(&current.identity).is_none());
}

#[test]
fn test_termination_ignored_while_activating() {
  let mut table = OwnershipTable::new();
  let mut in_flight: InFlight<u32> = InFlight::new();
  let old = activation("x", "127.0.0.1:7000");
  table.insert(old.clone());

  in_flight.start(old.identity.as_key(), 1);
  assert_eq!(in_flight.join(&old.identity.as_key(), 2), Ok(()));
  assert_eq!(in_flight.join("other", 3), Err(3));
  assert_eq!(
    purge_terminated(&mut table, &in_flight, &old.identity, &old.pid),
    Purge::Activating
  );
  assert_eq!(table.get(&old.identity), Some(&old.pid));

  assert_eq!(in_flight.complete(&old.identity.as_key()), vec![1, 2]);
  assert!(!in_flight.is_running(&old.identity.as_key()));
  assert_eq!(
    purge_terminated(&mut table, &in_flight, &old.identity, &old.pid),
    Purge::Removed
  );
  assert_eq!(
    purge_terminated(&mut table, &in_flight, &old.identity, &old.pid),
    Purge::Stale
  );
  assert!(table.get(&old.identity).is_none());
}
