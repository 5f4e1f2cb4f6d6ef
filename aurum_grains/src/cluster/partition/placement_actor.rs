use crate::cluster::{
  Activation, ClusterConfig, ClusterIdentity, ClusterTopology, GrainMsg, IntraClusterMsg, Kind,
  Member, Rendezvous, SpawnError, IDENTITY_ACTOR_NAME, LOG_LEVEL, PLACEMENT_ACTOR_NAME,
};
use crate::core::{Actor, ActorContext, Inbound, Pid, Responder, Terminated};
use crate::{debug, error, trace, warn};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

pub enum PlacementMsg {
  Remote(Inbound),
  Topology(Arc<ClusterTopology>),
  Terminated(Terminated),
  Activations(oneshot::Sender<Vec<Activation>>),
}
impl From<Inbound> for PlacementMsg {
  fn from(inbound: Inbound) -> Self {
    PlacementMsg::Remote(inbound)
  }
}
impl From<Terminated> for PlacementMsg {
  fn from(terminated: Terminated) -> Self {
    PlacementMsg::Terminated(terminated)
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrainMeta {
  pub identity: ClusterIdentity,
  pub pid: Pid,
}

/// Spawns and watches the grains hosted on this member. At most one grain runs per identity.
pub struct PlacementActor {
  config: ClusterConfig,
  kinds: HashMap<String, Kind>,
  actors: BTreeMap<String, GrainMeta>,
  members: Vec<Arc<Member>>,
}
impl PlacementActor {
  pub fn new(config: ClusterConfig, kinds: Vec<Kind>) -> PlacementActor {
    PlacementActor {
      config: config,
      kinds: kinds.into_iter().map(|k| (k.name().to_string(), k)).collect(),
      actors: BTreeMap::new(),
      members: Vec::new(),
    }
  }

  fn activate(
    &mut self,
    ctx: &ActorContext<PlacementMsg>,
    identity: ClusterIdentity,
  ) -> Result<Pid, SpawnError> {
    let key = identity.as_key();
    if let Some(meta) = self.actors.get(&key) {
      return Ok(meta.pid.clone());
    }
    let kind = self
      .kinds
      .get(&identity.kind)
      .ok_or_else(|| SpawnError::UnknownKind(identity.kind.clone()))?;
    // Unique per incarnation.
    let name = format!("{}/{}/{}", PLACEMENT_ACTOR_NAME, key, Uuid::new_v4());
    let grain = kind.spawn(&ctx.node, &identity, name.clone());
    grain.send(GrainMsg::Init(identity.clone()));
    let pid = Pid::new(ctx.node.address(), name);
    ctx.node.watch(&pid, ctx.local_interface::<Terminated>());
    debug!(LOG_LEVEL, &ctx.node, format!("Spawned {} as {}", identity, pid));
    self.actors.insert(
      key,
      GrainMeta {
        identity: identity,
        pid: pid.clone(),
      },
    );
    Ok(pid)
  }

  /// The grains `address` owns when the cluster consists of `members`.
  fn handover(&self, members: &[Arc<Member>], address: &str) -> Vec<Activation> {
    let rdv = Rendezvous::from_members(members);
    self
      .actors
      .values()
      .filter(|meta| {
        rdv
          .get_by_identity(&meta.identity)
          .map_or(false, |owner| owner.address() == address)
      })
      .map(|meta| Activation {
        identity: meta.identity.clone(),
        pid: meta.pid.clone(),
      })
      .collect()
  }

  fn broadcast_terminated(&self, ctx: &ActorContext<PlacementMsg>, meta: &GrainMeta) {
    let msg = IntraClusterMsg::ActivationTerminated {
      identity: meta.identity.clone(),
      pid: meta.pid.clone(),
    };
    let mut addresses: Vec<String> = self.members.iter().map(|m| m.address()).collect();
    addresses.push(ctx.node.address().to_string());
    addresses.sort();
    addresses.dedup();
    for address in addresses {
      let identity_actor = Pid::new(address, IDENTITY_ACTOR_NAME);
      if let Err(e) = ctx.node.send(&identity_actor, &msg) {
        trace!(
          LOG_LEVEL,
          &ctx.node,
          format!("Could not tell {} about {}: {}", identity_actor, meta.identity, e)
        );
      }
    }
  }

  fn respond(
    ctx: &ActorContext<PlacementMsg>,
    responder: Option<Responder>,
    msg: IntraClusterMsg,
  ) {
    match responder {
      Some(responder) => {
        if let Err(e) = responder.respond(&msg) {
          debug!(LOG_LEVEL, &ctx.node, format!("Could not respond: {}", e));
        }
      }
      None => {
        warn!(LOG_LEVEL, &ctx.node, "Placement request sent without a reply address");
      }
    }
  }

  fn remote(&mut self, ctx: &ActorContext<PlacementMsg>, inbound: Inbound) {
    let sender = inbound.sender().to_string();
    let (msg, responder) = match inbound.into_parts::<IntraClusterMsg>() {
      Ok(parts) => parts,
      Err(e) => {
        warn!(LOG_LEVEL, &ctx.node, format!("Undecodable message from {}: {}", sender, e));
        return;
      }
    };
    match msg {
      IntraClusterMsg::ActivationRequest { identity } => {
        let pid = match self.activate(ctx, identity.clone()) {
          Ok(pid) => Some(pid),
          Err(e) => {
            error!(LOG_LEVEL, &ctx.node, format!("Cannot activate {}: {}", identity, e));
            None
          }
        };
        Self::respond(ctx, responder, IntraClusterMsg::ActivationResponse { pid: pid });
      }
      IntraClusterMsg::IdentityHandoverRequest {
        topology_hash,
        members,
        address,
      } => {
        let actors = self.handover(&members, &address);
        trace!(
          LOG_LEVEL,
          &ctx.node,
          format!(
            "Handing {} activations to {} for topology {}",
            actors.len(),
            address,
            topology_hash
          )
        );
        Self::respond(
          ctx,
          responder,
          IntraClusterMsg::IdentityHandoverResponse { actors: actors },
        );
      }
      other => {
        warn!(
          LOG_LEVEL,
          &ctx.node,
          format!("Placement actor got unexpected message from {}: {:?}", sender, other)
        );
      }
    }
  }
}
#[async_trait]
impl Actor<PlacementMsg> for PlacementActor {
  async fn recv(&mut self, ctx: &ActorContext<PlacementMsg>, msg: PlacementMsg) {
    match msg {
      PlacementMsg::Remote(inbound) => self.remote(ctx, inbound),
      PlacementMsg::Topology(topology) => {
        self.members = topology.members.clone();
      }
      PlacementMsg::Terminated(Terminated(pid)) => {
        let key = self
          .actors
          .iter()
          .find(|(_, meta)| meta.pid == pid)
          .map(|(key, _)| key.clone());
        if let Some(meta) = key.and_then(|key| self.actors.remove(&key)) {
          debug!(LOG_LEVEL, &ctx.node, format!("{} terminated", meta.identity));
          self.broadcast_terminated(ctx, &meta);
        }
      }
      PlacementMsg::Activations(tx) => {
        let activations = self
          .actors
          .values()
          .map(|meta| Activation {
            identity: meta.identity.clone(),
            pid: meta.pid.clone(),
          })
          .collect();
        let _ = tx.send(activations);
      }
    }
  }

  async fn post_stop(&mut self, ctx: &ActorContext<PlacementMsg>) {
    let actors = std::mem::take(&mut self.actors);
    let node = &ctx.node;
    let poisoned = join_all(actors.values().map(|meta| node.poison(&meta.pid)));
    if tokio::time::timeout(self.config.shutdown_timeout, poisoned)
      .await
      .is_err()
    {
      warn!(LOG_LEVEL, &ctx.node, "Timed out stopping grains");
    }
    for meta in actors.values() {
      self.broadcast_terminated(ctx, meta);
    }
  }
}

#[cfg(test)]
fn placement_with(identities: &[&str]) -> PlacementActor {
  let mut actor = PlacementActor::new(ClusterConfig::default(), vec![]);
  for (i, identity) in identities.iter().enumerate() {
    let identity = ClusterIdentity::new(*identity, "user");
    actor.actors.insert(
      identity.as_key(),
      GrainMeta {
        pid: Pid::new("127.0.0.1:7000", format!("grain-{}", i)),
        identity: identity,
      },
    );
  }
  actor
}

#[test]
fn test_handover_uses_requester_topology() {
  use crate::core::{Host, Socket};
  let member = |id: &str, port: u16| {
    Arc::new(Member::new(
      id,
      Socket::new(Host::from("127.0.0.1"), port),
      vec!["user".to_string()],
    ))
  };
  let a = member("a", 7000);
  let b = member("b", 7001);
  let ids: Vec<String> = (0..200).map(|i| format!("id-{}", i)).collect();
  let refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
  let actor = placement_with(&refs);

  let both = vec![a.clone(), b.clone()];
  let to_a = actor.handover(&both, &a.address());
  let to_b = actor.handover(&both, &b.address());
  assert_eq!(to_a.len() + to_b.len(), ids.len());
  assert!(!to_a.is_empty() && !to_b.is_empty());
  let rdv = Rendezvous::from_members(&both);
  for activation in &to_b {
    let owner = rdv.get_by_identity(&activation.identity).unwrap();
    assert_eq!(owner.id, "b");
  }

  // Under a topology without `a`, everything belongs to `b`.
  assert_eq!(actor.handover(&[b.clone()], &b.address()).len(), ids.len());
  assert!(actor.handover(&[b.clone()], &a.address()).is_empty());
}
