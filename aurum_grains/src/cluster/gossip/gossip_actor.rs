use crate::cluster::gossip::state::now_ms;
use crate::cluster::gossip::{
  ConsensusCheck, ConsensusCheckBuilder, ConsensusHandle, ConsensusUpdate, GossipKeyValue,
  GossipState, Informer, MemberStateDelta, OffsetKey, GRACEFULLY_LEFT_KEY, HEARTBEAT_KEY,
  TOPOLOGY_KEY,
};
use crate::cluster::{
  ClusterConfig, ClusterEvent, EventStreamRef, IntraClusterMsg, Member, GOSSIP_ACTOR_NAME,
  LOG_LEVEL,
};
use crate::core::{Actor, ActorContext, Inbound, Pid, RemotingError, Responder};
use crate::{debug, info, trace, warn};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const TOPOLOGY_CONSENSUS_ID: &str = "topology";
const MAX_PENDING_ACKS: usize = 16;

pub enum GossipMsg {
  Remote(Inbound),
  Event(ClusterEvent),
  SetState(String, Vec<u8>),
  GetState(String, oneshot::Sender<HashMap<String, GossipKeyValue>>),
  AddConsensusCheck(ConsensusCheck),
  RemoveConsensusCheck(String),
  SendGossipStateRequest,
  GossipSent {
    member_id: String,
    target: Pid,
    offsets: HashMap<OffsetKey, i64>,
    result: Result<IntraClusterMsg, RemotingError>,
  },
  /// Announces this member is leaving and pushes that out before replying.
  Leave(oneshot::Sender<()>),
}
impl From<Inbound> for GossipMsg {
  fn from(inbound: Inbound) -> Self {
    GossipMsg::Remote(inbound)
  }
}
impl From<ClusterEvent> for GossipMsg {
  fn from(event: ClusterEvent) -> Self {
    GossipMsg::Event(event)
  }
}

/// Offsets sent to each peer, held until the peer acknowledges the response that carried them.
/// Dropping an entry only means its state is sent again.
#[derive(Default)]
struct PendingAcks {
  next_id: u64,
  by_member: HashMap<String, BTreeMap<u64, HashMap<OffsetKey, i64>>>,
}
impl PendingAcks {
  fn insert(&mut self, member_id: &str, offsets: HashMap<OffsetKey, i64>) -> u64 {
    self.next_id += 1;
    let pending = self.by_member.entry(member_id.to_string()).or_default();
    pending.insert(self.next_id, offsets);
    while pending.len() > MAX_PENDING_ACKS {
      pending.pop_first();
    }
    self.next_id
  }

  fn take(&mut self, member_id: &str, ack_id: u64) -> Option<HashMap<OffsetKey, i64>> {
    let pending = self.by_member.get_mut(member_id)?;
    let offsets = pending.remove(&ack_id);
    if pending.is_empty() {
      self.by_member.remove(member_id);
    }
    offsets
  }

  fn retain_members<F: Fn(&str) -> bool>(&mut self, keep: F) {
    self.by_member.retain(|id, _| keep(id));
  }
}

/// Runs gossip rounds for one member and answers the rounds of its peers.
///
/// A response carries `None` only when the requester is rejected. Offsets are committed on the
/// requesting side as soon as a response arrives, and on the responding side once the requester
/// acknowledges that particular response by its `ack_id`.
pub struct GossipActor {
  informer: Informer,
  config: ClusterConfig,
  events: EventStreamRef,
  pending_acks: PendingAcks,
  tick: Option<JoinHandle<bool>>,
  leaving: bool,
}
impl GossipActor {
  /// Also returns the handle of the consensus check on the topology hash.
  pub fn new(
    member: &Member,
    config: ClusterConfig,
    events: EventStreamRef,
  ) -> (GossipActor, ConsensusHandle) {
    let mut informer =
      Informer::new(member.id.clone(), config.gossip_fan_out, config.gossip_max_send);
    let (check, handle) = ConsensusCheckBuilder::new(TOPOLOGY_KEY)
      .with_id(TOPOLOGY_CONSENSUS_ID)
      .build();
    informer.add_consensus_check(check);
    let actor = GossipActor {
      informer: informer,
      config: config,
      events: events,
      pending_acks: PendingAcks::default(),
      tick: None,
      leaving: false,
    };
    (actor, handle)
  }

  fn schedule_tick(&mut self, ctx: &ActorContext<GossipMsg>) {
    self.tick = Some(ctx.node.schedule_local_msg(
      self.config.gossip_interval,
      ctx.local_interface(),
      GossipMsg::SendGossipStateRequest,
    ));
  }

  fn publish_consensus(&mut self, ctx: &ActorContext<GossipMsg>) {
    for update in self.informer.take_consensus_updates() {
      match update {
        ConsensusUpdate::Reached(reached) => {
          debug!(LOG_LEVEL, &ctx.node, format!("Consensus reached on {}", reached.id));
          self.events.publish(ClusterEvent::Consensus(reached));
        }
        ConsensusUpdate::Lost { id } => {
          debug!(LOG_LEVEL, &ctx.node, format!("Consensus lost on {}", id));
        }
      }
    }
  }

  fn set_state(&mut self, ctx: &ActorContext<GossipMsg>, key: &str, value: Vec<u8>) {
    self.informer.set_state(key, value);
    self.publish_consensus(ctx);
  }

  fn receive(&mut self, ctx: &ActorContext<GossipMsg>, state: &GossipState) {
    for update in self.informer.receive_state(state) {
      self.events.publish(ClusterEvent::GossipUpdate(update));
    }
    self.publish_consensus(ctx);
  }

  fn respond(
    ctx: &ActorContext<GossipMsg>,
    responder: Option<Responder>,
    msg: IntraClusterMsg,
  ) {
    let responder = match responder {
      Some(r) => r,
      None => {
        warn!(LOG_LEVEL, &ctx.node, "Gossip request sent without a reply address");
        return;
      }
    };
    if let Err(e) = responder.respond(&msg) {
      debug!(LOG_LEVEL, &ctx.node, format!("Could not answer gossip request: {}", e));
    }
  }

  fn remote(&mut self, ctx: &ActorContext<GossipMsg>, inbound: Inbound) {
    let sender = inbound.sender().to_string();
    let (msg, responder) = match inbound.into_parts::<IntraClusterMsg>() {
      Ok(parts) => parts,
      Err(e) => {
        warn!(LOG_LEVEL, &ctx.node, format!("Undecodable gossip from {}: {}", sender, e));
        return;
      }
    };
    match msg {
      IntraClusterMsg::GossipRequest { member_id, state } => {
        if !self.informer.is_member(&member_id) {
          info!(
            LOG_LEVEL,
            &ctx.node,
            format!("Rejecting gossip from unknown or blocked member {}", member_id)
          );
          let rejected = IntraClusterMsg::GossipResponse {
            state: None,
            ack_id: None,
          };
          Self::respond(ctx, responder, rejected);
          return;
        }
        self.receive(ctx, &state);
        let delta = self.informer.get_member_state_delta(&member_id);
        let ack_id = if delta.has_state {
          Some(self.pending_acks.insert(&member_id, delta.pending_offsets))
        } else {
          None
        };
        Self::respond(
          ctx,
          responder,
          IntraClusterMsg::GossipResponse {
            state: Some(delta.state),
            ack_id: ack_id,
          },
        );
      }
      IntraClusterMsg::GossipResponseAck { member_id, ack_id } => {
        match self.pending_acks.take(&member_id, ack_id) {
          Some(offsets) => self.informer.commit_offsets(offsets),
          None => trace!(
            LOG_LEVEL,
            &ctx.node,
            format!("Stale gossip ack {} from {}", ack_id, member_id)
          ),
        }
      }
      other => {
        warn!(
          LOG_LEVEL,
          &ctx.node,
          format!("Gossip actor got unexpected message from {}: {:?}", sender, other)
        );
      }
    }
  }

  fn send_round(&mut self, ctx: &ActorContext<GossipMsg>) {
    let mut outgoing: Vec<(MemberStateDelta, Arc<Member>)> = Vec::new();
    self
      .informer
      .send_state(|delta, member| outgoing.push((delta, member.clone())));
    for (delta, member) in outgoing {
      let MemberStateDelta {
        state,
        pending_offsets,
        ..
      } = delta;
      let node = ctx.node.clone();
      let recvr = ctx.local_interface::<GossipMsg>();
      let target = Pid::new(member.address(), GOSSIP_ACTOR_NAME);
      let timeout = self.config.gossip_request_timeout;
      let request = IntraClusterMsg::GossipRequest {
        member_id: self.informer.my_id().to_string(),
        state: state,
      };
      trace!(LOG_LEVEL, &ctx.node, format!("Gossiping to {}", member.id));
      ctx.node.rt().spawn(async move {
        let result = node.request(&target, &request, timeout).await;
        recvr.send(GossipMsg::GossipSent {
          member_id: member.id.clone(),
          target: target,
          offsets: pending_offsets,
          result: result,
        })
      });
    }
  }

  fn tick(&mut self, ctx: &ActorContext<GossipMsg>) {
    let now = now_ms();
    let heartbeat = serde_cbor::to_vec(&now).unwrap_or_default();
    self.set_state(ctx, HEARTBEAT_KEY, heartbeat);
    if let Some(expiration) = self.config.heartbeat_expiration {
      for id in self
        .informer
        .block_expired_heartbeats(now, expiration.as_millis() as i64)
      {
        info!(LOG_LEVEL, &ctx.node, format!("Heartbeat of {} expired, blocking it", id));
      }
    }
    for id in self.informer.block_gracefully_left() {
      info!(LOG_LEVEL, &ctx.node, format!("{} left the cluster, blocking it", id));
    }
    self.publish_consensus(ctx);
    self.send_round(ctx);
  }
}
#[async_trait]
impl Actor<GossipMsg> for GossipActor {
  async fn pre_start(&mut self, ctx: &ActorContext<GossipMsg>) {
    self.schedule_tick(ctx);
  }

  async fn recv(&mut self, ctx: &ActorContext<GossipMsg>, msg: GossipMsg) {
    match msg {
      GossipMsg::Remote(inbound) => self.remote(ctx, inbound),
      GossipMsg::Event(ClusterEvent::Topology(topology)) => {
        self.informer.update_cluster_topology(&topology);
        let informer = &self.informer;
        self.pending_acks.retain_members(|id| informer.is_member(id));
        self.publish_consensus(ctx);
      }
      GossipMsg::Event(_) => {}
      GossipMsg::SetState(key, value) => self.set_state(ctx, &key, value),
      GossipMsg::GetState(key, tx) => {
        let _ = tx.send(self.informer.get_state(&key));
      }
      GossipMsg::AddConsensusCheck(check) => {
        self.informer.add_consensus_check(check);
        self.publish_consensus(ctx);
      }
      GossipMsg::RemoveConsensusCheck(id) => {
        self.informer.remove_consensus_check(&id);
      }
      GossipMsg::SendGossipStateRequest => {
        self.tick(ctx);
        if !self.leaving {
          self.schedule_tick(ctx);
        }
      }
      GossipMsg::GossipSent {
        member_id,
        target,
        offsets,
        result,
      } => match result {
        Ok(IntraClusterMsg::GossipResponse {
          state: Some(state),
          ack_id,
        }) => {
          self.informer.commit_offsets(offsets);
          self.receive(ctx, &state);
          if let Some(ack_id) = ack_id {
            let ack = IntraClusterMsg::GossipResponseAck {
              member_id: self.informer.my_id().to_string(),
              ack_id: ack_id,
            };
            if let Err(e) = ctx.node.send(&target, &ack) {
              debug!(LOG_LEVEL, &ctx.node, format!("Could not ack {}: {}", member_id, e));
            }
          }
        }
        Ok(IntraClusterMsg::GossipResponse { state: None, .. }) => {
          debug!(LOG_LEVEL, &ctx.node, format!("{} rejected our gossip", member_id));
        }
        Ok(other) => {
          warn!(
            LOG_LEVEL,
            &ctx.node,
            format!("Unexpected gossip response from {}: {:?}", member_id, other)
          );
        }
        Err(e) => {
          debug!(LOG_LEVEL, &ctx.node, format!("Gossip to {} failed: {}", member_id, e));
        }
      },
      GossipMsg::Leave(tx) => {
        self.leaving = true;
        let left_at = serde_cbor::to_vec(&now_ms()).unwrap_or_default();
        self.set_state(ctx, GRACEFULLY_LEFT_KEY, left_at);
        self.send_round(ctx);
        let _ = tx.send(());
      }
    }
  }

  async fn post_stop(&mut self, _: &ActorContext<GossipMsg>) {
    if let Some(tick) = self.tick.take() {
      tick.abort();
    }
  }
}

#[cfg(test)]
fn offsets_for(member_id: &str, seq: i64) -> HashMap<OffsetKey, i64> {
  let mut offsets = HashMap::new();
  offsets.insert(("b".to_string(), member_id.to_string()), seq);
  offsets
}

#[test]
fn test_late_ack_commits_only_its_own_offsets() {
  let mut pending = PendingAcks::default();
  let first = pending.insert("b", offsets_for("a", 1));
  let second = pending.insert("b", offsets_for("a", 2));
  assert_ne!(first, second);

  assert_eq!(pending.take("b", first), Some(offsets_for("a", 1)));
  assert_eq!(pending.take("b", first), None);
  assert_eq!(pending.take("c", second), None);
  assert_eq!(pending.take("b", second), Some(offsets_for("a", 2)));
  assert!(pending.by_member.is_empty());
}

#[test]
fn test_pending_acks_are_bounded_and_pruned() {
  let mut pending = PendingAcks::default();
  let ids: Vec<u64> = (0..MAX_PENDING_ACKS as i64 + 2)
    .map(|seq| pending.insert("b", offsets_for("a", seq)))
    .collect();
  pending.insert("c", offsets_for("a", 0));
  assert_eq!(pending.by_member["b"].len(), MAX_PENDING_ACKS);
  assert_eq!(pending.take("b", ids[0]), None);
  assert!(pending.take("b", ids[ids.len() - 1]).is_some());

  pending.retain_members(|id| id != "b");
  assert!(!pending.by_member.contains_key("b"));
  assert!(pending.by_member.contains_key("c"));
}
