use crate::cluster::gossip::{
  merge_state, ConsensusCheck, ConsensusUpdate, GossipKeyValue, GossipMemberState,
  GossipState, GossipUpdate, GRACEFULLY_LEFT_KEY, HEARTBEAT_KEY, TOPOLOGY_KEY,
};
use crate::cluster::gossip::state::now_ms;
use crate::cluster::{ClusterTopology, Member};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// `(target member, origin member)`: what `target` has acknowledged of `origin`'s state.
pub type OffsetKey = (String, String);

/// Everything `target_member_id` has not acknowledged yet. Committing `pending_offsets` after the
/// target confirms receipt keeps the same entries from being sent again.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemberStateDelta {
  pub target_member_id: String,
  pub has_state: bool,
  pub state: GossipState,
  pub pending_offsets: HashMap<OffsetKey, i64>,
}

/// The gossip state of one member and the bookkeeping for sending it on. Owned by the gossip
/// actor, nothing in here is synchronized.
pub struct Informer {
  my_id: String,
  local_seq: i64,
  state: GossipState,
  committed_offsets: HashMap<OffsetKey, i64>,
  active_member_ids: HashSet<String>,
  other_members: Vec<Arc<Member>>,
  blocked: HashSet<String>,
  checks: HashMap<String, ConsensusCheck>,
  checks_by_key: HashMap<String, HashSet<String>>,
  consensus_updates: Vec<ConsensusUpdate>,
  fan_out: usize,
  max_send: usize,
  rng: SmallRng,
}
impl Informer {
  pub fn new(my_id: impl Into<String>, fan_out: usize, max_send: usize) -> Informer {
    Informer {
      my_id: my_id.into(),
      local_seq: 0,
      state: GossipState::default(),
      committed_offsets: HashMap::new(),
      active_member_ids: HashSet::new(),
      other_members: Vec::new(),
      blocked: HashSet::new(),
      checks: HashMap::new(),
      checks_by_key: HashMap::new(),
      consensus_updates: Vec::new(),
      fan_out: fan_out,
      max_send: max_send,
      rng: SmallRng::from_entropy(),
    }
  }

  pub fn my_id(&self) -> &str {
    &self.my_id
  }

  pub fn state(&self) -> &GossipState {
    &self.state
  }

  pub fn set_state(&mut self, key: impl Into<String>, value: Vec<u8>) {
    let key = key.into();
    self.local_seq += 1;
    let entry = GossipKeyValue {
      sequence_number: self.local_seq,
      value: value,
      local_timestamp_ms: now_ms(),
    };
    let mine = self.state.members.get(&self.my_id).cloned().unwrap_or_default();
    let mut values = mine.values;
    values.insert(key.clone(), entry);
    self
      .state
      .members
      .insert(self.my_id.clone(), GossipMemberState { values: values });
    self.evaluate_checks_for(&[key]);
  }

  /// Every member's value for `key`, this member's included.
  pub fn get_state(&self, key: &str) -> HashMap<String, GossipKeyValue> {
    self
      .state
      .members
      .iter()
      .filter_map(|(id, member)| Some((id.clone(), member.values.get(key)?.clone())))
      .collect()
  }

  /// Merges state received from a peer. Only entries that changed are returned.
  pub fn receive_state(&mut self, remote: &GossipState) -> Vec<GossipUpdate> {
    let updates = merge_state(&mut self.state, remote, &self.my_id, now_ms());
    if !updates.is_empty() {
      let keys: Vec<String> = updates.iter().map(|u| u.key.clone()).collect();
      self.evaluate_checks_for(&keys);
    }
    updates
  }

  /// This member's own state first, then whatever else fits under the send limit.
  pub fn get_member_state_delta(&self, target_member_id: &str) -> MemberStateDelta {
    let mut delta = MemberStateDelta {
      target_member_id: target_member_id.to_string(),
      ..MemberStateDelta::default()
    };
    let own = self.state.members.get(&self.my_id).map(|s| (&self.my_id, s));
    let others = self
      .state
      .members
      .iter()
      .filter(|(id, _)| **id != self.my_id);
    for (origin, member_state) in own.into_iter().chain(others) {
      if delta.state.members.len() >= self.max_send {
        break;
      }
      if origin == target_member_id {
        continue;
      }
      let offset_key = (target_member_id.to_string(), origin.clone());
      let watermark = self.committed_offsets.get(&offset_key).copied().unwrap_or(0);
      let mut highest = watermark;
      let mut pending = GossipMemberState::default();
      for (key, value) in member_state.values.iter() {
        if value.sequence_number > watermark {
          highest = highest.max(value.sequence_number);
          pending.values.insert(key.clone(), value.clone());
        }
      }
      if pending.values.is_empty() {
        continue;
      }
      delta.state.members.insert(origin.clone(), pending);
      delta.pending_offsets.insert(offset_key, highest);
      delta.has_state = true;
    }
    delta
  }

  pub fn commit_offsets(&mut self, offsets: HashMap<OffsetKey, i64>) {
    for (key, seq) in offsets {
      let committed = self.committed_offsets.entry(key).or_insert(0);
      *committed = (*committed).max(seq);
    }
  }

  /// Calls `send` with the delta for up to `fan_out` random peers that have something pending.
  pub fn send_state<F>(&mut self, mut send: F)
  where
    F: FnMut(MemberStateDelta, &Arc<Member>),
  {
    let mut peers = self.other_members.clone();
    peers.shuffle(&mut self.rng);
    let mut sent = 0;
    for peer in peers.iter().filter(|m| !self.blocked.contains(&m.id)) {
      if sent >= self.fan_out {
        break;
      }
      let delta = self.get_member_state_delta(&peer.id);
      if !delta.has_state {
        continue;
      }
      send(delta, peer);
      sent += 1;
    }
  }

  pub fn update_cluster_topology(&mut self, topology: &ClusterTopology) {
    self.active_member_ids = topology.members.iter().map(|m| m.id.clone()).collect();
    self.other_members = topology
      .members
      .iter()
      .filter(|m| m.id != self.my_id)
      .cloned()
      .collect();
    let departed: Vec<String> = self
      .state
      .members
      .keys()
      .filter(|id| **id != self.my_id && !self.active_member_ids.contains(*id))
      .cloned()
      .collect();
    for id in departed {
      self.state.members.remove(&id);
    }
    let active = &self.active_member_ids;
    self
      .committed_offsets
      .retain(|(target, origin), _| active.contains(target) && active.contains(origin));
    self.blocked.retain(|id| active.contains(id));
    let hash = serde_cbor::to_vec(&topology.topology_hash).unwrap_or_default();
    self.set_state(TOPOLOGY_KEY, hash);
    self.evaluate_all_checks();
  }

  pub fn block_member(&mut self, member_id: impl Into<String>) {
    if self.blocked.insert(member_id.into()) {
      self.evaluate_all_checks();
    }
  }

  pub fn is_blocked(&self, member_id: &str) -> bool {
    self.blocked.contains(member_id)
  }

  /// Whether gossip from `member_id` is accepted: it is in the topology and not blocked.
  pub fn is_member(&self, member_id: &str) -> bool {
    self.active_member_ids.contains(member_id) && !self.blocked.contains(member_id)
  }

  /// Blocks members that announced they are leaving.
  pub fn block_gracefully_left(&mut self) -> Vec<String> {
    let left: Vec<String> = self
      .get_state(GRACEFULLY_LEFT_KEY)
      .into_keys()
      .filter(|id| *id != self.my_id && !self.blocked.contains(id))
      .collect();
    for id in &left {
      self.block_member(id.clone());
    }
    left
  }

  /// Blocks members whose heartbeat was last refreshed more than `expiration_ms` ago.
  pub fn block_expired_heartbeats(&mut self, now_ms: i64, expiration_ms: i64) -> Vec<String> {
    let expired: Vec<String> = self
      .get_state(HEARTBEAT_KEY)
      .into_iter()
      .filter(|(id, v)| {
        *id != self.my_id
          && !self.blocked.contains(id)
          && now_ms - v.local_timestamp_ms > expiration_ms
      })
      .map(|(id, _)| id)
      .collect();
    for id in &expired {
      self.block_member(id.clone());
    }
    expired
  }

  /// Replaces any check with the same id and evaluates it right away.
  pub fn add_consensus_check(&mut self, mut check: ConsensusCheck) {
    self.remove_consensus_check(&check.id().to_string());
    for key in check.affected_keys() {
      self
        .checks_by_key
        .entry(key.clone())
        .or_default()
        .insert(check.id().to_string());
    }
    let members = self.consensus_members();
    if let Some(update) = check.evaluate(&self.state, &members) {
      self.consensus_updates.push(update);
    }
    self.checks.insert(check.id().to_string(), check);
  }

  pub fn remove_consensus_check(&mut self, id: &str) -> bool {
    let check = match self.checks.remove(id) {
      Some(check) => check,
      None => return false,
    };
    for key in check.affected_keys() {
      if let Some(ids) = self.checks_by_key.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
          self.checks_by_key.remove(key);
        }
      }
    }
    true
  }

  /// Consensus changes since the last call, oldest first.
  pub fn take_consensus_updates(&mut self) -> Vec<ConsensusUpdate> {
    std::mem::take(&mut self.consensus_updates)
  }

  fn consensus_members(&self) -> HashSet<String> {
    self
      .active_member_ids
      .iter()
      .filter(|id| !self.blocked.contains(*id))
      .cloned()
      .collect()
  }

  fn evaluate_checks_for(&mut self, keys: &[String]) {
    let ids: HashSet<String> = keys
      .iter()
      .filter_map(|k| self.checks_by_key.get(k))
      .flatten()
      .cloned()
      .collect();
    self.evaluate(ids.into_iter());
  }

  fn evaluate_all_checks(&mut self) {
    let ids: Vec<String> = self.checks.keys().cloned().collect();
    self.evaluate(ids.into_iter());
  }

  fn evaluate<I: Iterator<Item = String>>(&mut self, ids: I) {
    let members = self.consensus_members();
    for id in ids {
      if let Some(check) = self.checks.get_mut(&id) {
        if let Some(update) = check.evaluate(&self.state, &members) {
          self.consensus_updates.push(update);
        }
      }
    }
  }
}

#[cfg(test)]
fn test_topology(ids: &[&str]) -> ClusterTopology {
  use crate::cluster::topology_hash;
  use crate::core::{Host, Socket};
  let members: Vec<Arc<Member>> = ids
    .iter()
    .enumerate()
    .map(|(i, id)| {
      Arc::new(Member::new(
        *id,
        Socket::new(Host::from("127.0.0.1"), 6000 + i as u16),
        vec![],
      ))
    })
    .collect();
  ClusterTopology {
    topology_hash: topology_hash(members.iter().map(|m| &**m)),
    members: members,
    joined: vec![],
    left: vec![],
    event_id: 1,
  }
}

#[cfg(test)]
fn informers(ids: &[&str]) -> Vec<Informer> {
  let topology = test_topology(ids);
  ids
    .iter()
    .map(|id| {
      let mut informer = Informer::new(*id, 3, 50);
      informer.update_cluster_topology(&topology);
      informer
    })
    .collect()
}

#[test]
fn test_informers_converge() {
  let mut infs = informers(&["a", "b"]);
  infs[0].set_state("color", b"red".to_vec());
  infs[1].set_state("size", b"xl".to_vec());

  let to_b = infs[0].get_member_state_delta("b");
  assert!(to_b.has_state);
  assert!(!to_b.state.members.contains_key("b"));
  infs[1].receive_state(&to_b.state);
  let to_a = infs[1].get_member_state_delta("a");
  infs[0].receive_state(&to_a.state);

  for inf in &infs {
    let colors = inf.get_state("color");
    assert_eq!(colors.get("a").map(|v| v.value.clone()), Some(b"red".to_vec()));
    let sizes = inf.get_state("size");
    assert_eq!(sizes.get("b").map(|v| v.value.clone()), Some(b"xl".to_vec()));
  }
}

#[test]
fn test_receive_state_twice_yields_nothing() {
  let mut infs = informers(&["a", "b"]);
  infs[0].set_state("k", b"v".to_vec());
  let delta = infs[0].get_member_state_delta("b");
  assert_eq!(infs[1].receive_state(&delta.state).len(), 2);
  assert!(infs[1].receive_state(&delta.state).is_empty());
}

#[test]
fn test_delta_respects_committed_offsets() {
  let mut infs = informers(&["a", "b"]);
  infs[0].set_state("k", b"1".to_vec());
  let first = infs[0].get_member_state_delta("b");
  assert!(first.has_state);
  // Not acknowledged, so it is sent again.
  assert_eq!(infs[0].get_member_state_delta("b"), first);

  infs[0].commit_offsets(first.pending_offsets.clone());
  assert!(!infs[0].get_member_state_delta("b").has_state);

  infs[0].set_state("k", b"2".to_vec());
  let second = infs[0].get_member_state_delta("b");
  let values = &second.state.members["a"].values;
  assert_eq!(values.len(), 1);
  assert_eq!(values["k"].value, b"2".to_vec());

  // Committing an older offset never moves the watermark back.
  infs[0].commit_offsets(second.pending_offsets.clone());
  infs[0].commit_offsets(first.pending_offsets);
  assert!(!infs[0].get_member_state_delta("b").has_state);
}

#[test]
fn test_delta_is_capped_by_max_send() {
  let topology = test_topology(&["a", "b", "c", "d"]);
  let mut a = Informer::new("a", 3, 2);
  a.update_cluster_topology(&topology);
  for id in &["b", "c", "d"] {
    let mut other = Informer::new(*id, 3, 50);
    other.update_cluster_topology(&topology);
    other.set_state("k", id.as_bytes().to_vec());
    a.receive_state(other.state());
  }
  let delta = a.get_member_state_delta("d");
  assert_eq!(delta.state.members.len(), 2);
  assert!(delta.state.members.contains_key("a"));
  assert!(!delta.state.members.contains_key("d"));
}

#[test]
fn test_send_state_skips_blocked_and_idle_peers() {
  let mut infs = informers(&["a", "b", "c"]);
  infs[0].set_state("k", b"v".to_vec());
  infs[0].block_member("c");
  let mut targets = Vec::new();
  infs[0].send_state(|delta, member| {
    assert_eq!(delta.target_member_id, member.id);
    targets.push(member.id.clone());
  });
  assert_eq!(targets, vec!["b".to_string()]);
  assert!(!infs[0].is_member("c"));
  assert!(infs[0].is_member("b"));
  assert!(!infs[0].is_member("z"));

  let delta = infs[0].get_member_state_delta("b");
  infs[0].commit_offsets(delta.pending_offsets);
  let mut calls = 0;
  infs[0].send_state(|_, _| calls += 1);
  assert_eq!(calls, 0);
}

#[test]
fn test_topology_change_prunes_departed_members() {
  let mut infs = informers(&["a", "b", "c"]);
  infs[2].set_state("k", b"v".to_vec());
  let delta = infs[2].get_member_state_delta("a");
  infs[0].receive_state(&delta.state);
  assert!(infs[0].get_state("k").contains_key("c"));

  infs[0].update_cluster_topology(&test_topology(&["a", "b"]));
  assert!(infs[0].get_state("k").is_empty());
  assert!(!infs[0].is_member("c"));
}

#[test]
fn test_consensus_fires_once_per_transition() {
  use crate::cluster::gossip::ConsensusCheckBuilder;
  let mut infs = informers(&["a", "b"]);
  let (check, _) = ConsensusCheckBuilder::new("v").with_id("v").build();
  infs[0].add_consensus_check(check);
  infs[0].take_consensus_updates();

  infs[0].set_state("v", b"1".to_vec());
  infs[1].set_state("v", b"1".to_vec());
  assert!(infs[0].take_consensus_updates().is_empty());

  let delta = infs[1].get_member_state_delta("a");
  infs[0].receive_state(&delta.state);
  let updates = infs[0].take_consensus_updates();
  assert_eq!(updates.len(), 1);
  assert!(matches!(updates[0], ConsensusUpdate::Reached(_)));

  // b sets the same value again: newer sequence number, still agreed.
  infs[1].set_state("v", b"1".to_vec());
  let delta = infs[1].get_member_state_delta("a");
  assert_eq!(infs[0].receive_state(&delta.state).len(), 1);
  assert!(infs[0].take_consensus_updates().is_empty());

  assert!(infs[0].remove_consensus_check("v"));
  assert!(!infs[0].remove_consensus_check("v"));
}

#[test]
fn test_topology_consensus_excludes_blocked_members() {
  use crate::cluster::gossip::ConsensusCheckBuilder;
  let mut infs = informers(&["a", "b", "c"]);
  let (check, handle) = ConsensusCheckBuilder::new(TOPOLOGY_KEY).build();
  infs[0].add_consensus_check(check);
  let delta = infs[1].get_member_state_delta("a");
  infs[0].receive_state(&delta.state);
  assert!(handle.try_get_consensus::<u64>().is_none());

  infs[0].block_member("c");
  let agreed = handle.try_get_consensus::<u64>();
  assert_eq!(agreed, Some(test_topology(&["a", "b", "c"]).topology_hash));
}

#[test]
fn test_expired_heartbeats_are_blocked() {
  let mut infs = informers(&["a", "b"]);
  infs[1].set_state(HEARTBEAT_KEY, vec![]);
  let delta = infs[1].get_member_state_delta("a");
  infs[0].receive_state(&delta.state);
  let stored = infs[0].get_state(HEARTBEAT_KEY)["b"].local_timestamp_ms;
  assert!(infs[0].block_expired_heartbeats(stored + 1_000, 5_000).is_empty());
  assert_eq!(
    infs[0].block_expired_heartbeats(stored + 10_000, 5_000),
    vec!["b".to_string()]
  );
  assert!(infs[0].is_blocked("b"));
}
