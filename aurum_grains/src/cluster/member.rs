use crate::cluster::{MemberStatus, MemberStrategy, WeightedMemberStrategy};
use crate::core::Socket;
use im::OrdMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;
use wyhash::WyHash;

#[derive(
  Clone, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize,
)]
pub struct Member {
  pub id: String,
  pub socket: Socket,
  /// Grain kinds this member can activate.
  pub kinds: Vec<String>,
}
impl Member {
  pub fn new(id: impl Into<String>, socket: Socket, kinds: Vec<String>) -> Member {
    Member {
      id: id.into(),
      socket: socket,
      kinds: kinds,
    }
  }

  pub fn address(&self) -> String {
    self.socket.to_string()
  }

  pub fn has_kind(&self, kind: &str) -> bool {
    self.kinds.iter().any(|k| k == kind)
  }
}

/// A versioned snapshot of cluster membership. Never mutated, a new one is built for every change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
  pub members: Vec<Arc<Member>>,
  pub joined: Vec<Arc<Member>>,
  pub left: Vec<Arc<Member>>,
  pub topology_hash: u64,
  pub event_id: u64,
}

/// Hash of the member ids and addresses sorted by id, identical on every member that sees the same
/// membership. A member that comes back under the same id at another address changes it.
pub fn topology_hash<'a, I>(members: I) -> u64
where
  I: IntoIterator<Item = &'a Member>,
{
  let mut hasher = WyHash::with_seed(0);
  for member in members.into_iter().sorted_by(|a, b| a.id.cmp(&b.id)) {
    hasher.write(member.id.as_bytes());
    hasher.write_u8(0);
    hasher.write(member.address().as_bytes());
    hasher.write_u8(0);
  }
  hasher.finish()
}

fn same_member(a: &Member, b: &Member) -> bool {
  a.id == b.id && a.socket == b.socket
}

/// The membership as last reported by the membership provider. Turns member lists into
/// [`ClusterTopology`] events and keeps a weighted member strategy per grain kind.
#[derive(Default)]
pub struct MemberList {
  members: OrdMap<String, Arc<Member>>,
  topology_hash: u64,
  event_id: u64,
  strategies: HashMap<String, WeightedMemberStrategy>,
}
impl MemberList {
  pub fn new() -> MemberList {
    MemberList::default()
  }

  pub fn members(&self) -> Vec<Arc<Member>> {
    self.members.values().cloned().collect()
  }

  pub fn contains_member_id(&self, id: &str) -> bool {
    self.members.contains_key(id)
  }

  pub fn topology_hash(&self) -> u64 {
    self.topology_hash
  }

  /// `None` if the membership is the one already published.
  pub fn update_cluster_topology(
    &mut self,
    members: Vec<Member>,
  ) -> Option<ClusterTopology> {
    let next: OrdMap<String, Arc<Member>> = members
      .into_iter()
      .map(|m| (m.id.clone(), Arc::new(m)))
      .collect();
    let hash = topology_hash(next.values().map(|m| &**m));
    if self.event_id > 0 && hash == self.topology_hash {
      return None;
    }
    let joined: Vec<Arc<Member>> = next
      .values()
      .filter(|m| !self.members.get(&m.id).map_or(false, |old| same_member(old, m)))
      .cloned()
      .collect();
    let left: Vec<Arc<Member>> = self
      .members
      .values()
      .filter(|m| !next.get(&m.id).map_or(false, |new| same_member(new, m)))
      .cloned()
      .collect();
    for member in &left {
      for strategy in self.strategies.values_mut() {
        strategy.remove_member(member);
      }
    }
    for member in &joined {
      for kind in &member.kinds {
        self
          .strategies
          .entry(kind.clone())
          .or_insert_with(WeightedMemberStrategy::new)
          .add_member(MemberStatus::new(member.clone()));
      }
    }
    self.strategies.retain(|_, s| !s.get_all_members().is_empty());
    self.members = next;
    self.topology_hash = hash;
    self.event_id += 1;
    Some(ClusterTopology {
      members: self.members(),
      joined: joined,
      left: left,
      topology_hash: hash,
      event_id: self.event_id,
    })
  }

  /// Address of the next member to activate a grain of `kind` on, by weighted round robin.
  pub fn get_activator(&mut self, kind: &str) -> Option<String> {
    self.strategies.get_mut(kind)?.get_by_round_robin()
  }
}

#[cfg(test)]
fn test_member(id: &str, port: u16, kinds: &[&str]) -> Member {
  use crate::core::Host;
  Member::new(
    id,
    Socket::new(Host::from("127.0.0.1"), port),
    kinds.iter().map(|k| k.to_string()).collect(),
  )
}

#[test]
fn test_topology_hash_ignores_order() {
  let a = test_member("a", 5000, &[]);
  let b = test_member("b", 5001, &[]);
  let c = test_member("c", 5002, &[]);
  let forward = topology_hash(vec![&a, &b, &c]);
  let backward = topology_hash(vec![&c, &b, &a]);
  assert_eq!(forward, backward);
  assert_ne!(forward, topology_hash(vec![&a, &b]));
  // The separator keeps ["ab"] and ["a", "b"] apart.
  let ab = test_member("ab", 5003, &[]);
  assert_ne!(topology_hash(vec![&ab]), topology_hash(vec![&a, &b]));
}

#[test]
fn test_member_list_diffs() {
  let a = test_member("a", 5000, &["user"]);
  let b = test_member("b", 5001, &["user", "room"]);
  let c = test_member("c", 5002, &["room"]);
  let mut list = MemberList::new();

  let first = list.update_cluster_topology(vec![a.clone(), b.clone()]).unwrap();
  assert_eq!(first.event_id, 1);
  assert_eq!(first.joined.len(), 2);
  assert!(first.left.is_empty());
  assert!(list.update_cluster_topology(vec![b.clone(), a.clone()]).is_none());

  let second = list.update_cluster_topology(vec![b.clone(), c.clone()]).unwrap();
  assert_eq!(second.event_id, 2);
  assert_eq!(second.joined.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["c"]);
  assert_eq!(second.left.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["a"]);
  assert_eq!(second.topology_hash, list.topology_hash());
  assert!(list.contains_member_id("c"));
  assert!(!list.contains_member_id("a"));

  assert_eq!(list.get_activator("user"), Some(b.address()));
  assert_eq!(list.get_activator("user"), Some(b.address()));
  assert!(list.get_activator("chat").is_none());
}

#[test]
fn test_first_empty_topology_is_published() {
  let mut list = MemberList::new();
  let topology = list.update_cluster_topology(vec![]).unwrap();
  assert!(topology.members.is_empty());
  assert!(list.update_cluster_topology(vec![]).is_none());
}

#[test]
fn test_moved_member_is_a_new_topology() {
  let a = test_member("a", 5000, &["user"]);
  let b = test_member("b", 5001, &["user"]);
  let moved = test_member("b", 5002, &["user"]);
  assert_ne!(topology_hash(vec![&a, &b]), topology_hash(vec![&a, &moved]));

  let mut list = MemberList::new();
  list.update_cluster_topology(vec![a.clone(), b.clone()]).unwrap();
  let topology = list.update_cluster_topology(vec![a.clone(), moved.clone()]).unwrap();
  assert_eq!(topology.left.iter().map(|m| m.address()).collect::<Vec<_>>(), vec![b.address()]);
  assert_eq!(
    topology.joined.iter().map(|m| m.address()).collect::<Vec<_>>(),
    vec![moved.address()]
  );
  assert_eq!(list.get_activator("user"), Some(a.address()));
  assert_eq!(list.get_activator("user"), Some(moved.address()));
}
