use crate::cluster::{ClusterIdentity, Member};
use std::sync::Arc;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(hash: u64, bytes: &[u8]) -> u64 {
  bytes
    .iter()
    .fold(hash, |h, b| (h ^ *b as u64).wrapping_mul(FNV_PRIME))
}

// Plain FNV-1a ranks addresses that only differ in their last byte by that byte.
fn fmix64(mut h: u64) -> u64 {
  h ^= h >> 33;
  h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
  h ^= h >> 33;
  h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
  h ^ (h >> 33)
}

/// FNV-1a over the key, then the member's address, starting from a fresh basis for every member.
/// The result is run through a 64 bit finalizer.
pub fn score(key: &[u8], member: &[u8]) -> u64 {
  fmix64(fnv1a(fnv1a(FNV_OFFSET_BASIS, key), member))
}

struct Candidate {
  member: Arc<Member>,
  address: String,
}

/// Highest random weight hashing over a member snapshot. Candidates are kept sorted by address,
/// so equal scores resolve to the same member everywhere.
#[derive(Default)]
pub struct Rendezvous {
  candidates: Vec<Candidate>,
}
impl Rendezvous {
  pub fn new() -> Rendezvous {
    Rendezvous::default()
  }

  pub fn from_members(members: &[Arc<Member>]) -> Rendezvous {
    let mut rdv = Rendezvous::new();
    rdv.update_members(members);
    rdv
  }

  pub fn update_members(&mut self, members: &[Arc<Member>]) {
    let mut candidates: Vec<Candidate> = members
      .iter()
      .map(|m| Candidate {
        member: m.clone(),
        address: m.address(),
      })
      .collect();
    candidates.sort_by(|a, b| a.address.cmp(&b.address));
    candidates.dedup_by(|a, b| a.address == b.address);
    self.candidates = candidates;
  }

  pub fn is_empty(&self) -> bool {
    self.candidates.is_empty()
  }

  /// The owner of `key` among all members.
  pub fn get(&self, key: &str) -> Option<&Arc<Member>> {
    self.owner(key, |_| true)
  }

  /// The owner of an identity among the members that host its kind.
  pub fn get_by_identity(&self, identity: &ClusterIdentity) -> Option<&Arc<Member>> {
    self.owner(&identity.as_key(), |m| m.has_kind(&identity.kind))
  }

  fn owner<F>(&self, key: &str, eligible: F) -> Option<&Arc<Member>>
  where
    F: Fn(&Member) -> bool,
  {
    let mut best: Option<(u64, &Candidate)> = None;
    for candidate in self.candidates.iter().filter(|c| eligible(&c.member)) {
      let s = score(key.as_bytes(), candidate.address.as_bytes());
      if best.map_or(true, |(top, _)| s > top) {
        best = Some((s, candidate));
      }
    }
    best.map(|(_, c)| &c.member)
  }
}

/// Address of the member owning `key`, or `None` when there are no members.
pub fn get_owner(members: &[Arc<Member>], key: &str) -> Option<String> {
  Rendezvous::from_members(members).get(key).map(|m| m.address())
}

#[cfg(test)]
fn members(ports: std::ops::Range<u16>) -> Vec<Arc<Member>> {
  use crate::core::{Host, Socket};
  ports
    .map(|p| {
      Arc::new(Member::new(
        format!("member-{}", p),
        Socket::new(Host::from("127.0.0.1"), p),
        vec!["user".to_string()],
      ))
    })
    .collect()
}

#[test]
fn test_fnv1a_vectors() {
  assert_eq!(fnv1a(FNV_OFFSET_BASIS, b""), 0xcbf29ce484222325);
  assert_eq!(fnv1a(FNV_OFFSET_BASIS, b"a"), 0xaf63dc4c8601ec8c);
  assert_eq!(fnv1a(FNV_OFFSET_BASIS, b"foobar"), 0x85944171f73967e8);
  assert_eq!(score(b"foo", b"bar"), fmix64(fnv1a(FNV_OFFSET_BASIS, b"foobar")));
  assert_eq!(fmix64(0), 0);
  assert_ne!(score(b"k", b"127.0.0.1:6000"), score(b"k", b"127.0.0.1:6001"));
}

#[test]
fn test_owner_is_stable() {
  let mut ms = members(6000..6005);
  let key = "user-42";
  let owner = get_owner(&ms, key).unwrap();
  for _ in 0..10 {
    assert_eq!(get_owner(&ms, key).unwrap(), owner);
  }
  ms.reverse();
  assert_eq!(get_owner(&ms, key).unwrap(), owner);
  assert_eq!(get_owner(&[], key), None);
}

#[test]
fn test_removal_moves_only_the_removed_members_keys() {
  let all = members(6000..6005);
  let keys: Vec<String> = (0..1000).map(|i| format!("key-{}", i)).collect();
  let before = Rendezvous::from_members(&all);
  let removed = all[2].address();
  let remaining: Vec<Arc<Member>> =
    all.iter().filter(|m| m.address() != removed).cloned().collect();
  let after = Rendezvous::from_members(&remaining);
  let mut moved = 0;
  for key in &keys {
    let old = before.get(key).unwrap().address();
    let new = after.get(key).unwrap().address();
    if old != removed {
      assert_eq!(old, new, "{} moved without its owner leaving", key);
    } else {
      moved += 1;
    }
  }
  assert!(moved > 0);
}

#[test]
fn test_addition_moves_a_fair_share() {
  let all = members(6000..6006);
  let keys: Vec<String> = (0..2000).map(|i| format!("key-{}", i)).collect();
  let before = Rendezvous::from_members(&all[..5]);
  let after = Rendezvous::from_members(&all);
  let added = all[5].address();
  let mut moved = 0;
  for key in &keys {
    let old = before.get(key).unwrap().address();
    let new = after.get(key).unwrap().address();
    if old != new {
      assert_eq!(new, added);
      moved += 1;
    }
  }
  // Expected share is 1/6 of the keys.
  let share = moved as f64 / keys.len() as f64;
  assert!(share > 0.1 && share < 0.24, "share was {}", share);
}

#[test]
fn test_identity_owner_hosts_the_kind() {
  use crate::core::{Host, Socket};
  let mut ms = members(6000..6003);
  ms.push(Arc::new(Member::new(
    "rooms-only",
    Socket::new(Host::from("127.0.0.1"), 6100),
    vec!["room".to_string()],
  )));
  let rdv = Rendezvous::from_members(&ms);
  for i in 0..50 {
    let user = ClusterIdentity::new(format!("u{}", i), "user");
    assert!(rdv.get_by_identity(&user).unwrap().has_kind("user"));
    let room = ClusterIdentity::new(format!("r{}", i), "room");
    assert_eq!(rdv.get_by_identity(&room).unwrap().id, "rooms-only");
  }
  let chat = ClusterIdentity::new("c", "chat");
  assert!(rdv.get_by_identity(&chat).is_none());
}
