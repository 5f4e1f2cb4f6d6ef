use crate::cluster::{Member, Rendezvous};
use std::fmt::Debug;
use std::sync::Arc;

/// Where a member's selection weight comes from.
pub trait MemberStatusValue: Debug + Send + Sync {
  fn weight(&self) -> u32;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeightedMemberStatusValue {
  pub weight: u32,
}
impl Default for WeightedMemberStatusValue {
  fn default() -> Self {
    WeightedMemberStatusValue { weight: 1 }
  }
}
impl MemberStatusValue for WeightedMemberStatusValue {
  fn weight(&self) -> u32 {
    self.weight
  }
}

#[derive(Clone, Debug)]
pub struct MemberStatus {
  pub member: Arc<Member>,
  pub alive: bool,
  pub value: Arc<dyn MemberStatusValue>,
}
impl MemberStatus {
  pub fn new(member: Arc<Member>) -> MemberStatus {
    MemberStatus::with_value(member, WeightedMemberStatusValue::default())
  }

  pub fn with_value<V>(member: Arc<Member>, value: V) -> MemberStatus
  where
    V: MemberStatusValue + 'static,
  {
    MemberStatus {
      member: member,
      alive: true,
      value: Arc::new(value),
    }
  }

  pub fn weight(&self) -> u32 {
    self.value.weight()
  }
}

/// Both selections only consider members that are alive and have a weight above zero.
pub trait MemberStrategy {
  fn add_member(&mut self, member: MemberStatus);
  fn update_member(&mut self, member: MemberStatus);
  fn remove_member(&mut self, member: &Member);
  fn get_all_members(&self) -> Vec<MemberStatus>;
  fn get_by_round_robin(&mut self) -> Option<String>;
  fn get_by_rendezvous(&self, key: &str) -> Option<String>;
}

/// Classic weighted round robin. Each full pass over the members lowers the bar a member's weight
/// has to clear by the gcd of all weights, so over a long run every member is picked in
/// proportion to its weight.
#[derive(Clone, Debug, Default)]
pub struct WeightedRoundRobin {
  index: Option<usize>,
  current_weight: i64,
  max_weight: i64,
  gcd: i64,
}
impl WeightedRoundRobin {
  pub fn new() -> WeightedRoundRobin {
    WeightedRoundRobin::default()
  }

  /// Restarts the cycle for a new member list.
  pub fn update(&mut self, members: &[MemberStatus]) {
    let weights = members.iter().map(|m| m.weight() as i64);
    self.max_weight = weights.clone().max().unwrap_or(0);
    self.gcd = weights.filter(|w| *w > 0).fold(0, gcd);
    self.current_weight = 0;
    self.index = None;
  }

  pub fn next<'a>(&mut self, members: &'a [MemberStatus]) -> Option<&'a MemberStatus> {
    if members.is_empty() || self.max_weight <= 0 {
      return None;
    }
    let n = members.len();
    loop {
      let i = self.index.map_or(0, |i| (i + 1) % n);
      self.index = Some(i);
      if i == 0 {
        self.current_weight -= self.gcd;
        if self.current_weight <= 0 {
          self.current_weight = self.max_weight;
        }
      }
      if members[i].weight() as i64 >= self.current_weight {
        return Some(&members[i]);
      }
    }
  }
}

fn gcd(a: i64, b: i64) -> i64 {
  if b == 0 {
    a
  } else {
    gcd(b, a % b)
  }
}

/// Member state set for one grain kind: round robin over alive members, rendezvous ownership.
#[derive(Clone, Debug, Default)]
pub struct WeightedMemberStrategy {
  members: Vec<MemberStatus>,
  alive: Vec<MemberStatus>,
  wrr: WeightedRoundRobin,
  rdv_members: Vec<Arc<Member>>,
}
impl WeightedMemberStrategy {
  pub fn new() -> WeightedMemberStrategy {
    WeightedMemberStrategy::default()
  }

  fn refresh(&mut self) {
    self.alive = self.members.iter().filter(|m| m.alive).cloned().collect();
    self.wrr.update(&self.alive);
    self.rdv_members = self
      .alive
      .iter()
      .filter(|m| m.weight() > 0)
      .map(|m| m.member.clone())
      .collect();
  }
}
impl MemberStrategy for WeightedMemberStrategy {
  fn add_member(&mut self, member: MemberStatus) {
    match self.members.iter().position(|m| m.member.id == member.member.id) {
      Some(i) => self.members[i] = member,
      None => self.members.push(member),
    }
    self.refresh();
  }

  fn update_member(&mut self, member: MemberStatus) {
    if let Some(i) = self.members.iter().position(|m| m.member.id == member.member.id) {
      self.members[i] = member;
      self.refresh();
    }
  }

  fn remove_member(&mut self, member: &Member) {
    let before = self.members.len();
    self.members.retain(|m| m.member.id != member.id);
    if self.members.len() != before {
      self.refresh();
    }
  }

  fn get_all_members(&self) -> Vec<MemberStatus> {
    self.members.clone()
  }

  fn get_by_round_robin(&mut self) -> Option<String> {
    self.wrr.next(&self.alive).map(|m| m.member.address())
  }

  fn get_by_rendezvous(&self, key: &str) -> Option<String> {
    Rendezvous::from_members(&self.rdv_members)
      .get(key)
      .map(|m| m.address())
  }
}

#[cfg(test)]
fn status(port: u16, weight: u32) -> MemberStatus {
  use crate::core::{Host, Socket};
  MemberStatus::with_value(
    Arc::new(Member::new(
      format!("m{}", port),
      Socket::new(Host::from("127.0.0.1"), port),
      vec![],
    )),
    WeightedMemberStatusValue { weight: weight },
  )
}

#[test]
fn test_round_robin_is_proportional() {
  use std::collections::HashMap;
  let mut strategy = WeightedMemberStrategy::new();
  strategy.add_member(status(7000, 1));
  strategy.add_member(status(7001, 2));
  strategy.add_member(status(7002, 3));
  let mut counts = HashMap::new();
  for _ in 0..600 {
    *counts.entry(strategy.get_by_round_robin().unwrap()).or_insert(0) += 1;
  }
  assert_eq!(counts["127.0.0.1:7000"], 100);
  assert_eq!(counts["127.0.0.1:7001"], 200);
  assert_eq!(counts["127.0.0.1:7002"], 300);
}

#[test]
fn test_round_robin_interleaves() {
  let members = vec![status(7000, 1), status(7001, 2), status(7002, 3)];
  let mut wrr = WeightedRoundRobin::new();
  wrr.update(&members);
  let picks: Vec<u16> = (0..6)
    .map(|_| wrr.next(&members).unwrap().member.socket.port)
    .collect();
  assert_eq!(picks, vec![7002, 7001, 7002, 7000, 7001, 7002]);
}

#[test]
fn test_round_robin_skips_dead_and_weightless() {
  let mut strategy = WeightedMemberStrategy::new();
  assert_eq!(strategy.get_by_round_robin(), None);
  strategy.add_member(status(7000, 0));
  assert_eq!(strategy.get_by_round_robin(), None);
  assert_eq!(strategy.get_by_rendezvous("any"), None);
  strategy.add_member(status(7001, 4));
  let mut dead = status(7002, 8);
  dead.alive = false;
  strategy.add_member(dead);
  for _ in 0..10 {
    assert_eq!(strategy.get_by_round_robin().unwrap(), "127.0.0.1:7001");
  }
  assert_eq!(strategy.get_all_members().len(), 3);

  strategy.update_member(status(7002, 8));
  let picks: Vec<String> = (0..3).map(|_| strategy.get_by_round_robin().unwrap()).collect();
  assert_eq!(picks, vec!["127.0.0.1:7002", "127.0.0.1:7001", "127.0.0.1:7002"]);

  strategy.remove_member(&status(7002, 8).member);
  assert_eq!(strategy.get_by_round_robin().unwrap(), "127.0.0.1:7001");
  assert_eq!(strategy.get_by_rendezvous("any"), Some("127.0.0.1:7001".to_string()));
}
