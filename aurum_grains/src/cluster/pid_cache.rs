use crate::cluster::ClusterIdentity;
use crate::core::Pid;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Where this member last found each grain. Shared by every clone.
#[derive(Clone, Default)]
pub struct PidCache {
  pids: Arc<RwLock<HashMap<ClusterIdentity, Pid>>>,
}
impl PidCache {
  pub fn new() -> PidCache {
    PidCache::default()
  }

  fn read(&self) -> RwLockReadGuard<'_, HashMap<ClusterIdentity, Pid>> {
    self.pids.read().unwrap_or_else(|p| p.into_inner())
  }

  fn write(&self) -> RwLockWriteGuard<'_, HashMap<ClusterIdentity, Pid>> {
    self.pids.write().unwrap_or_else(|p| p.into_inner())
  }

  pub fn get(&self, identity: &ClusterIdentity) -> Option<Pid> {
    self.read().get(identity).cloned()
  }

  pub fn set(&self, identity: ClusterIdentity, pid: Pid) {
    self.write().insert(identity, pid);
  }

  /// Evicts `identity` only if it is still cached at `pid`.
  pub fn remove_by_pid(&self, identity: &ClusterIdentity, pid: &Pid) -> bool {
    let mut pids = self.write();
    if pids.get(identity) == Some(pid) {
      pids.remove(identity);
      true
    } else {
      false
    }
  }

  /// Evicts every grain hosted at `address`. Returns how many were evicted.
  pub fn remove_by_member(&self, address: &str) -> usize {
    let mut pids = self.write();
    let before = pids.len();
    pids.retain(|_, pid| pid.address != address);
    before - pids.len()
  }

  pub fn len(&self) -> usize {
    self.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.read().is_empty()
  }
}

#[test]
fn test_pid_cache_eviction() {
  let cache = PidCache::new();
  let alice = ClusterIdentity::new("alice", "user");
  let bob = ClusterIdentity::new("bob", "user");
  let carol = ClusterIdentity::new("carol", "user");
  cache.set(alice.clone(), Pid::new("127.0.0.1:7000", "a"));
  cache.set(bob.clone(), Pid::new("127.0.0.1:7000", "b"));
  cache.set(carol.clone(), Pid::new("127.0.0.1:7001", "c"));

  assert!(!cache.remove_by_pid(&alice, &Pid::new("127.0.0.1:7001", "a")));
  assert!(cache.remove_by_pid(&alice, &Pid::new("127.0.0.1:7000", "a")));
  assert!(cache.get(&alice).is_none());

  let shared = cache.clone();
  assert_eq!(shared.remove_by_member("127.0.0.1:7000"), 1);
  assert!(cache.get(&bob).is_none());
  assert_eq!(cache.get(&carol), Some(Pid::new("127.0.0.1:7001", "c")));
  assert_eq!(cache.len(), 1);
}
