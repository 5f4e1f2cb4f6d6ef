use crate::core::RemotingError;
use crate::testkit::{FailureConfig, FailureConfigMap};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::sleep;

type Receiver = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[derive(Default)]
struct Lines {
  nodes: HashMap<String, Receiver>,
  fail_map: FailureConfigMap,
}

/// Connects the nodes of one process by address. Every member of a cluster must be connected to
/// the same switchboard. Traffic between distinct addresses goes through the
/// [`FailureConfigMap`], so tests can make the network drop and delay messages.
#[derive(Clone, Default)]
pub struct Switchboard {
  lines: Arc<RwLock<Lines>>,
}
impl Switchboard {
  pub fn new() -> Switchboard {
    Switchboard::default()
  }

  pub fn with_failures(fail_map: FailureConfigMap) -> Switchboard {
    let switchboard = Switchboard::default();
    switchboard.set_failures(fail_map);
    switchboard
  }

  pub fn set_failures(&self, fail_map: FailureConfigMap) {
    self.write().fail_map = fail_map;
  }

  pub fn is_connected(&self, address: &str) -> bool {
    self.read().nodes.contains_key(address)
  }

  /// Removes the address. Later sends to it fail with [`RemotingError::Unreachable`].
  pub fn disconnect(&self, address: &str) -> bool {
    self.write().nodes.remove(address).is_some()
  }

  pub(in crate::core) fn connect<F>(&self, address: &str, recvr: F)
  where
    F: Fn(Vec<u8>) + Send + Sync + 'static,
  {
    self.write().nodes.insert(address.to_string(), Arc::new(recvr));
  }

  pub(in crate::core) fn send(
    &self,
    from: &str,
    to: &str,
    bytes: Vec<u8>,
  ) -> Result<(), RemotingError> {
    let (recvr, fail_cfg) = {
      let lines = self.read();
      (lines.nodes.get(to).cloned(), *lines.fail_map.get(to))
    };
    let recvr = recvr.ok_or_else(|| RemotingError::Unreachable(to.to_string()))?;
    if from == to {
      recvr(bytes);
      return Ok(());
    }
    if rand::random::<f64>() < fail_cfg.drop_prob {
      return Ok(());
    }
    match delay(&fail_cfg) {
      Some(dur) => {
        tokio::spawn(async move {
          sleep(dur).await;
          recvr(bytes);
        });
      }
      None => recvr(bytes),
    }
    Ok(())
  }

  fn read(&self) -> RwLockReadGuard<'_, Lines> {
    self.lines.read().unwrap_or_else(|p| p.into_inner())
  }

  fn write(&self) -> RwLockWriteGuard<'_, Lines> {
    self.lines.write().unwrap_or_else(|p| p.into_inner())
  }
}

fn delay(fail_cfg: &FailureConfig) -> Option<Duration> {
  fail_cfg.delay.map(|(min, max)| {
    let range = min.as_millis() as u64..=max.as_millis().max(min.as_millis()) as u64;
    Duration::from_millis(SmallRng::from_entropy().gen_range(range))
  })
}
