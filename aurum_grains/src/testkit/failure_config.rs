use im::HashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Default, Serialize, Deserialize, Clone, Copy, Debug)]
pub struct FailureConfig {
  pub drop_prob: f64,
  pub delay: Option<(Duration, Duration)>,
}

/// Failure settings keyed by destination address, falling back to `cluster_wide`.
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct FailureConfigMap {
  pub cluster_wide: FailureConfig,
  pub node_wide: HashMap<String, FailureConfig>,
}
impl FailureConfigMap {
  pub fn get(&self, address: &str) -> &FailureConfig {
    self.node_wide.get(address).unwrap_or(&self.cluster_wide)
  }
}

#[test]
fn test_failure_config_map_fallback() {
  let mut map = FailureConfigMap::default();
  map.cluster_wide.drop_prob = 0.25;
  map.node_wide.insert(
    "127.0.0.1:5501".to_string(),
    FailureConfig {
      drop_prob: 1.0,
      delay: Some((Duration::from_millis(1), Duration::from_millis(5))),
    },
  );
  assert_eq!(map.get("127.0.0.1:5501").drop_prob, 1.0);
  assert_eq!(map.get("127.0.0.1:5502").drop_prob, 0.25);
  assert!(map.get("127.0.0.1:5502").delay.is_none());
}
