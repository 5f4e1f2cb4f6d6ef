use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the owner of an identity activates a grain that is not running yet.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PlacementStrategy {
  /// On the owning member itself.
  Owner,
  /// On the members hosting the kind, in weighted round robin order.
  RoundRobin,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClusterConfig {
  /// How long [`Cluster::get`](crate::cluster::Cluster::get) and activation requests wait for a
  /// reply before answering with no PID.
  ///
  /// default: 5 seconds
  pub request_timeout: Duration,
  /// How long an identity actor waits for each placement actor during handover.
  ///
  /// default: 3 seconds
  pub handover_timeout: Duration,
  /// Time between gossip rounds.
  ///
  /// default: 300 milliseconds
  pub gossip_interval: Duration,
  /// How long a gossip request waits for the peer's response.
  ///
  /// default: 500 milliseconds
  pub gossip_request_timeout: Duration,
  /// Number of peers gossiped to each round.
  ///
  /// default: 3
  pub gossip_fan_out: usize,
  /// Maximum number of member states in a single gossip message.
  ///
  /// default: 50
  pub gossip_max_send: usize,
  /// Members whose heartbeat has not been refreshed for this long are blocked from gossip. `None`
  /// disables the check.
  ///
  /// default: 20 seconds
  pub heartbeat_expiration: Option<Duration>,
  /// Bound on stopping grains and cluster actors during shutdown.
  ///
  /// default: 10 seconds
  pub shutdown_timeout: Duration,
  /// default: [`PlacementStrategy::Owner`]
  pub placement: PlacementStrategy,
}
impl Default for ClusterConfig {
  fn default() -> Self {
    ClusterConfig {
      request_timeout: Duration::from_secs(5),
      handover_timeout: Duration::from_secs(3),
      gossip_interval: Duration::from_millis(300),
      gossip_request_timeout: Duration::from_millis(500),
      gossip_fan_out: 3,
      gossip_max_send: 50,
      heartbeat_expiration: Some(Duration::from_secs(20)),
      shutdown_timeout: Duration::from_secs(10),
      placement: PlacementStrategy::Owner,
    }
  }
}
