use crate::cluster::gossip::{
  ConsensusCheck, ConsensusCheckBuilder, ConsensusHandle, GossipActor, GossipMsg,
};
use crate::cluster::partition::PartitionManager;
use crate::cluster::{
  ClusterConfig, ClusterEvent, ClusterEventType, ClusterIdentity, ClusterTopology,
  EventStreamRef, IntraClusterMsg, Kind, Member, MemberList, PidCache, Subscription,
  GOSSIP_ACTOR_NAME, LOG_LEVEL,
};
use crate::core::{LocalRef, Node, Pid, RemotingError};
use crate::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

struct ClusterInner {
  node: Node,
  member: Member,
  config: ClusterConfig,
  events: EventStreamRef,
  partition: PartitionManager,
  gossip: LocalRef<GossipMsg>,
  members: Mutex<MemberList>,
  pid_cache: PidCache,
  topology_consensus: ConsensusHandle,
  subscriptions: Vec<Subscription>,
}

/// This member's view of the cluster. Cloning is cheap, all clones share the same actors.
#[derive(Clone)]
pub struct Cluster {
  inner: Arc<ClusterInner>,
}
impl Cluster {
  /// Spawns the event stream, gossip, identity and placement actors of `member` on `node`. The
  /// cluster has no topology until [`Cluster::update_topology`] is called.
  pub fn start(node: &Node, member: Member, config: ClusterConfig, kinds: Vec<Kind>) -> Cluster {
    let events = EventStreamRef::spawn(node);
    let partition = PartitionManager::start(node, config.clone(), events.clone(), kinds);
    let (gossip_actor, topology_consensus) =
      GossipActor::new(&member, config.clone(), events.clone());
    let gossip: LocalRef<GossipMsg> = node.spawn_remote(gossip_actor, GOSSIP_ACTOR_NAME);
    let gossip_topology = events.subscribe(
      gossip.transform::<ClusterEvent>(),
      vec![ClusterEventType::Topology],
    );
    let pid_cache = PidCache::new();
    let evictions = {
      let pid_cache = pid_cache.clone();
      LocalRef::new(move |event: ClusterEvent| {
        match event {
          ClusterEvent::ActivationTerminated(activation) => {
            pid_cache.remove_by_pid(&activation.identity, &activation.pid);
          }
          ClusterEvent::Topology(topology) => {
            for member in &topology.left {
              pid_cache.remove_by_member(&member.address());
            }
          }
          _ => {}
        }
        true
      })
    };
    let evictions = events.subscribe(
      evictions,
      vec![ClusterEventType::ActivationTerminated, ClusterEventType::Topology],
    );
    Cluster {
      inner: Arc::new(ClusterInner {
        node: node.clone(),
        member: member,
        config: config,
        events: events,
        partition: partition,
        gossip: gossip,
        members: Mutex::new(MemberList::new()),
        pid_cache: pid_cache,
        topology_consensus: topology_consensus,
        subscriptions: vec![gossip_topology, evictions],
      }),
    }
  }

  pub fn node(&self) -> &Node {
    &self.inner.node
  }

  pub fn member(&self) -> &Member {
    &self.inner.member
  }

  pub fn config(&self) -> &ClusterConfig {
    &self.inner.config
  }

  pub fn events(&self) -> &EventStreamRef {
    &self.inner.events
  }

  pub fn partition(&self) -> &PartitionManager {
    &self.inner.partition
  }

  pub fn pid_cache(&self) -> &PidCache {
    &self.inner.pid_cache
  }

  fn members(&self) -> MutexGuard<'_, MemberList> {
    self.inner.members.lock().unwrap_or_else(|p| p.into_inner())
  }

  /// Reports the current membership. Publishes and returns a new topology unless the membership
  /// is the one already published.
  pub fn update_topology(&self, members: Vec<Member>) -> Option<Arc<ClusterTopology>> {
    let mut list = self.members();
    let topology = Arc::new(list.update_cluster_topology(members)?);
    info!(
      LOG_LEVEL,
      &self.inner.node,
      format!(
        "Topology {} (event {}): {} members, {} joined, {} left",
        topology.topology_hash,
        topology.event_id,
        topology.members.len(),
        topology.joined.len(),
        topology.left.len()
      )
    );
    // Published under the lock, so subscribers see topologies in event id order.
    self.inner.events.publish(ClusterEvent::Topology(topology.clone()));
    Some(topology)
  }

  /// The members of the latest topology.
  pub fn member_list(&self) -> Vec<Arc<Member>> {
    self.members().members()
  }

  /// Address of the next member to activate a grain of `kind` on.
  pub fn get_activator(&self, kind: &str) -> Option<String> {
    self.members().get_activator(kind)
  }

  /// Where `identity` runs, activating it if it is not running anywhere. `None` is not proof
  /// that the grain cannot exist, callers should retry.
  pub async fn get(&self, identity: &ClusterIdentity) -> Option<Pid> {
    if let Some(pid) = self.inner.pid_cache.get(identity) {
      return Some(pid);
    }
    let pid = self.inner.partition.get(identity).await?;
    self.inner.pid_cache.set(identity.clone(), pid.clone());
    Some(pid)
  }

  /// Evicts a PID the caller found to be stale.
  pub fn remove_pid(&self, identity: &ClusterIdentity, pid: &Pid) -> bool {
    self.inner.pid_cache.remove_by_pid(identity, pid)
  }

  /// Sends `payload` to the grain and waits for its reply. A failed call evicts the cached PID and
  /// is retried once against a freshly resolved one.
  pub async fn request(&self, identity: &ClusterIdentity, payload: Vec<u8>) -> Option<Vec<u8>> {
    let request = IntraClusterMsg::GrainRequest { payload: payload };
    for _ in 0..2 {
      let pid = self.get(identity).await?;
      let timeout = self.inner.config.request_timeout;
      let reply = self
        .inner
        .node
        .request::<IntraClusterMsg, IntraClusterMsg>(&pid, &request, timeout)
        .await;
      match reply {
        Ok(IntraClusterMsg::GrainResponse { payload }) => return Some(payload),
        Ok(other) => {
          debug!(
            LOG_LEVEL,
            &self.inner.node,
            format!("Unexpected reply from {}: {:?}", pid, other)
          );
        }
        Err(e) => {
          debug!(LOG_LEVEL, &self.inner.node, format!("Request to {} failed: {}", pid, e));
        }
      }
      self.remove_pid(identity, &pid);
    }
    None
  }

  /// Publishes this member's value for `key` through gossip.
  pub fn set_state<T: Serialize>(&self, key: &str, value: &T) -> Result<(), RemotingError> {
    let bytes = serde_cbor::to_vec(value)?;
    if self
      .inner
      .gossip
      .send(GossipMsg::SetState(key.to_string(), bytes))
    {
      Ok(())
    } else {
      Err(RemotingError::Closed)
    }
  }

  /// Every member's value for `key` as far as gossip has spread it. Values that do not decode as
  /// `T` are left out.
  pub async fn get_state<T: DeserializeOwned>(&self, key: &str) -> HashMap<String, T> {
    let (tx, rx) = oneshot::channel();
    if !self.inner.gossip.send(GossipMsg::GetState(key.to_string(), tx)) {
      return HashMap::new();
    }
    rx.await
      .unwrap_or_default()
      .into_iter()
      .filter_map(|(member, kv)| Some((member, serde_cbor::from_slice(&kv.value).ok()?)))
      .collect()
  }

  /// Watches for all members agreeing on their value for `key`.
  pub fn register_consensus_check(&self, key: &str) -> ConsensusHandle {
    let (check, handle) = ConsensusCheckBuilder::new(key).build();
    self.add_consensus_check(check);
    handle
  }

  pub fn add_consensus_check(&self, check: ConsensusCheck) -> bool {
    self.inner.gossip.send(GossipMsg::AddConsensusCheck(check))
  }

  pub fn remove_consensus_check(&self, id: &str) -> bool {
    self
      .inner
      .gossip
      .send(GossipMsg::RemoveConsensusCheck(id.to_string()))
  }

  /// Agreement of all members on the topology hash.
  pub fn topology_consensus(&self) -> ConsensusHandle {
    self.inner.topology_consensus.clone()
  }

  /// An empty `types` subscribes to every event.
  pub fn subscribe(
    &self,
    recvr: LocalRef<ClusterEvent>,
    types: Vec<ClusterEventType>,
  ) -> Subscription {
    self.inner.events.subscribe(recvr, types)
  }

  pub fn unsubscribe(&self, subscription: Subscription) {
    self.inner.events.unsubscribe(subscription)
  }

  /// Stops every grain and cluster actor on this member and detaches the node. A graceful
  /// shutdown first tells the other members through gossip.
  pub async fn shutdown(&self, graceful: bool) {
    let inner = &self.inner;
    if graceful {
      let (tx, rx) = oneshot::channel();
      if inner.gossip.send(GossipMsg::Leave(tx)) {
        let _ = tokio::time::timeout(inner.config.shutdown_timeout, rx).await;
      }
    }
    inner.partition.stop().await;
    let gossip = Pid::new(inner.node.address(), GOSSIP_ACTOR_NAME);
    inner.node.poison(&gossip).await;
    for subscription in &inner.subscriptions {
      inner.events.unsubscribe(*subscription);
    }
    inner.events.stop();
    inner.node.disconnect();
    info!(LOG_LEVEL, &inner.node, format!("{} left the cluster", inner.member.id));
  }
}
