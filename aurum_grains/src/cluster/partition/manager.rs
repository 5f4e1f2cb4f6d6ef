use crate::cluster::partition::{IdentityActor, IdentityMsg, PlacementActor, PlacementMsg};
use crate::cluster::{
  Activation, ClusterConfig, ClusterEvent, ClusterEventType, ClusterIdentity, EventStreamRef,
  IntraClusterMsg, Kind, Rendezvous, Subscription, IDENTITY_ACTOR_NAME, LOG_LEVEL,
  PLACEMENT_ACTOR_NAME,
};
use crate::core::{LocalRef, Node, Pid};
use crate::{debug, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::oneshot;

/// Runs the identity and placement actors of this member and resolves identities to PIDs.
pub struct PartitionManager {
  node: Node,
  config: ClusterConfig,
  events: EventStreamRef,
  rendezvous: Arc<RwLock<Arc<Rendezvous>>>,
  identity: LocalRef<IdentityMsg>,
  placement: LocalRef<PlacementMsg>,
  subscription: Subscription,
}
impl PartitionManager {
  pub fn start(
    node: &Node,
    config: ClusterConfig,
    events: EventStreamRef,
    kinds: Vec<Kind>,
  ) -> PartitionManager {
    let placement = node.spawn_remote(
      PlacementActor::new(config.clone(), kinds),
      PLACEMENT_ACTOR_NAME,
    );
    let identity = node.spawn_remote(
      IdentityActor::new(config.clone(), events.clone()),
      IDENTITY_ACTOR_NAME,
    );
    let rendezvous = Arc::new(RwLock::new(Arc::new(Rendezvous::new())));
    let recvr = {
      let rendezvous = rendezvous.clone();
      let identity = identity.clone();
      let placement = placement.clone();
      LocalRef::new(move |event: ClusterEvent| {
        if let ClusterEvent::Topology(topology) = event {
          let rdv = Arc::new(Rendezvous::from_members(&topology.members));
          *rendezvous.write().unwrap_or_else(|p| p.into_inner()) = rdv;
          placement.send(PlacementMsg::Topology(topology.clone()));
          identity.send(IdentityMsg::Topology(topology));
        }
        true
      })
    };
    let subscription = events.subscribe(recvr, vec![ClusterEventType::Topology]);
    PartitionManager {
      node: node.clone(),
      config: config,
      events: events,
      rendezvous: rendezvous,
      identity: identity,
      placement: placement,
      subscription: subscription,
    }
  }

  fn rendezvous(&self) -> Arc<Rendezvous> {
    self
      .rendezvous
      .read()
      .unwrap_or_else(|p| p.into_inner())
      .clone()
  }

  /// Address of the member owning `identity` under the latest topology.
  pub fn owner(&self, identity: &ClusterIdentity) -> Option<String> {
    self.rendezvous().get_by_identity(identity).map(|m| m.address())
  }

  /// Asks the owner's identity actor for the grain, activating it if necessary. `None` means no
  /// answer yet and is worth retrying.
  pub async fn get(&self, identity: &ClusterIdentity) -> Option<Pid> {
    let owner = match self.owner(identity) {
      Some(owner) => owner,
      None => {
        debug!(LOG_LEVEL, &self.node, format!("No owner for {}", identity));
        return None;
      }
    };
    let pid = Pid::new(owner, IDENTITY_ACTOR_NAME);
    let request = IntraClusterMsg::ActivationRequest {
      identity: identity.clone(),
    };
    let reply = self
      .node
      .request::<IntraClusterMsg, IntraClusterMsg>(&pid, &request, self.config.request_timeout)
      .await;
    match reply {
      Ok(IntraClusterMsg::ActivationResponse { pid }) => pid,
      Ok(other) => {
        warn!(
          LOG_LEVEL,
          &self.node,
          format!("Unexpected activation response from {}: {:?}", pid, other)
        );
        None
      }
      Err(e) => {
        debug!(LOG_LEVEL, &self.node, format!("Activation of {} failed: {}", identity, e));
        None
      }
    }
  }

  /// The identity actor's ownership table, keyed by identity key.
  pub async fn lookup(&self) -> Option<BTreeMap<String, Activation>> {
    let (tx, rx) = oneshot::channel();
    if !self.identity.send(IdentityMsg::Lookup(tx)) {
      return None;
    }
    rx.await.ok()
  }

  /// The grains running on this member.
  pub async fn activations(&self) -> Option<Vec<Activation>> {
    let (tx, rx) = oneshot::channel();
    if !self.placement.send(PlacementMsg::Activations(tx)) {
      return None;
    }
    rx.await.ok()
  }

  /// Stops the placement actor, and with it every local grain, then the identity actor.
  pub async fn stop(&self) {
    self.events.unsubscribe(self.subscription);
    let placement = Pid::new(self.node.address(), PLACEMENT_ACTOR_NAME);
    let stopped =
      tokio::time::timeout(self.config.shutdown_timeout, self.node.poison(&placement)).await;
    if stopped.is_err() {
      warn!(LOG_LEVEL, &self.node, "Timed out stopping the placement actor");
    }
    let identity = Pid::new(self.node.address(), IDENTITY_ACTOR_NAME);
    self.node.poison(&identity).await;
  }
}
