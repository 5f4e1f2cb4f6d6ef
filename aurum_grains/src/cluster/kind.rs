use crate::cluster::{ClusterIdentity, IntraClusterMsg};
use crate::core::{Actor, Inbound, LocalRef, Node};
use std::fmt;
use std::sync::Arc;

type Spawner = Arc<dyn Fn(&Node, &ClusterIdentity, String) -> LocalRef<GrainMsg> + Send + Sync>;

/// A kind of grain this member can activate, and how to build one.
#[derive(Clone)]
pub struct Kind {
  name: String,
  spawner: Spawner,
}
impl Kind {
  pub fn new<A, F>(name: impl Into<String>, producer: F) -> Kind
  where
    F: Fn(&ClusterIdentity) -> A + Send + Sync + 'static,
    A: Actor<GrainMsg> + Send + 'static,
  {
    Kind {
      name: name.into(),
      spawner: Arc::new(
        move |node: &Node, identity: &ClusterIdentity, actor_name: String| {
          node.spawn_remote::<GrainMsg, A>(producer(identity), actor_name)
        },
      ),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn spawn(
    &self,
    node: &Node,
    identity: &ClusterIdentity,
    actor_name: String,
  ) -> LocalRef<GrainMsg> {
    (self.spawner)(node, identity, actor_name)
  }
}
impl fmt::Debug for Kind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Kind").field("name", &self.name).finish()
  }
}

pub enum GrainMsg {
  /// Always the first message a grain receives.
  Init(ClusterIdentity),
  Request(GrainRequest),
}
impl From<Inbound> for GrainMsg {
  fn from(inbound: Inbound) -> Self {
    GrainMsg::Request(GrainRequest { inbound: inbound })
  }
}

/// A message to a grain from [`Cluster::request`](crate::cluster::Cluster::request).
pub struct GrainRequest {
  inbound: Inbound,
}
impl GrainRequest {
  pub fn sender(&self) -> &str {
    self.inbound.sender()
  }

  /// `None` if the message was not a grain request.
  pub fn payload(&self) -> Option<Vec<u8>> {
    match self.inbound.decode::<IntraClusterMsg>() {
      Ok(IntraClusterMsg::GrainRequest { payload }) => Some(payload),
      _ => None,
    }
  }

  pub fn respond(self, payload: Vec<u8>) -> bool {
    match self.inbound.into_responder() {
      Some(responder) => responder
        .respond(&IntraClusterMsg::GrainResponse { payload: payload })
        .is_ok(),
      None => false,
    }
  }
}
