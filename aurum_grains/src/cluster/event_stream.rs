use crate::cluster::{ClusterEvent, ClusterEventType, EVENT_STREAM_NAME, LOG_LEVEL};
use crate::core::{Actor, ActorContext, ActorSignal, LocalRef, Node};
use crate::trace;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Subscription(u64);

pub enum EventStreamMsg {
  Subscribe(Subscription, LocalRef<ClusterEvent>, Vec<ClusterEventType>),
  Unsubscribe(Subscription),
  Publish(ClusterEvent),
}

struct Subscriber {
  subscription: Subscription,
  recvr: LocalRef<ClusterEvent>,
  types: Vec<ClusterEventType>,
}
impl Subscriber {
  fn wants(&self, event: &ClusterEvent) -> bool {
    self.types.is_empty() || self.types.contains(&event.event_type())
  }
}

/// Fans cluster events out to subscribers in publication order. Subscribers that can no longer
/// receive are dropped.
pub struct EventStream {
  subscribers: Vec<Subscriber>,
}
impl EventStream {
  pub fn new() -> EventStream {
    EventStream {
      subscribers: Vec::new(),
    }
  }
}
#[async_trait]
impl Actor<EventStreamMsg> for EventStream {
  async fn recv(&mut self, ctx: &ActorContext<EventStreamMsg>, msg: EventStreamMsg) {
    match msg {
      EventStreamMsg::Subscribe(subscription, recvr, types) => {
        self.subscribers.push(Subscriber {
          subscription: subscription,
          recvr: recvr,
          types: types,
        });
      }
      EventStreamMsg::Unsubscribe(subscription) => {
        self.subscribers.retain(|s| s.subscription != subscription);
      }
      EventStreamMsg::Publish(event) => {
        let before = self.subscribers.len();
        self
          .subscribers
          .retain(|s| !s.wants(&event) || s.recvr.send(event.clone()));
        if self.subscribers.len() != before {
          trace!(
            LOG_LEVEL,
            &ctx.node,
            format!("Dropped {} subscribers", before - self.subscribers.len())
          );
        }
      }
    }
  }
}

/// Handle to a cluster's event stream actor.
#[derive(Clone)]
pub struct EventStreamRef {
  actor: LocalRef<EventStreamMsg>,
  ids: Arc<AtomicU64>,
}
impl EventStreamRef {
  pub fn spawn(node: &Node) -> EventStreamRef {
    EventStreamRef {
      actor: node.spawn(EventStream::new(), EVENT_STREAM_NAME),
      ids: Arc::new(AtomicU64::new(0)),
    }
  }

  /// An empty `types` subscribes to every event.
  pub fn subscribe(
    &self,
    recvr: LocalRef<ClusterEvent>,
    types: Vec<ClusterEventType>,
  ) -> Subscription {
    let subscription = Subscription(self.ids.fetch_add(1, Ordering::Relaxed));
    self
      .actor
      .send(EventStreamMsg::Subscribe(subscription, recvr, types));
    subscription
  }

  pub fn unsubscribe(&self, subscription: Subscription) {
    self.actor.send(EventStreamMsg::Unsubscribe(subscription));
  }

  pub fn publish(&self, event: ClusterEvent) -> bool {
    self.actor.send(EventStreamMsg::Publish(event))
  }

  pub fn stop(&self) -> bool {
    self.actor.signal(ActorSignal::Term)
  }
}
