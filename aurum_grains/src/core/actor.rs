use crate::core::{LocalRef, Node, Pid};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

#[async_trait]
pub trait Actor<M: Send + 'static> {
  async fn pre_start(&mut self, _: &ActorContext<M>) {}
  async fn recv(&mut self, ctx: &ActorContext<M>, msg: M);
  async fn post_stop(&mut self, _: &ActorContext<M>) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorSignal {
  Term,
}

pub enum LocalActorMsg<M> {
  Msg(M),
  Signal(ActorSignal),
}

pub(in crate::core) fn local_actor_msg_convert<S: From<I>, I>(
  msg: LocalActorMsg<I>,
) -> LocalActorMsg<S> {
  match msg {
    LocalActorMsg::Msg(m) => LocalActorMsg::Msg(S::from(m)),
    LocalActorMsg::Signal(s) => LocalActorMsg::Signal(s),
  }
}

pub struct ActorContext<M> {
  pub tx: UnboundedSender<LocalActorMsg<M>>,
  pub pid: Pid,
  pub node: Node,
}
impl<M: Send + 'static> ActorContext<M> {
  pub(in crate::core) fn create_local<T: Send + 'static>(
    sender: UnboundedSender<LocalActorMsg<M>>,
  ) -> LocalRef<T>
  where
    M: From<T>,
  {
    LocalRef {
      func: Arc::new(move |x: LocalActorMsg<T>| {
        sender.send(local_actor_msg_convert(x)).is_ok()
      }),
    }
  }

  /// A reference accepting any message convertible into this actor's message type.
  pub fn local_interface<T: Send + 'static>(&self) -> LocalRef<T>
  where
    M: From<T>,
  {
    Self::create_local::<T>(self.tx.clone())
  }
}
