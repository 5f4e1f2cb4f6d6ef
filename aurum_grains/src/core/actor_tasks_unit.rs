use crate::core::{
  Actor, ActorContext, ActorSignal, LocalActorMsg, RegistryMsg, LOG_LEVEL,
};
use crate::warn;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot::Receiver;

pub(in crate::core) async fn unit_single<M, A>(
  mut actor: A,
  ctx: ActorContext<M>,
  mut rx: UnboundedReceiver<LocalActorMsg<M>>,
  registration: Option<Receiver<bool>>,
) where
  M: Send + 'static,
  A: Actor<M> + Send + 'static,
{
  let registered = match registration {
    Some(confirmation) => {
      if !confirmation.await.unwrap_or(false) {
        warn!(
          LOG_LEVEL,
          &ctx.node,
          format!("{} was not registered, it will not start", ctx.pid)
        );
        return;
      }
      true
    }
    None => false,
  };
  actor.pre_start(&ctx).await;
  loop {
    match rx.recv().await {
      Some(LocalActorMsg::Msg(msg)) => actor.recv(&ctx, msg).await,
      Some(LocalActorMsg::Signal(ActorSignal::Term)) | None => break,
    }
  }
  // Anything sent from here on is refused, so scheduled messages notice the actor is gone.
  rx.close();
  actor.post_stop(&ctx).await;
  if registered {
    ctx.node.registry(RegistryMsg::Deregister(ctx.pid.id.clone()));
  }
}
