use crate::core::{
  Actor, ActorContext, ActorSignal, Inbound, LocalRef, Pid, LOG_LEVEL,
};
use crate::{debug, trace, warn};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::oneshot::Sender;

pub type RemoteRecvr = Box<dyn Fn(Inbound) -> bool + Send>;

/// Delivered to watchers once the actor has stopped and left the registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Terminated(pub Pid);

pub struct ActorEntry {
  remote: Option<RemoteRecvr>,
  signal: Box<dyn Fn(ActorSignal) -> bool + Send>,
  watchers: Vec<LocalRef<Terminated>>,
}
impl ActorEntry {
  pub fn new<M: Send + 'static>(
    remote: Option<RemoteRecvr>,
    local: LocalRef<M>,
  ) -> ActorEntry {
    ActorEntry {
      remote: remote,
      signal: Box::new(move |sig| local.signal(sig)),
      watchers: Vec::new(),
    }
  }
}

pub enum RegistryMsg {
  Register(String, ActorEntry, Sender<bool>),
  Deregister(String),
  Forward(String, Inbound),
  Watch(String, LocalRef<Terminated>),
  Signal(String, ActorSignal),
}

pub struct Registry {
  register: HashMap<String, ActorEntry>,
}
impl Registry {
  pub fn new() -> Registry {
    Registry {
      register: HashMap::new(),
    }
  }
}
#[async_trait]
impl Actor<RegistryMsg> for Registry {
  async fn recv(&mut self, ctx: &ActorContext<RegistryMsg>, msg: RegistryMsg) {
    match msg {
      RegistryMsg::Register(name, entry, confirmation) => {
        if self.register.contains_key(&name) {
          warn!(
            LOG_LEVEL,
            &ctx.node,
            format!("Actor name {} is taken, rejecting registration", name)
          );
          let _ = confirmation.send(false);
          return;
        }
        trace!(LOG_LEVEL, &ctx.node, format!("Registering {}", name));
        self.register.insert(name.clone(), entry);
        if confirmation.send(true).is_err() {
          debug!(
            LOG_LEVEL,
            &ctx.node,
            format!("Could not confirm {}, removing from registry", name)
          );
          self.register.remove(&name);
        }
      }
      RegistryMsg::Deregister(name) => {
        trace!(LOG_LEVEL, &ctx.node, format!("Deregistering {}", name));
        if let Some(entry) = self.register.remove(&name) {
          let pid = Pid::new(ctx.node.address(), name);
          for watcher in entry.watchers {
            watcher.send(Terminated(pid.clone()));
          }
        }
      }
      RegistryMsg::Forward(name, inbound) => match self.register.get(&name) {
        Some(ActorEntry {
          remote: Some(recvr),
          ..
        }) => {
          if !recvr(inbound) {
            debug!(
              LOG_LEVEL,
              &ctx.node,
              format!("Forward to {} failed, actor is stopping", name)
            );
          }
        }
        Some(_) => {
          warn!(
            LOG_LEVEL,
            &ctx.node,
            format!("{} does not accept remote messages", name)
          );
        }
        None => {
          debug!(
            LOG_LEVEL,
            &ctx.node,
            format!("Cannot send to {}, not in register", name)
          );
        }
      },
      RegistryMsg::Watch(name, watcher) => match self.register.get_mut(&name) {
        Some(entry) => entry.watchers.push(watcher),
        None => {
          watcher.send(Terminated(Pid::new(ctx.node.address(), name)));
        }
      },
      RegistryMsg::Signal(name, sig) => {
        if let Some(entry) = self.register.get(&name) {
          (entry.signal)(sig);
        }
      }
    }
  }
}
