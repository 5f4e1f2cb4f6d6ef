use crate::core::{
  unit_single, Actor, ActorContext, ActorEntry, ActorSignal, Envelope, Inbound,
  LocalActorMsg, LocalRef, Pid, Registry, RegistryMsg, RemoteRecvr,
  RemotingError, Responder, Socket, Switchboard, Terminated, LOG_LEVEL,
};
use crate::testkit::{LogLevel, Logger, LoggerMsg};
use crate::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const REGISTRY_NAME: &str = "aurum-registry";
const LOGGER_NAME: &str = "aurum-logger";

struct NodeImpl {
  socket: Socket,
  address: String,
  rt: Handle,
  switchboard: Switchboard,
  registry: LocalRef<RegistryMsg>,
  logger: LocalRef<LoggerMsg>,
  requests: Mutex<HashMap<u64, oneshot::Sender<Vec<u8>>>>,
  request_ids: AtomicU64,
}

/// One member's actor runtime. Cloning is cheap, all clones share the same registry.
#[derive(Clone)]
pub struct Node {
  node: Arc<NodeImpl>,
}
impl Node {
  /// Starts the registry and logger of a new node and connects it to the switchboard. Must be
  /// called from within a tokio runtime.
  pub fn new(socket: Socket, switchboard: &Switchboard, log_level: LogLevel) -> Node {
    let (reg_tx, reg_rx) = unbounded_channel::<LocalActorMsg<RegistryMsg>>();
    let (log_tx, log_rx) = unbounded_channel::<LocalActorMsg<LoggerMsg>>();
    let address = socket.to_string();
    let node = Node {
      node: Arc::new(NodeImpl {
        socket: socket,
        address: address.clone(),
        rt: Handle::current(),
        switchboard: switchboard.clone(),
        registry: ActorContext::create_local(reg_tx.clone()),
        logger: ActorContext::create_local(log_tx.clone()),
        requests: Mutex::new(HashMap::new()),
        request_ids: AtomicU64::new(0),
      }),
    };
    node.start(Registry::new(), REGISTRY_NAME, reg_tx, reg_rx, None);
    node.start(Logger::new(log_level), LOGGER_NAME, log_tx, log_rx, None);
    let recvr = node.clone();
    switchboard.connect(&address, move |bytes| recvr.deliver(bytes));
    node
  }

  pub fn socket(&self) -> &Socket {
    &self.node.socket
  }

  /// `host:port`, the address other members reach this node at.
  pub fn address(&self) -> &str {
    &self.node.address
  }

  pub fn rt(&self) -> &Handle {
    &self.node.rt
  }

  pub fn switchboard(&self) -> &Switchboard {
    &self.node.switchboard
  }

  pub fn registry(&self, msg: RegistryMsg) -> bool {
    self.node.registry.send(msg)
  }

  pub fn log(&self, msg: LoggerMsg) -> bool {
    self.node.logger.send(msg)
  }

  /// Detaches this node from the switchboard. Its actors keep running but are unreachable.
  pub fn disconnect(&self) -> bool {
    self.node.switchboard.disconnect(&self.node.address)
  }

  /// Spawns an actor reachable by name for watching and stopping, but not by other members.
  pub fn spawn<M, A>(&self, actor: A, name: impl Into<String>) -> LocalRef<M>
  where
    M: Send + 'static,
    A: Actor<M> + Send + 'static,
  {
    self.spawn_registered(actor, name.into(), |_| None)
  }

  /// Spawns an actor that also receives messages sent to its [`Pid`] from other members.
  pub fn spawn_remote<M, A>(&self, actor: A, name: impl Into<String>) -> LocalRef<M>
  where
    M: From<Inbound> + Send + 'static,
    A: Actor<M> + Send + 'static,
  {
    self.spawn_registered(actor, name.into(), |tx| {
      let tx = tx.clone();
      let recvr: RemoteRecvr = Box::new(move |inbound: Inbound| {
        tx.send(LocalActorMsg::Msg(M::from(inbound))).is_ok()
      });
      Some(recvr)
    })
  }

  fn spawn_registered<M, A, F>(&self, actor: A, name: String, remote: F) -> LocalRef<M>
  where
    M: Send + 'static,
    A: Actor<M> + Send + 'static,
    F: FnOnce(&UnboundedSender<LocalActorMsg<M>>) -> Option<RemoteRecvr>,
  {
    let (tx, rx) = unbounded_channel::<LocalActorMsg<M>>();
    let local = ActorContext::<M>::create_local::<M>(tx.clone());
    let (confirm_tx, confirm_rx) = oneshot::channel();
    // Registered before the task starts, so a watch sent right after spawning finds the entry.
    self.registry(RegistryMsg::Register(
      name.clone(),
      ActorEntry::new(remote(&tx), local.clone()),
      confirm_tx,
    ));
    self.start(actor, &name, tx, rx, Some(confirm_rx));
    local
  }

  fn start<M, A>(
    &self,
    actor: A,
    name: &str,
    tx: UnboundedSender<LocalActorMsg<M>>,
    rx: UnboundedReceiver<LocalActorMsg<M>>,
    registration: Option<oneshot::Receiver<bool>>,
  ) where
    M: Send + 'static,
    A: Actor<M> + Send + 'static,
  {
    let ctx = ActorContext {
      tx: tx,
      pid: Pid::new(self.address(), name),
      node: self.clone(),
    };
    self.node.rt.spawn(unit_single(actor, ctx, rx, registration));
  }

  pub fn schedule_local_msg<T: Send + 'static>(
    &self,
    delay: Duration,
    actor: LocalRef<T>,
    msg: T,
  ) -> JoinHandle<bool> {
    self.node.rt.spawn(async move {
      tokio::time::sleep(delay).await;
      actor.send(msg)
    })
  }

  /// Fire-and-forget delivery to an actor spawned with [`Node::spawn_remote`].
  pub fn send<T: Serialize>(&self, pid: &Pid, msg: &T) -> Result<(), RemotingError> {
    let env = Envelope::Message {
      dest: pid.id.clone(),
      sender: self.node.address.clone(),
      payload: serde_cbor::to_vec(msg)?,
    };
    self.transmit(&pid.address, &env)
  }

  /// Sends a request and waits for the [`Responder`] on the other end, at most `timeout`.
  pub async fn request<Req, Resp>(
    &self,
    pid: &Pid,
    msg: &Req,
    timeout: Duration,
  ) -> Result<Resp, RemotingError>
  where
    Req: Serialize + Sync,
    Resp: DeserializeOwned,
  {
    let payload = serde_cbor::to_vec(msg)?;
    let id = self.node.request_ids.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    self.requests().insert(id, tx);
    let env = Envelope::Request {
      id: id,
      dest: pid.id.clone(),
      sender: self.node.address.clone(),
      payload: payload,
    };
    if let Err(e) = self.transmit(&pid.address, &env) {
      self.forget_request(id);
      return Err(e);
    }
    match tokio::time::timeout(timeout, rx).await {
      Ok(Ok(bytes)) => Ok(serde_cbor::from_slice(&bytes)?),
      Ok(Err(_)) => Err(RemotingError::Closed),
      Err(_) => {
        self.forget_request(id);
        Err(RemotingError::Timeout)
      }
    }
  }

  /// Watches a local actor. Watching a name that is not registered yields [`Terminated`] at once.
  pub fn watch(&self, pid: &Pid, watcher: LocalRef<Terminated>) {
    if self.is_local(pid) {
      self.registry(RegistryMsg::Watch(pid.id.clone(), watcher));
    }
  }

  pub fn stop(&self, pid: &Pid) {
    if self.is_local(pid) {
      self.registry(RegistryMsg::Signal(pid.id.clone(), ActorSignal::Term));
    }
  }

  /// Stops a local actor and resolves once it is gone. `false` if `pid` is not local.
  pub async fn poison(&self, pid: &Pid) -> bool {
    if !self.is_local(pid) {
      warn!(LOG_LEVEL, self, format!("Cannot poison remote actor {}", pid));
      return false;
    }
    let (tx, rx) = oneshot::channel();
    self.watch(pid, LocalRef::once(tx));
    self.stop(pid);
    rx.await.is_ok()
  }

  fn is_local(&self, pid: &Pid) -> bool {
    pid.address == self.node.address
  }

  pub(in crate::core) fn transmit(
    &self,
    address: &str,
    env: &Envelope,
  ) -> Result<(), RemotingError> {
    let bytes = env.serialize()?;
    self.node.switchboard.send(&self.node.address, address, bytes)
  }

  fn deliver(&self, bytes: Vec<u8>) {
    match Envelope::deserialize(&bytes) {
      Ok(Envelope::Message {
        dest,
        sender,
        payload,
      }) => {
        self.registry(RegistryMsg::Forward(dest, Inbound::new(sender, payload, None)));
      }
      Ok(Envelope::Request {
        id,
        dest,
        sender,
        payload,
      }) => {
        let responder = Responder::new(self.clone(), sender.clone(), id);
        let inbound = Inbound::new(sender, payload, Some(responder));
        self.registry(RegistryMsg::Forward(dest, inbound));
      }
      Ok(Envelope::Response { id, payload }) => match self.forget_request(id) {
        Some(tx) => {
          let _ = tx.send(payload);
        }
        None => {
          debug!(LOG_LEVEL, self, format!("Late response to request {}", id));
        }
      },
      Err(e) => {
        warn!(LOG_LEVEL, self, format!("Dropping undecodable envelope: {}", e));
      }
    }
  }

  fn requests(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Vec<u8>>>> {
    self.node.requests.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn forget_request(&self, id: u64) -> Option<oneshot::Sender<Vec<u8>>> {
    self.requests().remove(&id)
  }
}
