use async_trait::async_trait;
use aurum_grains::core::{
  Actor, ActorContext, Host, Inbound, LocalRef, Node, Pid, RemotingError, Socket, Switchboard,
  Terminated,
};
use aurum_grains::testkit::{FailureConfig, FailureConfigMap, LogLevel};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

struct DataMsg(Inbound);
impl From<Inbound> for DataMsg {
  fn from(inbound: Inbound) -> Self {
    DataMsg(inbound)
  }
}

/// Doubles every number it is asked about, and reports every number it is told.
struct Doubler {
  told: mpsc::UnboundedSender<u64>,
  stopped: Option<oneshot::Sender<()>>,
}
#[async_trait]
impl Actor<DataMsg> for Doubler {
  async fn recv(&mut self, _: &ActorContext<DataMsg>, msg: DataMsg) {
    let (n, responder) = msg.0.into_parts::<u64>().unwrap();
    match responder {
      Some(responder) => responder.respond(&(n * 2)).unwrap(),
      None => self.told.send(n).unwrap(),
    }
  }

  async fn post_stop(&mut self, _: &ActorContext<DataMsg>) {
    if let Some(tx) = self.stopped.take() {
      let _ = tx.send(());
    }
  }
}

/// Never answers.
struct Mute;
#[async_trait]
impl Actor<DataMsg> for Mute {
  async fn recv(&mut self, _: &ActorContext<DataMsg>, _: DataMsg) {}
}

fn node(switchboard: &Switchboard, port: u16) -> Node {
  Node::new(Socket::new(Host::from("127.0.0.1"), port), switchboard, LogLevel::Off)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remoting_test_request_and_send() {
  let switchboard = Switchboard::new();
  let server = node(&switchboard, 6300);
  let client = node(&switchboard, 6301);
  let (tx, mut rx) = mpsc::unbounded_channel();
  let _: LocalRef<DataMsg> = server.spawn_remote(
    Doubler {
      told: tx,
      stopped: None,
    },
    "doubler",
  );
  let pid = Pid::new(server.address(), "doubler");

  let reply: u64 = client
    .request(&pid, &21u64, Duration::from_secs(2))
    .await
    .unwrap();
  assert_eq!(reply, 42);

  for n in 0..5u64 {
    client.send(&pid, &n).unwrap();
  }
  for n in 0..5u64 {
    assert_eq!(rx.recv().await, Some(n));
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remoting_test_request_timeout() {
  let switchboard = Switchboard::new();
  let server = node(&switchboard, 6310);
  let client = node(&switchboard, 6311);
  let _: LocalRef<DataMsg> = server.spawn_remote(Mute, "mute");

  let mute = Pid::new(server.address(), "mute");
  let reply = client
    .request::<u64, u64>(&mute, &1, Duration::from_millis(100))
    .await;
  assert!(matches!(reply, Err(RemotingError::Timeout)));

  // Nobody is registered under this name, so nobody answers either.
  let missing = Pid::new(server.address(), "missing");
  let reply = client
    .request::<u64, u64>(&missing, &1, Duration::from_millis(100))
    .await;
  assert!(matches!(reply, Err(RemotingError::Timeout)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remoting_test_unreachable() {
  let switchboard = Switchboard::new();
  let client = node(&switchboard, 6320);
  let nowhere = Pid::new("127.0.0.1:6329", "doubler");
  let reply = client
    .request::<u64, u64>(&nowhere, &1, Duration::from_secs(5))
    .await;
  assert!(matches!(reply, Err(RemotingError::Unreachable(_))));
  assert!(client.send(&nowhere, &1u64).is_err());

  let server = node(&switchboard, 6321);
  assert!(switchboard.is_connected(server.address()));
  assert!(server.disconnect());
  assert!(!switchboard.is_connected(server.address()));
  let gone = Pid::new(server.address(), "doubler");
  assert!(client.send(&gone, &1u64).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remoting_test_watch_and_poison() {
  let switchboard = Switchboard::new();
  let server = node(&switchboard, 6330);
  let (told, _rx) = mpsc::unbounded_channel();
  let (stopped_tx, stopped_rx) = oneshot::channel();
  let _: LocalRef<DataMsg> = server.spawn_remote(
    Doubler {
      told: told,
      stopped: Some(stopped_tx),
    },
    "doubler",
  );
  let pid = Pid::new(server.address(), "doubler");

  let (watch_tx, watch_rx) = oneshot::channel();
  server.watch(&pid, LocalRef::once(watch_tx));
  assert!(server.poison(&pid).await);
  assert!(stopped_rx.await.is_ok());
  let Terminated(terminated) = watch_rx.await.unwrap();
  assert_eq!(terminated, pid);

  // The name is free again once the actor is gone.
  let (told, _rx) = mpsc::unbounded_channel();
  let _: LocalRef<DataMsg> = server.spawn_remote(
    Doubler {
      told: told,
      stopped: None,
    },
    "doubler",
  );
  let reply: u64 = server
    .request(&pid, &4u64, Duration::from_secs(2))
    .await
    .unwrap();
  assert_eq!(reply, 8);

  // Watching a name nobody holds terminates at once.
  let (tx, rx) = oneshot::channel();
  server.watch(&Pid::new(server.address(), "nobody"), LocalRef::once(tx));
  assert!(rx.await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remoting_test_dropped_messages() {
  let mut fail_map = FailureConfigMap::default();
  fail_map.node_wide.insert(
    "127.0.0.1:6340".to_string(),
    FailureConfig {
      drop_prob: 1.0,
      delay: None,
    },
  );
  let switchboard = Switchboard::with_failures(fail_map);
  let server = node(&switchboard, 6340);
  let client = node(&switchboard, 6341);
  let (tx, _rx) = mpsc::unbounded_channel();
  let _: LocalRef<DataMsg> = server.spawn_remote(
    Doubler {
      told: tx,
      stopped: None,
    },
    "doubler",
  );
  let pid = Pid::new(server.address(), "doubler");

  let reply = client
    .request::<u64, u64>(&pid, &1, Duration::from_millis(200))
    .await;
  assert!(matches!(reply, Err(RemotingError::Timeout)));

  // Messages to yourself never cross the failure map.
  let reply: u64 = server
    .request(&pid, &5u64, Duration::from_secs(2))
    .await
    .unwrap();
  assert_eq!(reply, 10);

  switchboard.set_failures(FailureConfigMap::default());
  let reply: u64 = client
    .request(&pid, &3u64, Duration::from_secs(2))
    .await
    .unwrap();
  assert_eq!(reply, 6);
}
