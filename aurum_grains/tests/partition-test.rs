use async_trait::async_trait;
use aurum_grains::cluster::{
  Cluster, ClusterConfig, ClusterIdentity, GrainMsg, IntraClusterMsg, Kind, Member,
  PlacementStrategy, IDENTITY_ACTOR_NAME,
};
use aurum_grains::core::{Actor, ActorContext, Host, Node, Pid, Socket, Switchboard};
use aurum_grains::testkit::LogLevel;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

const DEADLINE: Duration = Duration::from_secs(10);

struct Echo {
  identity: Option<ClusterIdentity>,
  calls: u64,
}
#[async_trait]
impl Actor<GrainMsg> for Echo {
  async fn recv(&mut self, _: &ActorContext<GrainMsg>, msg: GrainMsg) {
    match msg {
      GrainMsg::Init(identity) => self.identity = Some(identity),
      GrainMsg::Request(req) => {
        self.calls += 1;
        let payload = req.payload().unwrap_or_default();
        let name = self
          .identity
          .as_ref()
          .map(|i| i.identity.clone())
          .unwrap_or_default();
        let reply = format!("{}:{}:{}", name, self.calls, String::from_utf8_lossy(&payload));
        req.respond(reply.into_bytes());
      }
    }
  }
}

struct TestMember {
  node: Node,
  member: Member,
  cluster: Cluster,
}

fn start_member(
  switchboard: &Switchboard,
  id: &str,
  port: u16,
  config: ClusterConfig,
  spawned: Arc<AtomicUsize>,
) -> TestMember {
  let socket = Socket::new(Host::from("127.0.0.1"), port);
  let node = Node::new(socket.clone(), switchboard, LogLevel::Warn);
  let member = Member::new(id, socket, vec!["user".to_string()]);
  let kind = Kind::new("user", move |_: &ClusterIdentity| {
    spawned.fetch_add(1, Ordering::SeqCst);
    Echo {
      identity: None,
      calls: 0,
    }
  });
  let cluster = Cluster::start(&node, member.clone(), config, vec![kind]);
  TestMember {
    node: node,
    member: member,
    cluster: cluster,
  }
}

fn fast_config(placement: PlacementStrategy) -> ClusterConfig {
  let mut config = ClusterConfig::default();
  config.request_timeout = Duration::from_secs(1);
  config.handover_timeout = Duration::from_millis(500);
  config.gossip_interval = Duration::from_millis(50);
  config.shutdown_timeout = Duration::from_secs(2);
  config.placement = placement;
  config
}

async fn resolve(cluster: &Cluster, identity: &ClusterIdentity) -> Pid {
  let start = Instant::now();
  loop {
    if let Some(pid) = cluster.get(identity).await {
      return pid;
    }
    assert!(start.elapsed() < DEADLINE, "{} never resolved", identity);
    sleep(Duration::from_millis(50)).await;
  }
}

async fn resolve_uncached(cluster: &Cluster, identity: &ClusterIdentity) -> Pid {
  let start = Instant::now();
  loop {
    if let Some(pid) = cluster.partition().get(identity).await {
      return pid;
    }
    assert!(start.elapsed() < DEADLINE, "{} never resolved", identity);
    sleep(Duration::from_millis(50)).await;
  }
}

fn two_members(
  ports: (u16, u16),
  placement: PlacementStrategy,
  spawned: &Arc<AtomicUsize>,
) -> (Switchboard, TestMember, TestMember) {
  let switchboard = Switchboard::new();
  let a = start_member(&switchboard, "a", ports.0, fast_config(placement), spawned.clone());
  let b = start_member(&switchboard, "b", ports.1, fast_config(placement), spawned.clone());
  let members = vec![a.member.clone(), b.member.clone()];
  assert!(a.cluster.update_topology(members.clone()).is_some());
  assert!(b.cluster.update_topology(members).is_some());
  (switchboard, a, b)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partition_test_both_members_agree_on_pid() {
  let spawned = Arc::new(AtomicUsize::new(0));
  let (_switchboard, a, b) = two_members((6100, 6101), PlacementStrategy::Owner, &spawned);
  let identity = ClusterIdentity::new("user-42", "user");

  let from_a = resolve(&a.cluster, &identity).await;
  let from_b = resolve(&b.cluster, &identity).await;
  assert_eq!(from_a, from_b);
  assert_eq!(Some(from_a.address.clone()), a.cluster.partition().owner(&identity));
  assert_eq!(a.cluster.partition().owner(&identity), b.cluster.partition().owner(&identity));
  assert_eq!(spawned.load(Ordering::SeqCst), 1);

  let owner = if from_a.address == a.node.address() { &a } else { &b };
  let lookup = owner.cluster.partition().lookup().await.unwrap();
  assert_eq!(lookup.get(&identity.as_key()).map(|act| &act.pid), Some(&from_a));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partition_test_concurrent_requests_spawn_once() {
  let spawned = Arc::new(AtomicUsize::new(0));
  let (_switchboard, a, b) = two_members((6110, 6111), PlacementStrategy::Owner, &spawned);
  let identity = ClusterIdentity::new("contended", "user");

  let requests = (0..20).map(|i| {
    let cluster = if i % 2 == 0 { &a.cluster } else { &b.cluster };
    resolve_uncached(cluster, &identity)
  });
  let pids = join_all(requests).await;
  assert!(pids.iter().all(|pid| pid == &pids[0]));
  assert_eq!(spawned.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partition_test_grain_request() {
  let spawned = Arc::new(AtomicUsize::new(0));
  let (_switchboard, a, b) = two_members((6120, 6121), PlacementStrategy::Owner, &spawned);
  let identity = ClusterIdentity::new("echo", "user");
  resolve(&a.cluster, &identity).await;

  let first = a.cluster.request(&identity, b"ping".to_vec()).await.unwrap();
  assert_eq!(String::from_utf8(first).unwrap(), "echo:1:ping");
  let second = b.cluster.request(&identity, b"pong".to_vec()).await.unwrap();
  assert_eq!(String::from_utf8(second).unwrap(), "echo:2:pong");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partition_test_handover_after_member_leaves() {
  let spawned = Arc::new(AtomicUsize::new(0));
  let (_switchboard, a, b) = two_members((6130, 6131), PlacementStrategy::RoundRobin, &spawned);
  let identities: Vec<ClusterIdentity> = (0..20)
    .map(|i| ClusterIdentity::new(format!("user-{}", i), "user"))
    .collect();
  let mut before = Vec::new();
  for identity in &identities {
    before.push(resolve_uncached(&a.cluster, identity).await);
  }
  assert!(before.iter().any(|pid| pid.address == a.node.address()));
  assert!(before.iter().any(|pid| pid.address == b.node.address()));

  a.node.disconnect();
  let topology = b.cluster.update_topology(vec![b.member.clone()]).unwrap();
  assert_eq!(topology.left.len(), 1);
  assert_eq!(topology.left[0].id, "a");

  for (identity, old) in identities.iter().zip(&before) {
    let pid = resolve_uncached(&b.cluster, identity).await;
    assert_eq!(pid.address, b.node.address());
    if old.address == b.node.address() {
      assert_eq!(&pid, old, "{} was activated twice", identity);
    }
  }
  let lookup = b.cluster.partition().lookup().await.unwrap();
  assert_eq!(lookup.len(), identities.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partition_test_repeated_topology_is_ignored() {
  let spawned = Arc::new(AtomicUsize::new(0));
  let (_switchboard, a, b) = two_members((6140, 6141), PlacementStrategy::Owner, &spawned);
  let identity = ClusterIdentity::new("stable", "user");
  let pid = resolve_uncached(&a.cluster, &identity).await;

  let reordered = vec![b.member.clone(), a.member.clone()];
  assert!(a.cluster.update_topology(reordered.clone()).is_none());
  assert!(b.cluster.update_topology(reordered).is_none());
  assert_eq!(resolve_uncached(&b.cluster, &identity).await, pid);
  assert_eq!(spawned.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partition_test_unknown_kind() {
  let switchboard = Switchboard::new();
  let config = fast_config(PlacementStrategy::Owner);
  let socket = Socket::new(Host::from("127.0.0.1"), 6150);
  let node = Node::new(socket.clone(), &switchboard, LogLevel::Off);
  // Advertises a kind it has no producer for.
  let member = Member::new("a", socket, vec!["user".to_string(), "ghost".to_string()]);
  let cluster = Cluster::start(&node, member.clone(), config, vec![]);
  cluster.update_topology(vec![member]);

  let nobody = ClusterIdentity::new("x", "unlisted");
  assert!(cluster.partition().owner(&nobody).is_none());
  assert!(cluster.get(&nobody).await.is_none());

  let ghost = ClusterIdentity::new("x", "ghost");
  let start = Instant::now();
  while cluster.partition().owner(&ghost).is_none() {
    assert!(start.elapsed() < DEADLINE);
    sleep(Duration::from_millis(20)).await;
  }
  assert!(cluster.get(&ghost).await.is_none());
  assert!(cluster.pid_cache().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partition_test_shutdown_stops_grains() {
  let spawned = Arc::new(AtomicUsize::new(0));
  let (_switchboard, a, b) = two_members((6160, 6161), PlacementStrategy::Owner, &spawned);
  let identities: Vec<ClusterIdentity> = (0..10)
    .map(|i| ClusterIdentity::new(format!("user-{}", i), "user"))
    .collect();
  for identity in &identities {
    resolve(&a.cluster, identity).await;
  }
  let hosted = b.cluster.partition().activations().await.unwrap();

  b.cluster.shutdown(true).await;
  for activation in &hosted {
    assert!(!a.node.switchboard().is_connected(&activation.pid.address));
  }
  assert!(b.cluster.partition().activations().await.is_none());

  // `a` evicts what it cached for `b` once it learns `b` left.
  a.cluster.update_topology(vec![a.member.clone()]);
  let start = Instant::now();
  while hosted
    .iter()
    .any(|activation| a.cluster.pid_cache().get(&activation.identity).is_some())
  {
    assert!(start.elapsed() < DEADLINE);
    sleep(Duration::from_millis(20)).await;
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partition_test_terminated_grain_is_respawned() {
  let spawned = Arc::new(AtomicUsize::new(0));
  let (_switchboard, a, b) = two_members((6170, 6171), PlacementStrategy::Owner, &spawned);
  let identity = ClusterIdentity::new("mortal", "user");
  let first = resolve(&a.cluster, &identity).await;
  assert_eq!(resolve(&b.cluster, &identity).await, first);
  let owner = if first.address == a.node.address() { &a } else { &b };

  owner.node.stop(&first);
  let start = Instant::now();
  loop {
    let lookup = owner.cluster.partition().lookup().await.unwrap();
    if !lookup.contains_key(&identity.as_key())
      && a.cluster.pid_cache().get(&identity).is_none()
      && b.cluster.pid_cache().get(&identity).is_none()
    {
      break;
    }
    assert!(start.elapsed() < DEADLINE, "{} was never purged", identity);
    sleep(Duration::from_millis(20)).await;
  }

  let second = resolve(&b.cluster, &identity).await;
  assert_ne!(second, first);
  assert_eq!(spawned.load(Ordering::SeqCst), 2);
  let reply = b.cluster.request(&identity, b"again".to_vec()).await.unwrap();
  assert_eq!(String::from_utf8(reply).unwrap(), "mortal:1:again");

  // A late report about the first grain leaves the second one alone.
  let stale = IntraClusterMsg::ActivationTerminated {
    identity: identity.clone(),
    pid: first.clone(),
  };
  for member in &[&a, &b] {
    let identity_actor = Pid::new(member.node.address(), IDENTITY_ACTOR_NAME);
    a.node.send(&identity_actor, &stale).unwrap();
  }
  sleep(Duration::from_millis(300)).await;
  let lookup = owner.cluster.partition().lookup().await.unwrap();
  assert_eq!(lookup.get(&identity.as_key()).map(|act| &act.pid), Some(&second));
  assert_eq!(b.cluster.pid_cache().get(&identity), Some(second));
  assert_eq!(spawned.load(Ordering::SeqCst), 2);
}
