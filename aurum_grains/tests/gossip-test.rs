use aurum_grains::cluster::gossip::GossipState;
use aurum_grains::cluster::{
  Cluster, ClusterConfig, ClusterEvent, ClusterEventType, IntraClusterMsg, Member,
  GOSSIP_ACTOR_NAME,
};
use aurum_grains::core::{Host, LocalRef, Node, Pid, Socket, Switchboard};
use aurum_grains::testkit::{FailureConfig, FailureConfigMap, LogLevel};
use maplit::hashmap;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const DEADLINE: Duration = Duration::from_secs(15);

fn config() -> ClusterConfig {
  let mut config = ClusterConfig::default();
  config.gossip_interval = Duration::from_millis(50);
  config.gossip_request_timeout = Duration::from_millis(250);
  config.shutdown_timeout = Duration::from_secs(2);
  config
}

/// Starts one cluster per id and gives all of them the full membership.
fn start_cluster(switchboard: &Switchboard, ids: &[(&str, u16)]) -> Vec<(Node, Cluster)> {
  let started: Vec<(Node, Member, Cluster)> = ids
    .iter()
    .map(|(id, port)| {
      let socket = Socket::new(Host::from("127.0.0.1"), *port);
      let node = Node::new(socket.clone(), switchboard, LogLevel::Warn);
      let member = Member::new(*id, socket, vec![]);
      let cluster = Cluster::start(&node, member.clone(), config(), vec![]);
      (node, member, cluster)
    })
    .collect();
  let members: Vec<Member> = started.iter().map(|(_, m, _)| m.clone()).collect();
  started
    .into_iter()
    .map(|(node, _, cluster)| {
      cluster.update_topology(members.clone());
      (node, cluster)
    })
    .collect()
}

async fn wait_for_state(cluster: &Cluster, key: &str, expected: &HashMap<String, String>) {
  let start = Instant::now();
  loop {
    let state = cluster.get_state::<String>(key).await;
    if &state == expected {
      return;
    }
    assert!(
      start.elapsed() < DEADLINE,
      "{} never converged, last saw {:?}",
      cluster.member().id,
      state
    );
    sleep(Duration::from_millis(50)).await;
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gossip_test_state_converges() {
  let switchboard = Switchboard::new();
  let clusters = start_cluster(&switchboard, &[("a", 6200), ("b", 6201), ("c", 6202)]);
  for (_, cluster) in &clusters {
    let value = format!("hello from {}", cluster.member().id);
    cluster.set_state("greeting", &value).unwrap();
  }
  let expected = hashmap! {
    "a".to_string() => "hello from a".to_string(),
    "b".to_string() => "hello from b".to_string(),
    "c".to_string() => "hello from c".to_string(),
  };
  for (_, cluster) in &clusters {
    wait_for_state(cluster, "greeting", &expected).await;
  }

  // A newer value replaces the old one everywhere.
  clusters[0].1.set_state("greeting", &"goodbye".to_string()).unwrap();
  let mut expected = expected;
  expected.insert("a".to_string(), "goodbye".to_string());
  for (_, cluster) in &clusters {
    wait_for_state(cluster, "greeting", &expected).await;
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gossip_test_topology_consensus() {
  let switchboard = Switchboard::new();
  let clusters = start_cluster(&switchboard, &[("a", 6210), ("b", 6211), ("c", 6212)]);
  let hashes: Vec<u64> = clusters
    .iter()
    .map(|(_, cluster)| {
      let members = cluster.member_list();
      aurum_grains::cluster::topology_hash(members.iter().map(|m| &**m))
    })
    .collect();
  assert!(hashes.iter().all(|h| *h == hashes[0]));

  for (_, cluster) in &clusters {
    let agreed = timeout(DEADLINE, cluster.topology_consensus().wait_consensus::<u64>())
      .await
      .unwrap();
    assert_eq!(agreed, Some(hashes[0]));
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gossip_test_custom_consensus_and_events() {
  let switchboard = Switchboard::new();
  let clusters = start_cluster(&switchboard, &[("a", 6220), ("b", 6221)]);
  let (tx, mut rx) = mpsc::unbounded_channel();
  let _subscription = clusters[0].1.subscribe(
    LocalRef::new(move |event: ClusterEvent| tx.send(event).is_ok()),
    vec![ClusterEventType::Consensus],
  );
  let handle = clusters[0].1.register_consensus_check("schema");

  clusters[0].1.set_state("schema", &3u32).unwrap();
  sleep(Duration::from_millis(300)).await;
  assert!(handle.try_get_consensus::<u32>().is_none());

  clusters[1].1.set_state("schema", &3u32).unwrap();
  let agreed = timeout(DEADLINE, handle.wait_consensus::<u32>()).await.unwrap();
  assert_eq!(agreed, Some(3));

  let reached = timeout(DEADLINE, async {
    loop {
      match rx.recv().await {
        Some(ClusterEvent::Consensus(reached)) if reached.id == handle.id() => {
          return reached;
        }
        Some(_) => continue,
        None => panic!("event stream closed"),
      }
    }
  })
  .await
  .unwrap();
  assert_eq!(serde_cbor::from_slice::<u32>(&reached.value).unwrap(), 3);

  assert!(clusters[0].1.remove_consensus_check(handle.id()));
  let start = Instant::now();
  while handle.try_get_consensus::<u32>().is_some() {
    assert!(start.elapsed() < DEADLINE);
    sleep(Duration::from_millis(20)).await;
  }
  assert_eq!(timeout(DEADLINE, handle.wait_consensus::<u32>()).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gossip_test_rejects_unknown_member() {
  let switchboard = Switchboard::new();
  let clusters = start_cluster(&switchboard, &[("a", 6230)]);
  let stranger = Node::new(
    Socket::new(Host::from("127.0.0.1"), 6239),
    &switchboard,
    LogLevel::Off,
  );
  let gossip = Pid::new(clusters[0].0.address(), GOSSIP_ACTOR_NAME);
  let request = IntraClusterMsg::GossipRequest {
    member_id: "stranger".to_string(),
    state: GossipState::default(),
  };
  let reply: IntraClusterMsg = stranger
    .request(&gossip, &request, Duration::from_secs(2))
    .await
    .unwrap();
  assert_eq!(
    reply,
    IntraClusterMsg::GossipResponse {
      state: None,
      ack_id: None
    }
  );

  // A known member with nothing new still gets an answer.
  let request = IntraClusterMsg::GossipRequest {
    member_id: "a".to_string(),
    state: GossipState::default(),
  };
  let reply: IntraClusterMsg = stranger
    .request(&gossip, &request, Duration::from_secs(2))
    .await
    .unwrap();
  assert!(matches!(reply, IntraClusterMsg::GossipResponse { state: Some(_), .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gossip_test_converges_over_lossy_network() {
  let fail_map = FailureConfigMap {
    cluster_wide: FailureConfig {
      drop_prob: 0.3,
      delay: Some((Duration::from_millis(1), Duration::from_millis(20))),
    },
    node_wide: im::HashMap::new(),
  };
  let switchboard = Switchboard::with_failures(fail_map);
  let ids = [("a", 6240), ("b", 6241), ("c", 6242), ("d", 6243), ("e", 6244)];
  let clusters = start_cluster(&switchboard, &ids);
  let mut expected = HashMap::new();
  for (_, cluster) in &clusters {
    let id = cluster.member().id.clone();
    cluster.set_state("owner", &id).unwrap();
    expected.insert(id.clone(), id);
  }
  for (_, cluster) in &clusters {
    wait_for_state(cluster, "owner", &expected).await;
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gossip_test_graceful_leave() {
  let switchboard = Switchboard::new();
  let clusters = start_cluster(&switchboard, &[("a", 6250), ("b", 6251)]);
  timeout(DEADLINE, clusters[0].1.topology_consensus().wait_consensus::<u64>())
    .await
    .unwrap();

  clusters[1].1.shutdown(true).await;
  assert!(!switchboard.is_connected(clusters[1].0.address()));
  let start = Instant::now();
  while !clusters[0].1.get_state::<i64>("left").await.contains_key("b") {
    assert!(start.elapsed() < DEADLINE, "a never learned that b left");
    sleep(Duration::from_millis(50)).await;
  }
}

async fn exchange(node: &Node, gossip: &Pid) -> (GossipState, Option<u64>) {
  let request = IntraClusterMsg::GossipRequest {
    member_id: "b".to_string(),
    state: GossipState::default(),
  };
  let reply: IntraClusterMsg = node
    .request(gossip, &request, Duration::from_secs(2))
    .await
    .unwrap();
  match reply {
    IntraClusterMsg::GossipResponse {
      state: Some(state),
      ack_id,
    } => (state, ack_id),
    other => panic!("unexpected reply {:?}", other),
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gossip_test_late_ack_keeps_newer_state_pending() {
  let switchboard = Switchboard::new();
  let a_socket = Socket::new(Host::from("127.0.0.1"), 6260);
  let a_node = Node::new(a_socket.clone(), &switchboard, LogLevel::Warn);
  let a = Member::new("a", a_socket, vec![]);
  // `b` is a bare node that speaks the gossip protocol by hand.
  let b_socket = Socket::new(Host::from("127.0.0.1"), 6261);
  let b_node = Node::new(b_socket.clone(), &switchboard, LogLevel::Off);
  let b = Member::new("b", b_socket, vec![]);
  let cluster = Cluster::start(&a_node, a.clone(), config(), vec![]);
  cluster.update_topology(vec![a, b]);
  let gossip = Pid::new(a_node.address(), GOSSIP_ACTOR_NAME);
  let has_x = |state: &GossipState| state.get("a", "x").is_some();

  cluster.set_state("w", &1u32).unwrap();
  let (first, first_ack) = exchange(&b_node, &gossip).await;
  assert!(!has_x(&first));
  let first_ack = first_ack.unwrap();

  // The second response carries `x` but never reaches `b`.
  cluster.set_state("x", &2u32).unwrap();
  let (second, second_ack) = exchange(&b_node, &gossip).await;
  assert!(has_x(&second));
  assert_ne!(second_ack, Some(first_ack));

  let ack = IntraClusterMsg::GossipResponseAck {
    member_id: "b".to_string(),
    ack_id: first_ack,
  };
  b_node.send(&gossip, &ack).unwrap();
  let (third, third_ack) = exchange(&b_node, &gossip).await;
  assert!(has_x(&third), "x is no longer sent to b");

  // Acknowledging the response that did arrive stops it from being sent again.
  let ack = IntraClusterMsg::GossipResponseAck {
    member_id: "b".to_string(),
    ack_id: third_ack.unwrap(),
  };
  b_node.send(&gossip, &ack).unwrap();
  let (fourth, _) = exchange(&b_node, &gossip).await;
  assert!(!has_x(&fourth));
}
