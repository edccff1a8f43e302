//! End-to-end scenarios driving real `Node`s over the in-memory transport.
//! Each scenario spins up a small cluster, drives it through
//! `transport::fake::Network`, and polls the node-level read-model
//! (`messages`, `dsdv`, `round`) until it converges or the deadline
//! expires.

use std::{future::Future, sync::Arc, time::Duration};

use peerchain::{
  config::{Config, RoundMode},
  model::Origin,
  node::Node,
  peer::PeerAddr,
  transport::fake::Network,
};

fn config(
  name: &str,
  bootstrap: &[&str],
  mode: RoundMode,
  cluster_size: usize,
  anti_entropy: Option<Duration>,
  rtimer: Option<Duration>,
) -> Arc<Config> {
  Arc::new(Config {
    name: name.into(),
    gossip_addr: "127.0.0.1:9000".parse().unwrap(),
    ui_port: 8080,
    bootstrap_peers: bootstrap.iter().map(|p| PeerAddr::new(*p)).collect(),
    anti_entropy,
    rtimer,
    cluster_size,
    stubborn_timeout: Duration::from_millis(100),
    hop_limit: 10,
    mode,
    ack_timeout: Duration::from_millis(50),
    mine_threshold: 1,
    seconds_per_block: 10,
    max_datagram: Config::MAX_DATAGRAM,
  })
}

async fn spawn_node(network: &Arc<Network>, addr: &str, config: Arc<Config>) -> Arc<Node> {
  let transport = network.bind(PeerAddr::new(addr)).await;
  let node = Node::new(config, Arc::new(transport));
  tokio::spawn(node.clone().run());
  node
}

/// Polls `check` every 20ms until it returns `true` or `deadline` elapses,
/// panicking with `what` on timeout.
async fn wait_until<F, Fut>(deadline: Duration, what: &str, mut check: F)
where
  F: FnMut() -> Fut,
  Fut: Future<Output = bool>,
{
  let start = tokio::time::Instant::now();
  loop {
    if check().await {
      return;
    }
    if start.elapsed() >= deadline {
      panic!("timed out waiting for: {what}");
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
}

/// Scenario 1 (spec §8): A -- B -- C chain topology. A broadcasts a chat
/// rumor; within a few mongering rounds it reaches C, and C's DSDV table
/// records a route to A via B.
#[tokio::test]
async fn rumor_propagates_across_a_chain_and_builds_routing() {
  let network = Network::new();
  let a = spawn_node(
    &network,
    "127.0.0.1:6001",
    config("A", &["127.0.0.1:6002"], RoundMode::Simple, 1, None, None),
  )
  .await;
  let _b = spawn_node(
    &network,
    "127.0.0.1:6002",
    config(
      "B",
      &["127.0.0.1:6001", "127.0.0.1:6003"],
      RoundMode::Simple,
      1,
      None,
      None,
    ),
  )
  .await;
  let c = spawn_node(
    &network,
    "127.0.0.1:6003",
    config("C", &["127.0.0.1:6002"], RoundMode::Simple, 1, None, None),
  )
  .await;

  a.submit_chat("hello from A".into()).await;

  wait_until(Duration::from_secs(5), "C receives A's rumor", || async {
    c.messages().await.iter().any(|(o, _, t)| o.0 == "A" && t == "hello from A")
  })
  .await;

  wait_until(Duration::from_secs(5), "C learns a route to A via B", || async {
    c.dsdv()
      .iter()
      .any(|(origin, next_hop)| origin == &Origin::new("A") && next_hop == &PeerAddr::new("127.0.0.1:6002"))
  })
  .await;
}

/// Scenario 2 (spec §8): C starts with no peers (partitioned) while A
/// submits several rumors through B. Once C's link to B heals, C's
/// anti-entropy pull catches it up on every backlogged rumor, in order.
#[tokio::test]
async fn anti_entropy_catches_up_a_partitioned_node() {
  let network = Network::new();
  let a = spawn_node(
    &network,
    "127.0.0.1:6101",
    config("A", &["127.0.0.1:6102"], RoundMode::Simple, 1, None, None),
  )
  .await;
  let _b = spawn_node(
    &network,
    "127.0.0.1:6102",
    config("B", &["127.0.0.1:6101"], RoundMode::Simple, 1, None, None),
  )
  .await;
  // C starts with no bootstrap peers: fully partitioned.
  let c = spawn_node(
    &network,
    "127.0.0.1:6103",
    config(
      "C",
      &[],
      RoundMode::Simple,
      1,
      Some(Duration::from_millis(30)),
      None,
    ),
  )
  .await;

  for i in 1..=3 {
    a.submit_chat(format!("msg-{i}")).await;
  }
  // give the rumors time to settle on A and B before healing the link.
  tokio::time::sleep(Duration::from_millis(200)).await;

  // heal the partition: C learns about B and starts pulling.
  c.add_peer(PeerAddr::new("127.0.0.1:6102"));

  wait_until(Duration::from_secs(5), "C catches up on all 3 backlogged rumors", || async {
    let msgs: Vec<_> = c.messages().await;
    msgs.len() == 3 && (1..=3).all(|i| msgs.iter().any(|(_, _, t)| t == &format!("msg-{i}")))
  })
  .await;
}

/// Scenario 3 (spec §8): on the chain topology from scenario 1, C sends A
/// a private message. A receives exactly one copy; B's own private inbox
/// for that conversation never surfaces it (it only relays).
#[tokio::test]
async fn private_message_is_routed_and_not_surfaced_at_the_relay() {
  let network = Network::new();
  let a = spawn_node(
    &network,
    "127.0.0.1:6201",
    config("A", &["127.0.0.1:6202"], RoundMode::Simple, 1, None, None),
  )
  .await;
  let b = spawn_node(
    &network,
    "127.0.0.1:6202",
    config(
      "B",
      &["127.0.0.1:6201", "127.0.0.1:6203"],
      RoundMode::Simple,
      1,
      None,
      None,
    ),
  )
  .await;
  let c = spawn_node(
    &network,
    "127.0.0.1:6203",
    config("C", &["127.0.0.1:6202"], RoundMode::Simple, 1, None, None),
  )
  .await;

  // establish DSDV routes in both directions first, exactly as scenario 1.
  a.submit_chat("hi".into()).await;
  c.submit_chat("hi".into()).await;
  wait_until(Duration::from_secs(5), "C learns a route to A", || async {
    c.dsdv().iter().any(|(o, _)| o == &Origin::new("A"))
  })
  .await;
  wait_until(Duration::from_secs(5), "A learns a route to C", || async {
    a.dsdv().iter().any(|(o, _)| o == &Origin::new("C"))
  })
  .await;

  c.submit_private(Origin::new("A"), "secret".into())
    .await
    .expect("C has a route to A");

  wait_until(Duration::from_secs(5), "A receives C's private message", || async {
    a.private_conversation(&Origin::new("C")).await.len() == 1
  })
  .await;
  let received = a.private_conversation(&Origin::new("C")).await;
  assert_eq!(received[0].text, "secret");

  // B only relayed; it never recorded a conversation with C under its own inbox.
  assert!(b.private_conversation(&Origin::new("C")).await.is_empty());
}

fn signed_register(name: &str) -> peerchain::tx::Transaction {
  use peerchain::crypto::{generate_signing_keypair, sign};
  let keypair = generate_signing_keypair();
  let origin = Origin::new(name);
  let payload = bincode::serialize(&(&origin, 1u32, keypair.public)).unwrap();
  let signature = sign(&keypair, &payload);
  peerchain::tx::Transaction::Register(peerchain::tx::RegisterTx {
    origin,
    id: 1,
    public_key: keypair.public,
    signature,
  })
}

/// Scenario 4 (spec §8): a 3-node full mesh in `Hw3Ex3` mode. Each node
/// mines and proposes its own `RegisterTx`; majority acks push every
/// node's round forward within a bounded number of stubborn-timeout
/// retries.
#[tokio::test]
async fn tlc_majority_acks_advance_every_nodes_round() {
  let network = Network::new();
  let names = [
    ("A", "127.0.0.1:6301"),
    ("B", "127.0.0.1:6302"),
    ("C", "127.0.0.1:6303"),
  ];
  let mut nodes = Vec::new();
  for (name, addr) in names {
    let bootstrap: Vec<&str> = names
      .iter()
      .filter(|(_, a)| *a != addr)
      .map(|(_, a)| *a)
      .collect();
    let cfg = config(name, &bootstrap, RoundMode::Hw3Ex3, 3, None, Some(Duration::from_millis(40)));
    nodes.push(spawn_node(&network, addr, cfg).await);
  }

  for (node, (name, _)) in nodes.iter().zip(names.iter()) {
    node
      .submit_transaction(signed_register(name))
      .await
      .expect("self-registration is always admissible");
  }

  for node in &nodes {
    wait_until(Duration::from_secs(10), "node's TLC round advances past 0", || async {
      node.round().unwrap_or(0) >= 1
    })
    .await;
  }
}
