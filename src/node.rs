//! Dispatcher: wires `Transport` -> `Codec` -> {Rumorer, TlcEngine, Miner}
//! and runs the node's long-lived tasks (spec §2, §5 "Scheduling model").

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::{
  chain::{Block, Chain, Miner, UnconfirmedPool},
  codec::{self, Packet},
  config::Config,
  model::{MongerableRecord, Origin, TlcMessage},
  peer::{PeerAddr, PeerSet},
  registry::Registry,
  routing::RoutingTable,
  rumor::Rumorer,
  tlc::TlcEngine,
  transport::Transport,
  tx::Transaction,
  vector_clock::VectorClock,
};

/// Everything a running node needs, plus the handles the HTTP read-model
/// (`crate::rpc`) polls for its GET endpoints.
pub struct Node {
  pub config: Arc<Config>,
  pub self_origin: Origin,
  pub peers: Arc<PeerSet>,
  pub vector_clock: Arc<VectorClock>,
  pub routing: Arc<RoutingTable>,
  pub registry: Arc<Registry>,
  pub rumorer: Arc<Rumorer>,
  transport: Arc<dyn Transport>,

  pub pool: Option<Arc<UnconfirmedPool>>,
  pub chain: Option<Arc<RwLock<Chain>>>,
  miner: Option<Arc<Miner>>,
  tlc: Option<Arc<TlcEngine>>,
}

impl Node {
  pub fn new(config: Arc<Config>, transport: Arc<dyn Transport>) -> Arc<Self> {
    let self_origin = Origin::new(config.name.clone());
    let peers = Arc::new(PeerSet::new());
    for peer in &config.bootstrap_peers {
      peers.insert(peer.clone());
    }
    let vector_clock = Arc::new(VectorClock::new());
    let routing = Arc::new(RoutingTable::new());
    let registry = Arc::new(Registry::new());

    let rumorer = Rumorer::new(
      config.clone(),
      self_origin.clone(),
      transport.clone(),
      peers.clone(),
      vector_clock.clone(),
      routing.clone(),
    );

    let (pool, chain, miner, tlc) = if config.mode.is_tlc() {
      let pool = Arc::new(UnconfirmedPool::new());
      let chain = Arc::new(RwLock::new(Chain::new(config.clone(), registry.clone())));
      let miner = Arc::new(Miner::new(config.clone(), pool.clone()));

      let can_ack_chain = chain.clone();
      let (tlc, confirmed_rx, committed_rx) = TlcEngine::new(
        config.clone(),
        self_origin.clone(),
        rumorer.clone(),
        vector_clock.clone(),
        routing.clone(),
        move |prev_hash, transactions| {
          can_ack_chain
            .try_read()
            .map(|chain| chain.can_ack(prev_hash, transactions))
            .unwrap_or(true)
        },
      );
      (Some(pool), Some(chain), Some(miner), Some((tlc, confirmed_rx, committed_rx)))
    } else {
      (None, None, None, None)
    };

    let (tlc, confirmed_rx, committed_rx) = match tlc {
      Some((tlc, confirmed_rx, committed_rx)) => (Some(tlc), Some(confirmed_rx), Some(committed_rx)),
      None => (None, None, None),
    };

    let node = Arc::new(Self {
      config,
      self_origin,
      peers,
      vector_clock,
      routing,
      registry,
      rumorer,
      transport,
      pool,
      chain,
      miner,
      tlc,
    });

    if let Some(confirmed_rx) = confirmed_rx {
      node.clone().spawn_confirmed_drain(confirmed_rx);
    }
    if let Some(committed_rx) = committed_rx {
      node.clone().spawn_committed_drain(committed_rx);
    }
    node
  }

  /// Runs forever: the inbound packet loop plus the node's background
  /// timers (anti-entropy, route rumor, mining).
  pub async fn run(self: Arc<Self>) {
    self.rumorer.spawn_anti_entropy();
    self.rumorer.spawn_route_rumor();
    if self.chain.is_some() {
      self.clone().spawn_mining_loop();
    }

    loop {
      match self.transport.recv().await {
        Ok((from, bytes)) => {
          let this = self.clone();
          tokio::spawn(async move {
            this.handle_datagram(from, &bytes).await;
          });
        }
        Err(err) => {
          warn!(%err, "transport recv failed");
        }
      }
    }
  }

  async fn handle_datagram(self: Arc<Self>, from: PeerAddr, bytes: &[u8]) {
    let packet = match codec::decode(bytes) {
      Ok(p) => p,
      Err(err) => {
        warn!(%err, "malformed packet, dropping");
        return;
      }
    };
    self.handle_packet(from, packet).await;
  }

  async fn handle_packet(self: Arc<Self>, from: PeerAddr, packet: Packet) {
    match packet {
      Packet::Status { want } => self.rumorer.handle_status(from, want).await,
      Packet::Private {
        origin,
        id,
        text,
        destination,
        hop_limit,
      } => {
        self
          .rumorer
          .handle_private(origin, id, text, destination, hop_limit)
          .await
      }
      Packet::Simple { from: origin, text, .. } => {
        self.rumorer.handle_simple(from, origin, text).await
      }
      Packet::TlcAck {
        origin,
        id,
        destination,
        hop_limit,
      } => {
        if let Some(tlc) = &self.tlc {
          tlc.handle_ack(origin, id, destination, hop_limit).await;
        }
      }
      p @ Packet::Rumor { .. } => {
        self.rumorer.ingest(from, p).await;
      }
      p @ Packet::Tlc { .. } => {
        if let Some(record) = self.rumorer.ingest(from.clone(), p).await {
          if let (MongerableRecord::Tlc(msg), Some(tlc)) = (record, &self.tlc) {
            tlc.ingest(msg, from).await;
          }
        }
      }
      p @ Packet::Transaction { .. } => {
        if let Some(record) = self.rumorer.ingest(from, p).await {
          if let (MongerableRecord::Transaction(tx), Some(pool)) = (record, &self.pool) {
            pool.submit(tx).await;
          }
        }
      }
      p @ Packet::MongerableBlock { .. } => {
        if let Some(record) = self.rumorer.ingest(from, p).await {
          if let (MongerableRecord::Block { block, .. }, Some(chain)) = (record, &self.chain) {
            self.accept_block(chain, block).await;
          }
        }
      }
      // File-sharing legacy (spec §1 Non-goals): accept without acting.
      Packet::DataRequest { .. } | Packet::DataReply { .. } | Packet::SearchRequest { .. } | Packet::SearchReply { .. } => {}
    }
  }

  async fn accept_block(&self, chain: &Arc<RwLock<Chain>>, block: Block) {
    let mut chain = chain.write().await;
    let block_id = block.id;
    let _outcome = chain.receive_block(block);
    info!(id = block_id, "received block, outcome recorded");
    if let Some(miner) = &self.miner {
      miner.notify_settled(chain.height());
    }
    if let Some(pool) = &self.pool {
      pool.remove_confirmed(chain.tip().transactions.as_slice()).await;
    }
  }

  /// Submission entry points used by the HTTP read-model.
  pub async fn submit_chat(self: &Arc<Self>, text: String) {
    self.rumorer.submit_client(text).await;
  }

  pub async fn submit_transaction(self: &Arc<Self>, tx: Transaction) -> Result<(), String> {
    tx.validate(&self.registry)?;
    let Some(pool) = &self.pool else {
      return Err("node is not running in a TLC/QSC mode".into());
    };
    pool.submit(tx.clone()).await;
    self.rumorer.submit_record(MongerableRecord::Transaction(tx)).await;
    Ok(())
  }

  fn spawn_mining_loop(self: Arc<Self>) {
    tokio::spawn(async move {
      let Some(pool) = self.pool.clone() else { return };
      let Some(chain) = self.chain.clone() else { return };
      let Some(miner) = self.miner.clone() else { return };
      loop {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let queued = pool.len().await;
        if !miner.should_mine(queued) {
          continue;
        }
        let (prev, difficulty, paillier) = {
          let chain = chain.read().await;
          (chain.tip().clone(), chain.current_difficulty(), crate::chain::network_paillier_public())
        };
        let Some(mined) = miner
          .mine(self.self_origin.clone(), &prev, difficulty, paillier)
          .await
        else {
          continue;
        };

        if let Some(tlc) = &self.tlc {
          tlc.publish(mined, prev.hash.clone()).await;
        } else {
          let mut chain = chain.write().await;
          chain.receive_block(mined.clone());
          self.rumorer.submit_record(MongerableRecord::Block {
            origin: self.self_origin.clone(),
            id: mined.id as u32,
            block: mined,
          }).await;
        }
      }
    });
  }

  fn spawn_confirmed_drain(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<TlcMessage>) {
    tokio::spawn(async move {
      while let Some(msg) = rx.recv().await {
        info!(origin = %msg.origin, id = msg.id, "TLC confirmation observed");
      }
    });
  }

  fn spawn_committed_drain(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Block>) {
    tokio::spawn(async move {
      while let Some(block) = rx.recv().await {
        if let Some(chain) = &self.chain {
          self.accept_block(chain, block).await;
        }
      }
    });
  }

  /// `/message` read-model: every chat rumor from every origin, in
  /// contiguous sequence order, route-rumors excluded.
  pub async fn messages(&self) -> Vec<(Origin, u32, String)> {
    let mut all = Vec::new();
    for origin in self.vector_clock.known_origins() {
      for record in self.vector_clock.contiguous(&origin).await {
        if let MongerableRecord::Rumor(r) = record {
          if !r.is_route_rumor() {
            all.push((r.origin, r.id, r.text));
          }
        }
      }
    }
    all
  }

  pub fn dsdv(&self) -> Vec<(Origin, PeerAddr)> {
    self.routing.snapshot()
  }

  pub fn round(&self) -> Option<u32> {
    self.tlc.as_ref().map(|t| t.my_round())
  }

  pub fn add_peer(&self, peer: PeerAddr) {
    self.peers.insert(peer);
  }

  pub async fn submit_private(self: &Arc<Self>, destination: Origin, text: String) -> Result<(), String> {
    self.rumorer.submit_private(destination, text).await
  }

  pub async fn private_conversation(&self, with: &Origin) -> Vec<crate::rumor::PrivateMessage> {
    self.rumorer.private_conversation(with).await
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{config::RoundMode, transport::fake::Network};

  fn config(name: &str, mode: RoundMode) -> Arc<Config> {
    Arc::new(Config {
      name: name.into(),
      gossip_addr: "127.0.0.1:9000".parse().unwrap(),
      ui_port: 8080,
      bootstrap_peers: vec![],
      anti_entropy: None,
      rtimer: None,
      cluster_size: 3,
      stubborn_timeout: std::time::Duration::from_millis(50),
      hop_limit: 10,
      mode,
      ack_timeout: std::time::Duration::from_millis(50),
      mine_threshold: 1,
      seconds_per_block: 10,
      max_datagram: Config::MAX_DATAGRAM,
    })
  }

  #[tokio::test]
  async fn chat_only_node_has_no_chain() {
    let network = Network::new();
    let addr = PeerAddr::new("127.0.0.1:7001");
    let transport = network.bind(addr).await;
    let node = Node::new(config("A", RoundMode::Simple), Arc::new(transport));
    assert!(node.chain.is_none());
    node.submit_chat("hello".into()).await;
    let messages = node.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].2, "hello");
  }

  fn signed_register(name: &str) -> Transaction {
    use crate::crypto::{generate_signing_keypair, sign};
    let keypair = generate_signing_keypair();
    let origin = Origin::new(name);
    let payload = bincode::serialize(&(&origin, 1u32, keypair.public)).unwrap();
    let signature = sign(&keypair, &payload);
    Transaction::Register(crate::tx::RegisterTx {
      origin,
      id: 1,
      public_key: keypair.public,
      signature,
    })
  }

  /// Scenario 6's closing clause: once a block carrying a transaction is
  /// accepted onto the main chain, `removeConfirmedTx` clears that
  /// transaction out of the unconfirmed pool.
  #[tokio::test]
  async fn accepting_a_block_clears_its_transactions_from_the_pool() {
    let network = Network::new();
    let addr = PeerAddr::new("127.0.0.1:7002");
    let transport = network.bind(addr).await;
    let node = Node::new(config("A", RoundMode::Hw3Ex3), Arc::new(transport));
    let chain = node.chain.clone().unwrap();
    let pool = node.pool.clone().unwrap();

    let tx = signed_register("alice");
    node.submit_transaction(tx.clone()).await.unwrap();
    assert_eq!(pool.len().await, 1);

    let prev_hash = chain.read().await.tip().hash.clone();
    let block = Block {
      id: 1,
      origin: Origin::new("A"),
      prev_hash,
      transactions: vec![tx],
      difficulty: 0,
      nonce: 0,
      timestamp: chrono::Utc::now(),
      hash: "block-1-hash".into(),
    };
    node.accept_block(&chain, block).await;

    assert_eq!(chain.read().await.height(), 2);
    assert_eq!(pool.len().await, 0, "removeConfirmedTx should clear the pool");
  }
}
