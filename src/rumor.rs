//! The Rumorer: epidemic mongering, ack-driven continuation, status
//! reconciliation and anti-entropy (spec §2, §4.1). Every [`MongerableRecord`]
//! variant -- plain rumor, TLC message, transaction, block -- is disseminated
//! through the same state machine; callers only ever see `(origin, id)`.

use std::{
  sync::{atomic::{AtomicU32, Ordering}, Arc},
  time::Duration,
};

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::{
  codec::{encode, Packet},
  config::Config,
  model::{MongerableRecord, Origin, RumorRecord, SeqNo},
  peer::{PeerAddr, PeerSet},
  routing::RoutingTable,
  transport::Transport,
  vector_clock::VectorClock,
};

/// A private message delivered to (or relayed through) this node, kept for
/// the `/private/{origin}` read-model endpoint.
#[derive(Debug, Clone)]
pub struct PrivateMessage {
  pub from: Origin,
  pub text: String,
}

/// Mongering and reconciliation state for one node. Owns no network
/// identity of its own beyond `self_origin`; everything else is handed in
/// as shared state so [`crate::node`] can wire the same instances into the
/// TLC engine and miner.
pub struct Rumorer {
  config: Arc<Config>,
  self_origin: Origin,
  transport: Arc<dyn Transport>,
  peers: Arc<PeerSet>,
  vector_clock: Arc<VectorClock>,
  routing: Arc<RoutingTable>,
  local_seq: AtomicU32,
  ack_waits: DashMap<(PeerAddr, Origin, SeqNo), oneshot::Sender<()>>,
  private_inbox: DashMap<Origin, Mutex<Vec<PrivateMessage>>>,
}

impl Rumorer {
  pub fn new(
    config: Arc<Config>,
    self_origin: Origin,
    transport: Arc<dyn Transport>,
    peers: Arc<PeerSet>,
    vector_clock: Arc<VectorClock>,
    routing: Arc<RoutingTable>,
  ) -> Arc<Self> {
    Arc::new(Self {
      config,
      self_origin,
      transport,
      peers,
      vector_clock,
      routing,
      local_seq: AtomicU32::new(1),
      ack_waits: DashMap::new(),
      private_inbox: DashMap::new(),
    })
  }

  fn next_seq(&self) -> SeqNo {
    self.local_seq.fetch_add(1, Ordering::SeqCst)
  }

  /// A client-submitted chat rumor: stamps the next local sequence number
  /// and starts mongering it (spec §4.1 "Client submission").
  pub async fn submit_client(self: &Arc<Self>, text: String) {
    let id = self.next_seq();
    let record = MongerableRecord::Rumor(RumorRecord {
      origin: self.self_origin.clone(),
      id,
      text,
    });
    self.vector_clock.add_message(record.clone()).await;
    self.begin_mongering(record);
  }

  /// Disseminates a record some other subsystem (TLC engine, miner) has
  /// already sequenced. Installs into the VectorClock so it participates in
  /// reconciliation, then starts an independent mongering episode.
  pub async fn submit_record(self: &Arc<Self>, record: MongerableRecord) -> bool {
    let accepted = self.vector_clock.add_message(record.clone()).await;
    if accepted {
      self.begin_mongering(record);
    }
    accepted
  }

  fn begin_mongering(self: &Arc<Self>, record: MongerableRecord) {
    let Some(peer) = self.peers.sample(None) else {
      return;
    };
    self.spawn_mongering(peer, record);
  }

  fn spawn_mongering(self: &Arc<Self>, first_peer: PeerAddr, record: MongerableRecord) {
    let this = self.clone();
    tokio::spawn(async move {
      this.monger_loop(first_peer, record).await;
    });
  }

  /// Spec §4.1 mongering loop: send, wait up to `ack_timeout` for a status
  /// packet that proves the peer has moved past this `(origin, id)`, then
  /// flip a coin to decide whether to continue with a new peer.
  async fn monger_loop(self: Arc<Self>, mut peer: PeerAddr, record: MongerableRecord) {
    let origin = record.origin().clone();
    let id = record.id();
    loop {
      let packet = Packet::from(record.clone());
      match encode(&packet, self.config.max_datagram) {
        Ok(bytes) => {
          if let Err(err) = self.transport.send(&peer, &bytes).await {
            warn!(%peer, %err, "monger send failed");
          }
        }
        Err(err) => {
          warn!(%err, "failed to encode mongered record");
          return;
        }
      }

      let (tx, rx) = oneshot::channel();
      self.ack_waits.insert((peer.clone(), origin.clone(), id), tx);
      let acked = tokio::time::timeout(self.config.ack_timeout, rx).await.is_ok();
      self.ack_waits.remove(&(peer.clone(), origin.clone(), id));

      if !acked {
        debug!(%peer, %origin, id, "monger ack timed out, stopping episode");
        return;
      }
      if !rand::thread_rng().gen_bool(0.5) {
        return;
      }
      match self.peers.sample(Some(&peer)) {
        Some(next) => peer = next,
        None => return,
      }
    }
  }

  /// Handles an inbound mongerable packet (`Rumor`, `Tlc`, `Transaction`,
  /// `MongerableBlock`). Returns the accepted record so the dispatcher can
  /// route it onward to the TLC engine or miner; `None` means the packet
  /// was a stale echo, a duplicate, or not a mongerable variant at all.
  pub async fn ingest(self: &Arc<Self>, from: PeerAddr, packet: Packet) -> Option<MongerableRecord> {
    let record: MongerableRecord = packet.try_into().ok()?;
    self.accept(from, record).await
  }

  async fn accept(self: &Arc<Self>, from: PeerAddr, record: MongerableRecord) -> Option<MongerableRecord> {
    let origin = record.origin().clone();
    let id = record.id();
    let next_before = self.vector_clock.next_total(&origin).await;

    let accepted = self.vector_clock.add_message(record.clone()).await;
    if !accepted {
      // StaleEcho (spec §7): already known, reply with our status and drop.
      self.send_status(&from).await;
      return None;
    }
    if id > next_before {
      // OutOfOrder (spec §7): stored for later contiguity, prompt reconcile.
      self.send_status(&from).await;
    }

    if let MongerableRecord::Rumor(r) = &record {
      if origin != self.self_origin {
        self.routing.observe(&origin, id, from.clone());
      }
    }

    self.begin_mongering(record.clone());
    Some(record)
  }

  /// Reconciliation on receipt of a `Status` packet (spec §4.1 `reconcile`):
  /// if the peer lacks something we have, send it directly; if we lack
  /// something they have, ask for it with our own status; otherwise we're
  /// in sync with that peer and any ack wait they might satisfy is woken.
  pub async fn handle_status(self: &Arc<Self>, from: PeerAddr, want: Vec<(Origin, SeqNo)>) {
    let (i_have, you_have) = self.vector_clock.compare(&want).await;
    if let Some((origin, next_id)) = i_have {
      if let Some(record) = self.vector_clock.get(&origin, next_id).await {
        self.send_record(&from, record).await;
      }
    } else if you_have.is_some() {
      self.send_status(&from).await;
    }
    self.fulfill_acks(&from, &want);
  }

  /// An ack is a status packet whose advertised `next_id` for `origin`
  /// exceeds the id we are waiting on with that peer (spec §4.1 step 2).
  fn fulfill_acks(&self, from: &PeerAddr, want: &[(Origin, SeqNo)]) {
    for (origin, next_id) in want {
      let keys: Vec<_> = self
        .ack_waits
        .iter()
        .filter(|e| {
          let (peer, waited_origin, waited_id) = e.key();
          peer == from && waited_origin == origin && *next_id > *waited_id
        })
        .map(|e| e.key().clone())
        .collect();
      for key in keys {
        if let Some((_, tx)) = self.ack_waits.remove(&key) {
          let _ = tx.send(());
        }
      }
    }
  }

  async fn send_status(&self, to: &PeerAddr) {
    let want = self.vector_clock.create_want().await;
    let packet = Packet::Status { want };
    self.send_packet(to, &packet).await;
  }

  async fn send_record(&self, to: &PeerAddr, record: MongerableRecord) {
    let packet = Packet::from(record);
    self.send_packet(to, &packet).await;
  }

  /// Escape hatch for collaborators (the TLC engine's acks) that need to
  /// send an already-encoded packet without going through the mongering
  /// or reconciliation machinery.
  pub async fn send_raw(&self, to: &PeerAddr, bytes: &[u8]) -> std::io::Result<()> {
    self.transport.send(to, bytes).await
  }

  async fn send_packet(&self, to: &PeerAddr, packet: &Packet) {
    match encode(packet, self.config.max_datagram) {
      Ok(bytes) => {
        if let Err(err) = self.transport.send(to, &bytes).await {
          warn!(%to, %err, "send failed");
        }
      }
      Err(err) => warn!(%err, "failed to encode outbound packet"),
    }
  }

  /// Private messages addressed to `self` are delivered to the inbox; any
  /// other destination is relayed one hop closer via the routing table,
  /// decrementing `hop_limit` (spec §4.1 "Private messaging").
  pub async fn handle_private(
    self: &Arc<Self>,
    origin: Origin,
    id: SeqNo,
    text: String,
    destination: Origin,
    hop_limit: u8,
  ) {
    if destination == self.self_origin {
      self
        .private_inbox
        .entry(origin.clone())
        .or_insert_with(|| Mutex::new(Vec::new()))
        .lock()
        .await
        .push(PrivateMessage { from: origin, text });
      return;
    }
    if hop_limit == 0 {
      debug!(%destination, "private message hop limit expired");
      return;
    }
    let Some(next_hop) = self.routing.next_hop(&destination) else {
      debug!(%destination, "no route for private message, dropping");
      return;
    };
    let packet = Packet::Private {
      origin,
      id,
      text,
      destination,
      hop_limit: hop_limit - 1,
    };
    self.send_packet(&next_hop, &packet).await;
  }

  /// Originates a private message from this node (the counterpart of
  /// [`Self::handle_private`] for locally-submitted traffic, used by the
  /// HTTP read-model's `POST /private/{origin}`).
  pub async fn submit_private(self: &Arc<Self>, destination: Origin, text: String) -> Result<(), String> {
    let Some(next_hop) = self.routing.next_hop(&destination) else {
      return Err(format!("no known route to {destination}"));
    };
    let id = self.next_seq();
    let packet = Packet::Private {
      origin: self.self_origin.clone(),
      id,
      text,
      destination,
      hop_limit: self.config.hop_limit,
    };
    self.send_packet(&next_hop, &packet).await;
    Ok(())
  }

  pub async fn private_conversation(&self, with: &Origin) -> Vec<PrivateMessage> {
    match self.private_inbox.get(with) {
      Some(inbox) => inbox.lock().await.clone(),
      None => Vec::new(),
    }
  }

  /// `--simple` mode broadcast relay: forward to every known peer except
  /// the one we heard it from.
  pub async fn handle_simple(&self, from: PeerAddr, origin: Origin, text: String) {
    let packet = Packet::Simple {
      from: origin,
      relay: self.self_origin.clone(),
      text,
    };
    for peer in self.peers.snapshot() {
      if peer != from {
        self.send_packet(&peer, &packet).await;
      }
    }
  }

  /// Periodic anti-entropy: send our status to a random peer so
  /// reconciliation happens even without active mongering (spec §4.1
  /// "Anti-entropy").
  pub fn spawn_anti_entropy(self: &Arc<Self>) {
    let Some(interval) = self.config.anti_entropy else {
      return;
    };
    let this = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        if let Some(peer) = this.peers.sample(None) {
          this.send_status(&peer).await;
        }
      }
    });
  }

  /// Periodic route rumor: an empty-text rumor keeps the DSDV table warm
  /// even when no user traffic is flowing (spec §4.1 "Route rumors").
  pub fn spawn_route_rumor(self: &Arc<Self>) {
    let Some(interval) = self.config.rtimer else {
      return;
    };
    let this = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        this.submit_client(String::new()).await;
      }
    });
  }
}

#[cfg(test)]
mod test {
  use std::net::SocketAddr;

  use super::*;
  use crate::transport::fake::Network;

  fn config() -> Arc<Config> {
    Arc::new(Config {
      name: "a".into(),
      gossip_addr: "127.0.0.1:9000".parse::<SocketAddr>().unwrap(),
      ui_port: 8080,
      bootstrap_peers: vec![],
      anti_entropy: None,
      rtimer: None,
      cluster_size: 3,
      stubborn_timeout: Duration::from_secs(5),
      hop_limit: 10,
      mode: crate::config::RoundMode::Simple,
      ack_timeout: Duration::from_millis(50),
      mine_threshold: 1,
      seconds_per_block: 10,
      max_datagram: Config::MAX_DATAGRAM,
    })
  }

  async fn rumorer(network: &Arc<Network>, addr: &str) -> (Arc<Rumorer>, PeerAddr) {
    let peer_addr = PeerAddr::new(addr);
    let transport = network.bind(peer_addr.clone()).await;
    let rumorer = Rumorer::new(
      config(),
      Origin::new(addr),
      Arc::new(transport),
      Arc::new(PeerSet::new()),
      Arc::new(VectorClock::new()),
      Arc::new(RoutingTable::new()),
    );
    (rumorer, peer_addr)
  }

  #[tokio::test]
  async fn submit_client_installs_and_assigns_increasing_ids() {
    let network = Network::new();
    let (node, _addr) = rumorer(&network, "127.0.0.1:6001").await;
    node.submit_client("hello".into()).await;
    node.submit_client("world".into()).await;
    let records = node.vector_clock.contiguous(&Origin::new("127.0.0.1:6001")).await;
    assert_eq!(records.len(), 2);
  }

  #[tokio::test]
  async fn duplicate_rumor_is_rejected_and_triggers_status() {
    let network = Network::new();
    let (node, addr) = rumorer(&network, "127.0.0.1:6002").await;
    let record = MongerableRecord::Rumor(RumorRecord {
      origin: Origin::new("B"),
      id: 1,
      text: "hi".into(),
    });
    assert!(node.accept(addr.clone(), record.clone()).await.is_some());
    assert!(node.accept(addr, record).await.is_none());
  }

  #[tokio::test]
  async fn private_message_to_self_is_delivered() {
    let network = Network::new();
    let (node, _addr) = rumorer(&network, "127.0.0.1:6003").await;
    node
      .handle_private(Origin::new("B"), 1, "secret".into(), Origin::new("127.0.0.1:6003"), 5)
      .await;
    let convo = node.private_conversation(&Origin::new("B")).await;
    assert_eq!(convo.len(), 1);
    assert_eq!(convo[0].text, "secret");
  }
}
