//! TLCEngine: per-origin round state, ack collection, confirmation
//! dispatch, round advance and QSC consensus (spec §4.2).

use std::{
  collections::{HashSet, VecDeque},
  sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
  },
};

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;

use super::round::{self, RoundComparison};
use crate::{
  chain::Block,
  config::Config,
  model::{MongerableRecord, Origin, SeqNo, TlcMessage, UNCONFIRMED},
  peer::PeerAddr,
  routing::RoutingTable,
  rumor::Rumorer,
  vector_clock::VectorClock,
};

/// A block confirmed in some round, kept around long enough to run QSC's
/// three-round consensus check.
#[derive(Clone)]
struct ConfirmedEntry {
  origin: Origin,
  id: SeqNo,
  block: Block,
  fitness: f32,
}

struct RoundRecord {
  round: u32,
  confirmed: Vec<ConfirmedEntry>,
}

/// A locally-originated, not-yet-confirmed proposal awaiting acks.
struct ActiveProposal {
  round: u32,
  id: SeqNo,
  block: Block,
  fitness: f32,
  acked_by: DashSet<Origin>,
}

pub struct TlcEngine {
  config: Arc<Config>,
  self_origin: Origin,
  rumorer: Arc<Rumorer>,
  vector_clock: Arc<VectorClock>,
  routing: Arc<RoutingTable>,

  my_round: AtomicU32,
  round_lock: RwLock<()>,
  want_round: DashMap<Origin, u32>,
  peer_locks: DashMap<Origin, Arc<Mutex<()>>>,

  local_seq: AtomicU32,
  active_proposal: Mutex<Option<ActiveProposal>>,
  pending_payload: Mutex<Option<Block>>,
  round_confirmations: Mutex<HashSet<Origin>>,
  history: Mutex<VecDeque<RoundRecord>>,
  carried_prev_hash: Mutex<Option<String>>,

  confirmed_tx: mpsc::UnboundedSender<TlcMessage>,
  committed_tx: mpsc::UnboundedSender<Block>,
  can_ack: Box<dyn Fn(&str, &[crate::tx::Transaction]) -> bool + Send + Sync>,
}

const HISTORY_DEPTH: usize = 8;

impl TlcEngine {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    config: Arc<Config>,
    self_origin: Origin,
    rumorer: Arc<Rumorer>,
    vector_clock: Arc<VectorClock>,
    routing: Arc<RoutingTable>,
    can_ack: impl Fn(&str, &[crate::tx::Transaction]) -> bool + Send + Sync + 'static,
  ) -> (Arc<Self>, mpsc::UnboundedReceiver<TlcMessage>, mpsc::UnboundedReceiver<Block>) {
    let (confirmed_tx, confirmed_rx) = mpsc::unbounded_channel();
    let (committed_tx, committed_rx) = mpsc::unbounded_channel();
    let engine = Arc::new(Self {
      config,
      self_origin,
      rumorer,
      vector_clock,
      routing,
      my_round: AtomicU32::new(0),
      round_lock: RwLock::new(()),
      want_round: DashMap::new(),
      peer_locks: DashMap::new(),
      local_seq: AtomicU32::new(1),
      active_proposal: Mutex::new(None),
      pending_payload: Mutex::new(None),
      round_confirmations: Mutex::new(HashSet::new()),
      history: Mutex::new(VecDeque::new()),
      carried_prev_hash: Mutex::new(None),
      confirmed_tx,
      committed_tx,
      can_ack: Box::new(can_ack),
    });
    (engine, confirmed_rx, committed_rx)
  }

  pub fn my_round(&self) -> u32 {
    self.my_round.load(Ordering::SeqCst)
  }

  fn next_seq(&self) -> SeqNo {
    self.local_seq.fetch_add(1, Ordering::SeqCst)
  }

  fn peer_lock(&self, origin: &Origin) -> Arc<Mutex<()>> {
    self
      .peer_locks
      .entry(origin.clone())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone()
  }

  /// Publisher flow (spec §4.2 steps 1-5). `prev_hash` is either the
  /// current chain tip (passed in by the caller, since `TlcEngine` does
  /// not own the chain) or whatever the last QSC cycle carried forward.
  pub async fn publish(self: &Arc<Self>, mut block: Block, chain_tip_hash: String) {
    let round = self.my_round();
    {
      let mut active = self.active_proposal.lock().await;
      if active.as_ref().map(|p| p.round) == Some(round) {
        *self.pending_payload.lock().await = Some(block);
        return;
      }
      let id = self.next_seq();
      let name = block.transactions.first().map(|t| t.name()).unwrap_or_default();
      let fitness = round::fitness_for(&format!("{}:{name}", self.self_origin), round);
      block.prev_hash = self
        .carried_prev_hash
        .lock()
        .await
        .clone()
        .unwrap_or(chain_tip_hash);

      let msg = TlcMessage {
        origin: self.self_origin.clone(),
        id,
        confirmed: UNCONFIRMED,
        tx_block: block.clone(),
        vector_clock: Some(self.vector_clock.create_want().await),
        fitness,
      };
      *active = Some(ActiveProposal {
        round,
        id,
        block: block.clone(),
        fitness,
        acked_by: DashSet::new(),
      });
      drop(active);
      self.rumorer.submit_record(MongerableRecord::Tlc(msg)).await;
    }
    self.clone().spawn_stubborn_republish(round, block);
  }

  /// Re-rumors the pending proposal every `stubborn_timeout` until a
  /// majority of distinct origins ack it or the round advances past the
  /// round it was proposed in (spec §4.2 step 4).
  fn spawn_stubborn_republish(self: Arc<Self>, round: u32, block: Block) {
    tokio::spawn(async move {
      loop {
        tokio::time::sleep(self.config.stubborn_timeout).await;
        if self.my_round() != round {
          return;
        }
        let active = self.active_proposal.lock().await;
        let Some(proposal) = active.as_ref() else {
          return;
        };
        if proposal.round != round {
          return;
        }
        if proposal.acked_by.len() >= self.config.majority() {
          return;
        }
        let id = proposal.id;
        let fitness = proposal.fitness;
        drop(active);
        let msg = TlcMessage {
          origin: self.self_origin.clone(),
          id,
          confirmed: UNCONFIRMED,
          tx_block: block.clone(),
          vector_clock: Some(self.vector_clock.create_want().await),
          fitness,
        };
        self.rumorer.submit_record(MongerableRecord::Tlc(msg)).await;
      }
    });
  }

  /// An inbound TLC message, unconfirmed proposal or confirmation.
  pub async fn ingest(self: &Arc<Self>, msg: TlcMessage, from: PeerAddr) {
    let lock = self.peer_lock(&msg.origin);
    let _guard = lock.lock().await;

    let is_confirmation = !msg.is_unconfirmed();
    let stored = self.want_round.get(&msg.origin).map(|r| *r).unwrap_or(0);
    let cmp = round::compare_round(stored, is_confirmation, self.my_round());

    if is_confirmation {
      self
        .want_round
        .entry(msg.origin.clone())
        .and_modify(|r| *r += 1)
        .or_insert(1);
      self.record_confirmation(&msg).await;
      return;
    }

    if cmp == RoundComparison::Same {
      let transactions = msg.tx_block.transactions.clone();
      if (self.can_ack)(&msg.tx_block.prev_hash, &transactions) {
        self.send_ack(msg.origin.clone(), msg.id, from).await;
      }
    }
  }

  async fn send_ack(&self, destination: Origin, id: SeqNo, direct_peer: PeerAddr) {
    use crate::codec::{encode, Packet};
    let packet = Packet::TlcAck {
      origin: self.self_origin.clone(),
      id,
      destination,
      hop_limit: self.config.hop_limit,
    };
    if let Ok(bytes) = encode(&packet, self.config.max_datagram) {
      let _ = self
        .rumor_transport_send(&direct_peer, &bytes)
        .await;
    }
  }

  async fn rumor_transport_send(&self, to: &PeerAddr, bytes: &[u8]) -> std::io::Result<()> {
    self.rumorer.send_raw(to, bytes).await
  }

  /// An inbound `TLCAck`. Delivered if addressed to us, else relayed one
  /// hop closer via the routing table (spec §4.2 "Acking", mirrors
  /// `Rumorer::handle_private`'s hop-limited relay).
  pub async fn handle_ack(self: &Arc<Self>, origin: Origin, id: SeqNo, destination: Origin, hop_limit: u8) {
    if destination != self.self_origin {
      if hop_limit == 0 {
        return;
      }
      if let Some(next_hop) = self.routing.next_hop(&destination) {
        use crate::codec::{encode, Packet};
        let packet = Packet::TlcAck {
          origin,
          id,
          destination,
          hop_limit: hop_limit - 1,
        };
        if let Ok(bytes) = encode(&packet, self.config.max_datagram) {
          let _ = self.rumor_transport_send(&next_hop, &bytes).await;
        }
      }
      return;
    }

    let majority_reached = {
      let active = self.active_proposal.lock().await;
      match active.as_ref() {
        Some(proposal) if proposal.id == id => {
          proposal.acked_by.insert(origin);
          proposal.acked_by.len() >= self.config.majority()
        }
        _ => false,
      }
    };
    if majority_reached {
      self.confirm(id).await;
    }
  }

  /// Majority of acks collected: emit a confirmation and disseminate it
  /// (spec §4.2 step 5).
  async fn confirm(self: &Arc<Self>, original_id: SeqNo) {
    let proposal = {
      let mut active = self.active_proposal.lock().await;
      match active.take() {
        Some(p) if p.id == original_id => p,
        other => {
          *active = other;
          return;
        }
      }
    };
    let confirmation_id = self.next_seq();
    let msg = TlcMessage {
      origin: self.self_origin.clone(),
      id: confirmation_id,
      confirmed: original_id as i64,
      tx_block: proposal.block.clone(),
      vector_clock: Some(self.vector_clock.create_want().await),
      fitness: proposal.fitness,
    };
    let _ = self.confirmed_tx.send(msg.clone());
    self.rumorer.submit_record(MongerableRecord::Tlc(msg)).await;
    self
      .record_confirmation_for(self.self_origin.clone(), proposal.id, proposal.block, proposal.fitness)
      .await;
  }

  async fn record_confirmation(&self, msg: &TlcMessage) {
    let _ = self.confirmed_tx.send(msg.clone());
    self
      .record_confirmation_for(msg.origin.clone(), msg.id, msg.tx_block.clone(), msg.fitness)
      .await;
  }

  async fn record_confirmation_for(self: &Arc<Self>, origin: Origin, id: SeqNo, block: Block, fitness: f32) {
    let round = self.my_round();
    {
      let mut history = self.history.lock().await;
      let entry = ConfirmedEntry { origin: origin.clone(), id, block, fitness };
      match history.iter_mut().find(|r| r.round == round) {
        Some(record) => record.confirmed.push(entry),
        None => {
          history.push_back(RoundRecord { round, confirmed: vec![entry] });
          while history.len() > HISTORY_DEPTH {
            history.pop_front();
          }
        }
      }
    }
    let mut confirmations = self.round_confirmations.lock().await;
    confirmations.insert(origin);
    if confirmations.len() > self.config.cluster_size / 2 {
      confirmations.clear();
      drop(confirmations);
      self.advance_round().await;
    }
  }

  /// Round advance (spec §4.2): bump `my_round`, drain any buffered
  /// client payload into a fresh proposal, and -- in QSC mode, every
  /// third round -- run `check_consensus`.
  async fn advance_round(self: &Arc<Self>) {
    let _guard = self.round_lock.write().await;
    let new_round = self.my_round.fetch_add(1, Ordering::SeqCst) + 1;
    info!(round = new_round, "TLC round advanced");

    if let Some(block) = self.pending_payload.lock().await.take() {
      let prev_hash = self
        .carried_prev_hash
        .lock()
        .await
        .clone()
        .unwrap_or_else(|| block.prev_hash.clone());
      self.publish(block, prev_hash).await;
    }

    if self.config.mode.is_qsc() && new_round % 3 == 0 {
      self.check_consensus(new_round).await;
    }
  }

  /// QSC §4.2 step 5: over rounds `[r-3, r-2, r-1]`, find the
  /// highest-fitness block confirmed in `r-3` that is also confirmed (by
  /// hash) in `r-2` and `r-1`; commit it if found, else carry forward the
  /// highest-fitness block of `r-2` as the next cycle's uncommitted tip.
  async fn check_consensus(self: &Arc<Self>, r: u32) {
    let history = self.history.lock().await;
    let get = |round: u32| -> Vec<ConfirmedEntry> {
      history
        .iter()
        .find(|rec| rec.round == round)
        .map(|rec| rec.confirmed.clone())
        .unwrap_or_default()
    };
    let r3 = get(r - 3);
    let r2 = get(r - 2);
    let r1 = get(r - 1);
    drop(history);

    let mut candidates: Vec<&ConfirmedEntry> = r3
      .iter()
      .filter(|e| r2.iter().any(|o| o.block.hash == e.block.hash))
      .filter(|e| r1.iter().any(|o| o.block.hash == e.block.hash))
      .collect();
    candidates.sort_by(|a, b| round::more_fit((a.fitness, &a.origin, a.id), (b.fitness, &b.origin, b.id)));

    if let Some(winner) = candidates.first() {
      info!("CONSENSUS ON QSC round {r}");
      let _ = self.committed_tx.send(winner.block.clone());
      *self.carried_prev_hash.lock().await = Some(winner.block.hash.clone());
      return;
    }

    let mut uncommitted: Vec<&ConfirmedEntry> = r2.iter().collect();
    uncommitted.sort_by(|a, b| round::more_fit((a.fitness, &a.origin, a.id), (b.fitness, &b.origin, b.id)));
    if let Some(carry) = uncommitted.first() {
      *self.carried_prev_hash.lock().await = Some(carry.block.hash.clone());
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{
    config::RoundMode,
    peer::{PeerAddr, PeerSet},
    transport::fake::Network,
  };

  fn config(mode: RoundMode, cluster_size: usize) -> Arc<Config> {
    Arc::new(Config {
      name: "A".into(),
      gossip_addr: "127.0.0.1:9000".parse().unwrap(),
      ui_port: 8080,
      bootstrap_peers: vec![],
      anti_entropy: None,
      rtimer: None,
      cluster_size,
      stubborn_timeout: std::time::Duration::from_secs(30),
      hop_limit: 10,
      mode,
      ack_timeout: std::time::Duration::from_secs(2),
      mine_threshold: 1,
      seconds_per_block: 10,
      max_datagram: Config::MAX_DATAGRAM,
    })
  }

  async fn engine(
    mode: RoundMode,
    cluster_size: usize,
  ) -> (
    Arc<TlcEngine>,
    mpsc::UnboundedReceiver<TlcMessage>,
    mpsc::UnboundedReceiver<Block>,
  ) {
    let config = config(mode, cluster_size);
    let network = Network::new();
    let transport = network.bind(PeerAddr::new("127.0.0.1:9000")).await;
    let rumorer = Rumorer::new(
      config.clone(),
      Origin::new("A"),
      Arc::new(transport),
      Arc::new(PeerSet::new()),
      Arc::new(VectorClock::new()),
      Arc::new(RoutingTable::new()),
    );
    TlcEngine::new(
      config,
      Origin::new("A"),
      rumorer,
      Arc::new(VectorClock::new()),
      Arc::new(RoutingTable::new()),
      |_, _| true,
    )
  }

  fn empty_block(id: u64, hash: &str) -> Block {
    Block {
      id,
      origin: Origin::new("A"),
      prev_hash: "0".into(),
      transactions: Vec::new(),
      difficulty: 0,
      nonce: 0,
      timestamp: chrono::Utc::now(),
      hash: hash.into(),
    }
  }

  #[tokio::test]
  async fn majority_acks_confirm_and_advance_the_round() {
    let (engine, _confirmed_rx, _committed_rx) = engine(RoundMode::Hw3Ex3, 3).await;
    engine.publish(empty_block(1, "pending"), "0".into()).await;
    assert_eq!(engine.my_round(), 0);

    engine
      .handle_ack(Origin::new("B"), 1, Origin::new("A"), 10)
      .await;
    assert_eq!(engine.my_round(), 0, "one ack is not yet a majority of 3");

    engine
      .handle_ack(Origin::new("C"), 1, Origin::new("A"), 10)
      .await;
    // self-confirmation alone isn't a majority of distinct confirming
    // origins for a 3-node cluster; a confirmation observed from another
    // origin is what pushes this node's round forward.
    assert_eq!(engine.my_round(), 0);

    engine
      .ingest(
        TlcMessage {
          origin: Origin::new("B"),
          id: 99,
          confirmed: 1,
          tx_block: empty_block(1, "pending"),
          vector_clock: None,
          fitness: 0.1,
        },
        PeerAddr::new("127.0.0.1:9999"),
      )
      .await;
    assert_eq!(engine.my_round(), 1, "a second confirming origin reaches majority");
  }

  #[tokio::test]
  async fn qsc_commits_the_block_confirmed_in_three_consecutive_rounds() {
    let (engine, _confirmed_rx, mut committed_rx) = engine(RoundMode::Hw3Ex4, 3).await;
    let winner = empty_block(1, "winner-hash");
    let distractor = empty_block(1, "distractor-hash");

    {
      let mut history = engine.history.lock().await;
      history.push_back(RoundRecord {
        round: 1,
        confirmed: vec![
          ConfirmedEntry {
            origin: Origin::new("A"),
            id: 1,
            block: winner.clone(),
            fitness: 0.9,
          },
          ConfirmedEntry {
            origin: Origin::new("B"),
            id: 2,
            block: distractor,
            fitness: 0.5,
          },
        ],
      });
      history.push_back(RoundRecord {
        round: 2,
        confirmed: vec![ConfirmedEntry {
          origin: Origin::new("A"),
          id: 3,
          block: winner.clone(),
          fitness: 0.9,
        }],
      });
      history.push_back(RoundRecord {
        round: 3,
        confirmed: vec![ConfirmedEntry {
          origin: Origin::new("A"),
          id: 4,
          block: winner.clone(),
          fitness: 0.9,
        }],
      });
    }

    engine.check_consensus(4).await;

    let committed = committed_rx.try_recv().expect("a block should have committed");
    assert_eq!(committed.hash, "winner-hash");
    assert_eq!(
      engine.carried_prev_hash.lock().await.as_deref(),
      Some("winner-hash")
    );
  }

  #[tokio::test]
  async fn qsc_carries_forward_without_committing_when_no_block_spans_all_three_rounds() {
    let (engine, _confirmed_rx, mut committed_rx) = engine(RoundMode::Hw3Ex4, 3).await;
    {
      let mut history = engine.history.lock().await;
      history.push_back(RoundRecord {
        round: 1,
        confirmed: vec![ConfirmedEntry {
          origin: Origin::new("A"),
          id: 1,
          block: empty_block(1, "only-in-r1"),
          fitness: 0.9,
        }],
      });
      history.push_back(RoundRecord {
        round: 2,
        confirmed: vec![ConfirmedEntry {
          origin: Origin::new("A"),
          id: 2,
          block: empty_block(1, "carry-candidate"),
          fitness: 0.7,
        }],
      });
      history.push_back(RoundRecord {
        round: 3,
        confirmed: vec![],
      });
    }

    engine.check_consensus(4).await;

    assert!(committed_rx.try_recv().is_err(), "nothing should commit");
    assert_eq!(
      engine.carried_prev_hash.lock().await.as_deref(),
      Some("carry-candidate")
    );
  }
}
