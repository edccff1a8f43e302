//! Unconfirmed pool and proof-of-work block construction (spec §4.3).

use std::{collections::VecDeque, sync::Arc};

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use super::block::{self, Block};
use crate::{
  config::Config,
  crypto::PaillierPublicKey,
  model::Origin,
  tx::Transaction,
};

/// Transactions waiting to be included in a block. Order is arrival
/// order (spec §4.3 "Admission to the unconfirmed pool").
#[derive(Debug, Default)]
pub struct UnconfirmedPool {
  pending: Mutex<VecDeque<Transaction>>,
}

impl UnconfirmedPool {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn submit(&self, tx: Transaction) {
    self.pending.lock().await.push_back(tx);
  }

  pub async fn len(&self) -> usize {
    self.pending.lock().await.len()
  }

  /// Takes a snapshot of everything currently queued, leaving the pool
  /// empty. Transactions invalidated after a reorg are simply never
  /// re-queued by the caller.
  pub async fn snapshot(&self) -> Vec<Transaction> {
    std::mem::take(&mut *self.pending.lock().await).into()
  }

  /// Removes transactions that ended up included in an accepted block
  /// (spec §3 "Unconfirmed pool... exit when included... or invalidated
  /// by a reorg"), used by `removeConfirmedTx` in scenario 6.
  pub async fn remove_confirmed(&self, included: &[Transaction]) {
    let names: std::collections::HashSet<String> =
      included.iter().map(|t| t.name()).collect();
    let mut pending = self.pending.lock().await;
    pending.retain(|t| !names.contains(&t.name()));
  }

  pub async fn requeue(&self, txs: Vec<Transaction>) {
    let mut pending = self.pending.lock().await;
    for tx in txs {
      pending.push_front(tx);
    }
  }
}

/// Drives the proof-of-work search for one candidate block on a
/// blocking thread pool (the search is CPU-bound and must not block the
/// async runtime), cancellable via a watch channel carrying the highest
/// block id known to already be settled (spec §4.3 "mining is
/// preemptable").
pub struct Miner {
  config: Arc<Config>,
  pool: Arc<UnconfirmedPool>,
  stop_mining: watch::Sender<u64>,
}

impl Miner {
  pub fn new(config: Arc<Config>, pool: Arc<UnconfirmedPool>) -> Self {
    let (stop_mining, _) = watch::channel(0);
    Self {
      config,
      pool,
      stop_mining,
    }
  }

  /// Aborts any in-flight mining attempt for a candidate at or below
  /// `settled_id`.
  pub fn notify_settled(&self, settled_id: u64) {
    let _ = self.stop_mining.send(settled_id);
  }

  pub fn should_mine(&self, queued: usize) -> bool {
    queued >= self.config.mine_threshold
  }

  /// Snapshots the pool and mines a block on top of `prev`, returning
  /// `None` if mining was preempted by a higher settled id before a
  /// valid nonce was found.
  pub async fn mine(
    &self,
    origin: Origin,
    prev: &Block,
    difficulty: u32,
    paillier: PaillierPublicKey,
  ) -> Option<Block> {
    let transactions = self.pool.snapshot().await;
    if transactions.is_empty() {
      return None;
    }

    let candidate_id = prev.id + 1;
    let mut stop_rx = self.stop_mining.subscribe();
    let prev_hash = prev.hash.clone();

    let result = tokio::task::spawn_blocking(move || {
      let mut nonce: u64 = 0;
      loop {
        if *stop_rx.borrow() >= candidate_id {
          return None;
        }
        let block = Block {
          id: candidate_id,
          origin: origin.clone(),
          prev_hash: prev_hash.clone(),
          transactions: transactions.clone(),
          difficulty,
          nonce,
          timestamp: Utc::now(),
          hash: String::new(),
        };
        let hash = block::hash_block(&block, &paillier);
        if block::leading_zeros(&hash) >= difficulty {
          let mut finished = block;
          finished.hash = hash;
          return Some(finished);
        }
        nonce += 1;
        if stop_rx.has_changed().unwrap_or(false) {
          let _ = stop_rx.borrow_and_update();
        }
      }
    })
    .await
    .expect("mining task panicked");

    if let Some(block) = &result {
      info!("mined block {block} at difficulty {difficulty}");
    } else {
      debug!("mining for candidate {candidate_id} preempted");
    }
    result
  }
}
