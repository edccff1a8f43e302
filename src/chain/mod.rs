//! Miner + Chain: unconfirmed pool, PoW, fork tracking, reorg,
//! transaction validity (spec §3, §4.3).

mod block;
mod fork;
mod miner;

use std::{collections::HashSet, sync::Arc};

use tracing::info;

pub use block::{canonical_serialize, hash_block, leading_zeros, Block};
pub use fork::{ChainView, ForkOutcome};
pub use miner::{Miner, UnconfirmedPool};

use crate::{
  config::{Config, RoundMode},
  crypto::{self, PaillierPublicKey},
  registry::{PollRecord, Registry},
  tx::Transaction,
};

pub fn network_paillier_public() -> PaillierPublicKey {
  crypto::network_paillier_keypair().public
}

/// The append-only, ordered sequence of blocks plus at most one
/// tracked side chain (spec §3 "Chain").
pub struct Chain {
  config: Arc<Config>,
  registry: Arc<Registry>,
  main: ChainView,
  side: Option<ChainView>,
  current_difficulty: u32,
}

impl Chain {
  pub const INITIAL_DIFFICULTY: u32 = 3;
  pub const DIFFICULTY_WINDOW: usize = 10;

  pub fn new(config: Arc<Config>, registry: Arc<Registry>) -> Self {
    let genesis = block::genesis_block();
    Self {
      config,
      registry,
      main: ChainView {
        blocks: vec![genesis],
      },
      side: None,
      current_difficulty: Self::INITIAL_DIFFICULTY,
    }
  }

  pub fn height(&self) -> u64 {
    self.main.height()
  }

  pub fn tip(&self) -> &Block {
    self.main.tip().expect("genesis block is always present")
  }

  pub fn current_difficulty(&self) -> u32 {
    self.current_difficulty
  }

  pub fn blocks(&self) -> &[Block] {
    &self.main.blocks
  }

  /// spec §4.2 `canAck`: in QSC mode, a proposal may only be acked if its
  /// `prev_hash` chains to the locally committed tip and no committed
  /// block already holds a transaction with the same name.
  pub fn can_ack(&self, tlc_prev_hash: &str, transactions: &[Transaction]) -> bool {
    if !self.config.mode.is_qsc() {
      return true;
    }
    if tlc_prev_hash != self.tip().hash {
      return false;
    }
    let committed_names: HashSet<String> = self
      .main
      .blocks
      .iter()
      .flat_map(|b| b.transactions.iter().map(|t| t.name()))
      .collect();
    !transactions
      .iter()
      .any(|t| committed_names.contains(&t.name()))
  }

  /// Re-validates a pool snapshot against the currently-known registry,
  /// rejecting duplicates and unknown references (spec §4.3 step 1),
  /// and assigns monotonic ids to `PollTx` as it goes.
  pub fn validate_snapshot(&self, snapshot: Vec<Transaction>) -> Vec<Transaction> {
    let mut seen = HashSet::new();
    let mut accepted = Vec::new();
    let mut next_poll_id = self.registry.next_poll_id();
    for mut tx in snapshot {
      if let Transaction::Poll(p) = &mut tx {
        p.id = next_poll_id;
      }
      if seen.contains(&tx.name()) {
        continue;
      }
      if tx.validate(&self.registry).is_err() {
        continue;
      }
      if let Transaction::Poll(_) = &tx {
        next_poll_id += 1;
      }
      seen.insert(tx.name());
      accepted.push(tx);
    }
    accepted
  }

  /// Applies a block's transactions to the registry. Called once a
  /// block is accepted onto whichever chain ends up main.
  fn apply_block(&self, block: &Block) {
    for tx in &block.transactions {
      match tx {
        Transaction::Register(t) => {
          self.registry.register(t.origin.clone(), t.public_key);
        }
        Transaction::Poll(t) => {
          self.registry.insert_poll(PollRecord {
            id: t.poll_id,
            origin: t.origin.clone(),
            question: t.question.clone(),
            voters: t.voters.clone(),
            deadline: t.deadline,
            votes: Vec::new(),
            closed_result: None,
          });
        }
        Transaction::Vote(t) => {
          self
            .registry
            .record_vote(t.poll_id, t.origin.clone(), t.ciphertext.clone());
        }
        Transaction::Result(t) => {
          self.registry.record_result(t.poll_id, t.count);
        }
      }
    }
  }

  /// Offers a received, already-hash-validated block to the fork
  /// tracker, applying its transactions to the registry if it landed on
  /// (or became) the main chain.
  pub fn receive_block(&mut self, candidate: Block) -> ForkOutcome {
    let outcome = fork::handle_fork(&mut self.main, &mut self.side, candidate.clone());
    match outcome {
      ForkOutcome::Extended => {
        self.apply_block(&candidate);
        self.adjust_difficulty();
      }
      ForkOutcome::Reorged => {
        // registry reflects only the main chain; on reorg, replay every
        // block of the new main chain from genesis so committed state
        // matches the winning fork exactly.
        self.replay_registry();
        self.adjust_difficulty();
      }
      _ => {}
    }
    outcome
  }

  fn replay_registry(&self) {
    for block in &self.main.blocks {
      self.apply_block(block);
    }
  }

  /// spec §4.3 "Difficulty": every 10 blocks, if the mean inter-block
  /// interval of the last 10 blocks is below `secondsPerBlock`,
  /// increment `D`. No decrement path (Design Note: not required).
  fn adjust_difficulty(&mut self) {
    let height = self.main.height();
    if height == 0 || height as usize % Self::DIFFICULTY_WINDOW != 0 {
      return;
    }
    if (height as usize) < Self::DIFFICULTY_WINDOW {
      return;
    }
    let window = &self.main.blocks[(height as usize - Self::DIFFICULTY_WINDOW)..];
    let first = window.first().unwrap().timestamp;
    let last = window.last().unwrap().timestamp;
    let span_secs = (last - first).num_seconds().max(0) as u64;
    let mean = span_secs / Self::DIFFICULTY_WINDOW as u64;
    if mean < self.config.seconds_per_block {
      self.current_difficulty += 1;
      info!(
        "difficulty increased to {} (mean inter-block {}s < target {}s)",
        self.current_difficulty, mean, self.config.seconds_per_block
      );
    }
  }

  pub fn contains_height(&self, height: u64) -> bool {
    height < self.main.height()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn test_chain() -> Chain {
    let config = Arc::new(Config {
      name: "a".into(),
      gossip_addr: "127.0.0.1:9000".parse().unwrap(),
      ui_port: 8080,
      bootstrap_peers: vec![],
      anti_entropy: None,
      rtimer: None,
      cluster_size: 3,
      stubborn_timeout: std::time::Duration::from_secs(5),
      hop_limit: 10,
      mode: RoundMode::Simple,
      ack_timeout: std::time::Duration::from_secs(2),
      mine_threshold: 1,
      seconds_per_block: 10,
      max_datagram: Config::MAX_DATAGRAM,
    });
    Chain::new(config, Arc::new(Registry::new()))
  }

  #[test]
  fn genesis_is_at_height_one() {
    let chain = test_chain();
    assert_eq!(chain.height(), 1);
    assert_eq!(chain.tip().id, 0);
  }

  #[test]
  fn at_most_once_block_per_height() {
    let mut chain = test_chain();
    let mut heights = HashSet::new();
    for b in chain.blocks() {
      assert!(heights.insert(b.id), "duplicate height in main chain");
    }
  }
}
