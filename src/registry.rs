//! Registry/voting adapter (spec §2 row 9, §4.3 transaction semantics).
//!
//! Maps semantic transactions to mongerable records and enforces the
//! signature/registration checks the spec requires at admission, before a
//! transaction is let into the rumor layer's VectorClock or the miner's
//! unconfirmed pool.

use dashmap::DashMap;

use crate::{
  crypto::{Ciphertext, VerifyingKey},
  model::Origin,
};

#[derive(Debug, Clone)]
pub struct PollRecord {
  pub id: u32,
  pub origin: Origin,
  pub question: String,
  pub voters: Vec<Origin>,
  pub deadline: chrono::DateTime<chrono::Utc>,
  pub votes: Vec<(Origin, Ciphertext)>,
  pub closed_result: Option<u64>,
}

/// Known signing keys and poll state, shared read-mostly state guarded
/// by `dashmap`'s internal sharded locks (Design Note: per-slot fine
/// grained locking instead of one coarse `RWLock` over a single map).
#[derive(Debug, Default)]
pub struct Registry {
  keys: DashMap<Origin, VerifyingKey>,
  polls: DashMap<u32, PollRecord>,
  next_poll_id: std::sync::atomic::AtomicU32,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_registered(&self, origin: &Origin) -> bool {
    self.keys.contains_key(origin)
  }

  pub fn register(&self, origin: Origin, key: VerifyingKey) -> bool {
    if self.keys.contains_key(&origin) {
      return false;
    }
    self.keys.insert(origin, key);
    true
  }

  pub fn key_of(&self, origin: &Origin) -> Option<VerifyingKey> {
    self.keys.get(origin).map(|k| *k)
  }

  pub fn next_poll_id(&self) -> u32 {
    self.next_poll_id.load(std::sync::atomic::Ordering::SeqCst)
  }

  pub fn insert_poll(&self, poll: PollRecord) {
    self
      .next_poll_id
      .fetch_max(poll.id + 1, std::sync::atomic::Ordering::SeqCst);
    self.polls.insert(poll.id, poll);
  }

  pub fn poll(&self, id: u32) -> Option<PollRecord> {
    self.polls.get(&id).map(|p| p.clone())
  }

  pub fn poll_exists(&self, id: u32) -> bool {
    self.polls.contains_key(&id)
  }

  pub fn has_voted(&self, poll_id: u32, voter: &Origin) -> bool {
    self
      .polls
      .get(&poll_id)
      .map(|p| p.votes.iter().any(|(o, _)| o == voter))
      .unwrap_or(false)
  }

  pub fn record_vote(&self, poll_id: u32, voter: Origin, ciphertext: Ciphertext) {
    if let Some(mut poll) = self.polls.get_mut(&poll_id) {
      poll.votes.push((voter, ciphertext));
    }
  }

  pub fn ciphertexts(&self, poll_id: u32) -> Vec<Ciphertext> {
    self
      .polls
      .get(&poll_id)
      .map(|p| p.votes.iter().map(|(_, c)| c.clone()).collect())
      .unwrap_or_default()
  }

  pub fn record_result(&self, poll_id: u32, count: u64) {
    if let Some(mut poll) = self.polls.get_mut(&poll_id) {
      poll.closed_result = Some(count);
    }
  }

  pub fn all_polls(&self) -> Vec<PollRecord> {
    self.polls.iter().map(|p| p.clone()).collect()
  }
}
