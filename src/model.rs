//! Wire-level data model shared by the rumor, TLC and chain layers.
//!
//! Every mongerable thing carries an `(origin, id)` pair; the mongering
//! layer (`crate::rumor`) treats all four variants of [`MongerableRecord`]
//! uniformly, as specified in spec §3 "Mongerable record".

use serde::{Deserialize, Serialize};

use crate::{chain::Block, tx::Transaction};

/// A node name, globally unique by user assertion; the identity key for
/// all per-node state (vector clocks, routing table, TLC round state).
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Origin(pub String);

impl Origin {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }
}

impl std::fmt::Display for Origin {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for Origin {
  fn from(s: &str) -> Self {
    Self(s.to_owned())
  }
}

/// Monotonically increasing per-origin sequence number. `0` means
/// "unassigned by the producer" and is never a valid record id.
pub type SeqNo = u32;

/// A plain rumor: free-form text disseminated by the mongering layer.
/// An empty `text` denotes a route-rumor (spec §4.1): it updates the DSDV
/// table at receivers but is never surfaced in the UI message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RumorRecord {
  pub origin: Origin,
  pub id: SeqNo,
  pub text: String,
}

impl RumorRecord {
  pub fn is_route_rumor(&self) -> bool {
    self.text.is_empty()
  }
}

/// `confirmed == -1` denotes an unconfirmed proposal; any non-negative
/// value names the id of the original proposal this message confirms.
pub const UNCONFIRMED: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlcMessage {
  pub origin: Origin,
  pub id: SeqNo,
  pub confirmed: i64,
  pub tx_block: Block,
  pub vector_clock: Option<Vec<(Origin, SeqNo)>>,
  pub fitness: f32,
}

impl TlcMessage {
  pub fn is_unconfirmed(&self) -> bool {
    self.confirmed == UNCONFIRMED
  }
}

/// Sum over {plain rumor, TLC message, transaction, block}. All four
/// carry `(origin, id)`; the mongering layer never needs to know which
/// variant it is carrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MongerableRecord {
  Rumor(RumorRecord),
  Tlc(TlcMessage),
  Transaction(Transaction),
  Block { origin: Origin, id: SeqNo, block: Block },
}

impl MongerableRecord {
  pub fn origin(&self) -> &Origin {
    match self {
      MongerableRecord::Rumor(r) => &r.origin,
      MongerableRecord::Tlc(t) => &t.origin,
      MongerableRecord::Transaction(t) => t.origin(),
      MongerableRecord::Block { origin, .. } => origin,
    }
  }

  pub fn id(&self) -> SeqNo {
    match self {
      MongerableRecord::Rumor(r) => r.id,
      MongerableRecord::Tlc(t) => t.id,
      MongerableRecord::Transaction(t) => t.id(),
      MongerableRecord::Block { id, .. } => *id,
    }
  }
}
