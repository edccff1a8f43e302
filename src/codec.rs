//! The `Packet` wire sum type and its deterministic encoding (spec §6).
//!
//! Field order is significant for the byte layout; serde's derive walks
//! struct/enum fields in declaration order and `bincode` encodes exactly
//! that order with no padding, so declaration order here *is* the wire
//! contract (teacher pattern: `storage/blocks.rs` already leans on
//! `bincode::{serialize, deserialize}` for byte-stable persistence).

use serde::{Deserialize, Serialize};

use crate::{
  chain::Block,
  model::{MongerableRecord, Origin, SeqNo, TlcMessage},
  tx::Transaction,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Packet {
  Simple {
    from: Origin,
    relay: Origin,
    text: String,
  },
  Rumor {
    origin: Origin,
    id: SeqNo,
    text: String,
  },
  Status {
    want: Vec<(Origin, SeqNo)>,
  },
  Private {
    origin: Origin,
    id: SeqNo,
    text: String,
    destination: Origin,
    hop_limit: u8,
  },
  /// File-sharing legacy (spec §1 out of scope): accepted and relayed,
  /// never required for the consensus/blockchain core.
  DataRequest {
    origin: Origin,
    destination: Origin,
    hop_limit: u8,
    hash: Vec<u8>,
  },
  DataReply {
    origin: Origin,
    destination: Origin,
    hop_limit: u8,
    hash: Vec<u8>,
    data: Vec<u8>,
  },
  SearchRequest {
    origin: Origin,
    budget: u64,
    keywords: Vec<String>,
  },
  SearchReply {
    origin: Origin,
    destination: Origin,
    hop_limit: u8,
    results: Vec<(String, Vec<u8>)>,
  },
  Tlc {
    origin: Origin,
    id: SeqNo,
    confirmed: i64,
    tx_block: Block,
    vector_clock: Option<Vec<(Origin, SeqNo)>>,
    fitness: f32,
  },
  TlcAck {
    origin: Origin,
    id: SeqNo,
    destination: Origin,
    hop_limit: u8,
  },
  Transaction {
    origin: Origin,
    id: SeqNo,
    tx: Transaction,
  },
  MongerableBlock {
    origin: Origin,
    id: SeqNo,
    block: Block,
  },
}

impl From<MongerableRecord> for Packet {
  fn from(record: MongerableRecord) -> Self {
    match record {
      MongerableRecord::Rumor(r) => Packet::Rumor {
        origin: r.origin,
        id: r.id,
        text: r.text,
      },
      MongerableRecord::Tlc(t) => Packet::Tlc {
        origin: t.origin,
        id: t.id,
        confirmed: t.confirmed,
        tx_block: t.tx_block,
        vector_clock: t.vector_clock,
        fitness: t.fitness,
      },
      MongerableRecord::Transaction(tx) => Packet::Transaction {
        origin: tx.origin().clone(),
        id: tx.id(),
        tx,
      },
      MongerableRecord::Block { origin, id, block } => {
        Packet::MongerableBlock { origin, id, block }
      }
    }
  }
}

/// The inverse of [`From<MongerableRecord> for Packet`], for the four
/// packet variants the mongering layer actually disseminates. Any other
/// variant (`Status`, `Private`, ...) is control traffic, not a record.
impl TryFrom<Packet> for MongerableRecord {
  type Error = ();

  fn try_from(packet: Packet) -> Result<Self, Self::Error> {
    match packet {
      Packet::Rumor { origin, id, text } => {
        Ok(MongerableRecord::Rumor(crate::model::RumorRecord { origin, id, text }))
      }
      Packet::Tlc {
        origin,
        id,
        confirmed,
        tx_block,
        vector_clock,
        fitness,
      } => Ok(MongerableRecord::Tlc(TlcMessage {
        origin,
        id,
        confirmed,
        tx_block,
        vector_clock,
        fitness,
      })),
      Packet::Transaction { tx, .. } => Ok(MongerableRecord::Transaction(tx)),
      Packet::MongerableBlock { origin, id, block } => {
        Ok(MongerableRecord::Block { origin, id, block })
      }
      _ => Err(()),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
  #[error("failed to decode packet: {0}")]
  Decode(#[from] bincode::Error),

  #[error("packet exceeds max datagram size of {max} bytes: {actual}")]
  TooLarge { max: usize, actual: usize },
}

pub fn encode(packet: &Packet, max_datagram: usize) -> Result<Vec<u8>, CodecError> {
  let bytes = bincode::serialize(packet)?;
  if bytes.len() > max_datagram {
    return Err(CodecError::TooLarge {
      max: max_datagram,
      actual: bytes.len(),
    });
  }
  Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Packet, CodecError> {
  Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn status_packet_roundtrips() {
    let packet = Packet::Status {
      want: vec![(Origin::new("A"), 3), (Origin::new("B"), 1)],
    };
    let bytes = encode(&packet, MAX_DATAGRAM).unwrap();
    let decoded = decode(&bytes).unwrap();
    match decoded {
      Packet::Status { want } => {
        assert_eq!(want, vec![(Origin::new("A"), 3), (Origin::new("B"), 1)])
      }
      _ => panic!("wrong variant"),
    }
  }

  const MAX_DATAGRAM: usize = crate::config::Config::MAX_DATAGRAM;

  #[test]
  fn oversized_packet_is_rejected() {
    let packet = Packet::Simple {
      from: Origin::new("A"),
      relay: Origin::new("A"),
      text: "x".repeat(20 * 1024),
    };
    assert!(encode(&packet, MAX_DATAGRAM).is_err());
  }
}
