//! Error taxonomy for the gossip/TLC/chain core.
//!
//! The core is a best-effort network service (spec §7): every error here
//! is recovered locally by the caller, never panics on remote input, and
//! never escapes to the UI beyond aggregate state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GossipError {
  #[error("malformed wire packet: {0}")]
  MalformedWire(String),

  #[error("stale echo of already-known record")]
  StaleEcho,

  #[error("out of order record, id {got} > expected {expected}")]
  OutOfOrder { got: u32, expected: u32 },

  #[error("no route known for origin {0}")]
  NotRouted(String),

  #[error("hop limit expired")]
  TtlExpired,

  #[error("invalid block: {0}")]
  InvalidBlock(String),

  #[error("invalid transaction: {0}")]
  InvalidTx(String),

  #[error("timed out waiting for {0}")]
  Timeout(&'static str),

  #[error("bounded channel overflow, dropping new item")]
  Overflow,
}

pub type Result<T> = std::result::Result<T, GossipError>;
