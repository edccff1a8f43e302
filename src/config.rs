//! Immutable node configuration.
//!
//! Design Note: the source kept tunables as package-level mutable
//! `helpers.*` constants shared across goroutines. Here every constructor
//! takes an `Arc<Config>` instead, built once from [`crate::cli::CliOpts`]
//! and never mutated for the lifetime of the process.

use std::{net::SocketAddr, time::Duration};

use crate::peer::PeerAddr;

/// Selects which round-engine behaviour the node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMode {
  /// Plain rumor mongering only, no TLC/QSC layer.
  Simple,
  /// TLC with unconditional acking.
  Hw3Ex2,
  /// TLC with majority-ack confirmation but no QSC consensus stage.
  Hw3Ex3,
  /// Full QSC: `canAck` verification plus 3-round consensus commit.
  Hw3Ex4,
}

impl RoundMode {
  pub fn is_tlc(self) -> bool {
    !matches!(self, RoundMode::Simple)
  }

  pub fn is_qsc(self) -> bool {
    matches!(self, RoundMode::Hw3Ex4)
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  pub name: String,
  pub gossip_addr: SocketAddr,
  pub ui_port: u16,
  pub bootstrap_peers: Vec<PeerAddr>,
  pub anti_entropy: Option<Duration>,
  pub rtimer: Option<Duration>,
  pub cluster_size: usize,
  pub stubborn_timeout: Duration,
  pub hop_limit: u8,
  pub mode: RoundMode,
  pub ack_timeout: Duration,
  pub mine_threshold: usize,
  pub seconds_per_block: u64,
  pub max_datagram: usize,
}

impl Config {
  pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);
  pub const DEFAULT_ANTI_ENTROPY: Duration = Duration::from_secs(10);
  pub const DEFAULT_STUBBORN_TIMEOUT: Duration = Duration::from_secs(5);
  pub const DEFAULT_SECONDS_PER_BLOCK: u64 = 10;
  pub const MAX_DATAGRAM: usize = 16 * 1024;

  pub fn majority(&self) -> usize {
    self.cluster_size / 2 + 1
  }
}
