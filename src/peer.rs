//! Peer addresses and the concurrent peer set.

use std::{fmt, net::SocketAddr, str::FromStr};

use dashmap::DashSet;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};

/// An opaque `host:port` endpoint. Equality and hashing are structural
/// over the string form, matching the wire representation used by every
/// `Packet` variant that names a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddr(String);

impl PeerAddr {
  pub fn new(s: impl Into<String>) -> Self {
    Self(s.into())
  }
}

impl fmt::Display for PeerAddr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl FromStr for PeerAddr {
  type Err = std::net::AddrParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    // validate shape, but keep the string form as the canonical identity
    let _: SocketAddr = s.parse()?;
    Ok(Self(s.to_owned()))
  }
}

impl From<SocketAddr> for PeerAddr {
  fn from(addr: SocketAddr) -> Self {
    Self(addr.to_string())
  }
}

impl TryFrom<&PeerAddr> for SocketAddr {
  type Error = std::net::AddrParseError;

  fn try_from(value: &PeerAddr) -> Result<Self, Self::Error> {
    value.0.parse()
  }
}

/// Concurrent set of known peer addresses with uniform random sampling.
#[derive(Debug, Default)]
pub struct PeerSet {
  peers: DashSet<PeerAddr>,
}

impl PeerSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, peer: PeerAddr) -> bool {
    self.peers.insert(peer)
  }

  pub fn contains(&self, peer: &PeerAddr) -> bool {
    self.peers.contains(peer)
  }

  pub fn len(&self) -> usize {
    self.peers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.peers.is_empty()
  }

  pub fn snapshot(&self) -> Vec<PeerAddr> {
    self.peers.iter().map(|p| p.clone()).collect()
  }

  /// Uniformly samples one peer, optionally excluding one address.
  pub fn sample(&self, exclude: Option<&PeerAddr>) -> Option<PeerAddr> {
    let mut rng = rand::thread_rng();
    self
      .peers
      .iter()
      .filter(|p| exclude.map(|e| e != p.key()).unwrap_or(true))
      .choose(&mut rng)
      .map(|p| p.key().clone())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn sample_excludes_given_peer() {
    let set = PeerSet::new();
    set.insert(PeerAddr::new("127.0.0.1:5000"));
    let only = PeerAddr::new("127.0.0.1:5000");
    assert_eq!(set.sample(Some(&only)), None);
  }

  #[test]
  fn sample_returns_known_peer() {
    let set = PeerSet::new();
    set.insert(PeerAddr::new("127.0.0.1:5001"));
    assert_eq!(
      set.sample(None),
      Some(PeerAddr::new("127.0.0.1:5001"))
    );
  }
}
