//! Command-line surfaces for both binaries (spec §6 "CLI surface").

use std::time::Duration;

use clap::{ArgGroup, Parser};

use crate::{
  config::RoundMode,
  peer::PeerAddr,
};

/// `gossiper` node options.
#[derive(Debug, Parser)]
#[clap(version, about)]
#[clap(group(
  ArgGroup::new("round_mode")
    .args(&["simple", "hw3ex2", "hw3ex3", "hw3ex4"])
    .multiple(false)
))]
pub struct CliOpts {
  #[clap(long = "UIPort", default_value = "8080", help = "HTTP read-model port")]
  pub ui_port: u16,

  #[clap(long = "gossipAddr", default_value = "127.0.0.1:5000", help = "UDP gossip address")]
  pub gossip_addr: String,

  #[clap(long, help = "this node's origin name")]
  pub name: String,

  #[clap(long, help = "comma-separated host:port bootstrap peers")]
  pub peers: Option<String>,

  #[clap(long = "antiEntropy", default_value = "10", help = "anti-entropy period, seconds (0 disables)")]
  pub anti_entropy: u64,

  #[clap(long, default_value = "0", help = "route-rumor period, seconds (0 disables)")]
  pub rtimer: u64,

  #[clap(long = "N", help = "cluster size for TLC/QSC majorities")]
  pub n: Option<usize>,

  #[clap(long = "stubbornTimeout", default_value = "5", help = "stubborn-republish period, seconds")]
  pub stubborn_timeout: u64,

  #[clap(long = "hopLimit", default_value = "10", help = "hop limit for private/ack relays")]
  pub hop_limit: u8,

  #[clap(long, help = "broadcast-only mode, no TLC/QSC layer")]
  pub simple: bool,

  #[clap(long, help = "TLC with unconditional acking")]
  pub hw3ex2: bool,

  #[clap(long, help = "TLC with majority-ack confirmation, no QSC")]
  pub hw3ex3: bool,

  #[clap(long, help = "full QSC: canAck verification plus 3-round commit")]
  pub hw3ex4: bool,
}

impl CliOpts {
  pub fn round_mode(&self) -> RoundMode {
    if self.hw3ex2 {
      RoundMode::Hw3Ex2
    } else if self.hw3ex3 {
      RoundMode::Hw3Ex3
    } else if self.hw3ex4 {
      RoundMode::Hw3Ex4
    } else {
      RoundMode::Simple
    }
  }

  pub fn bootstrap_peers(&self) -> Result<Vec<PeerAddr>, std::net::AddrParseError> {
    match &self.peers {
      None => Ok(Vec::new()),
      Some(list) => list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect(),
    }
  }

  pub fn anti_entropy(&self) -> Option<Duration> {
    (self.anti_entropy > 0).then(|| Duration::from_secs(self.anti_entropy))
  }

  pub fn rtimer(&self) -> Option<Duration> {
    (self.rtimer > 0).then(|| Duration::from_secs(self.rtimer))
  }

  pub fn stubborn_timeout(&self) -> Duration {
    Duration::from_secs(self.stubborn_timeout)
  }

  pub fn cluster_size(&self) -> usize {
    self.n.unwrap_or(1)
  }
}

/// `client` one-shot request options. At most one semantic operation is
/// accepted per invocation; a conflicting combination is rejected in
/// [`ClientOpts::operation`], not by `clap`, since the set of allowed
/// combinations (e.g. `--request` needs `--keywords`+`--budget` together
/// to make sense only in the legacy search surface) doesn't map cleanly
/// onto a single `ArgGroup`.
#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct ClientOpts {
  #[clap(long, default_value = "8080", help = "target gossiper's HTTP read-model port")]
  pub ui_port: u16,

  #[clap(long, help = "post a chat message")]
  pub msg: Option<String>,

  #[clap(long, help = "origin name for a private message, used with --msg")]
  pub dest: Option<String>,

  #[clap(long, help = "legacy file-share index path, accepted but inert")]
  pub file: Option<String>,

  #[clap(long, help = "legacy file-share request, hex hash")]
  pub request: Option<String>,

  #[clap(long, help = "legacy file-share search keywords")]
  pub keywords: Option<String>,

  #[clap(long, help = "legacy file-share search hop budget")]
  pub budget: Option<u32>,
}

/// The single semantic operation a [`ClientOpts`] invocation resolved to.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientOperation {
  Broadcast { text: String },
  Private { to: String, text: String },
  Search { keywords: String, budget: u32 },
  Request { hash: String },
}

impl ClientOpts {
  /// Resolves the parsed flags to exactly one operation, or rejects the
  /// combination per spec §6 ("at most one semantic operation per
  /// invocation").
  pub fn operation(&self) -> Result<ClientOperation, String> {
    let has_msg = self.msg.is_some();
    let has_search = self.keywords.is_some() || self.budget.is_some();
    let has_request = self.request.is_some();
    let has_file = self.file.is_some();

    match (has_msg, has_search, has_request, has_file) {
      (true, false, false, false) => {
        let text = self.msg.clone().unwrap();
        match &self.dest {
          Some(to) => Ok(ClientOperation::Private { to: to.clone(), text }),
          None => Ok(ClientOperation::Broadcast { text }),
        }
      }
      (false, true, false, false) => {
        let (Some(keywords), Some(budget)) = (self.keywords.clone(), self.budget) else {
          return Err("bad argument combination".into());
        };
        Ok(ClientOperation::Search { keywords, budget })
      }
      (false, false, true, false) => Ok(ClientOperation::Request {
        hash: self.request.clone().unwrap(),
      }),
      _ => Err("bad argument combination".into()),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn round_mode_defaults_to_simple() {
    let opts = CliOpts::parse_from(["gossiper", "--name", "A"]);
    assert_eq!(opts.round_mode(), RoundMode::Simple);
  }

  #[test]
  fn round_mode_reads_hw3ex4() {
    let opts = CliOpts::parse_from(["gossiper", "--name", "A", "--hw3ex4"]);
    assert_eq!(opts.round_mode(), RoundMode::Hw3Ex4);
  }

  #[test]
  fn bootstrap_peers_parses_comma_list() {
    let opts = CliOpts::parse_from([
      "gossiper",
      "--name",
      "A",
      "--peers",
      "127.0.0.1:5001,127.0.0.1:5002",
    ]);
    assert_eq!(opts.bootstrap_peers().unwrap().len(), 2);
  }

  #[test]
  fn zero_anti_entropy_disables() {
    let opts = CliOpts::parse_from(["gossiper", "--name", "A", "--antiEntropy", "0"]);
    assert_eq!(opts.anti_entropy(), None);
  }

  #[test]
  fn plain_msg_is_a_broadcast() {
    let opts = ClientOpts::parse_from(["client", "--msg", "hi"]);
    assert_eq!(
      opts.operation().unwrap(),
      ClientOperation::Broadcast { text: "hi".into() }
    );
  }

  #[test]
  fn msg_with_dest_is_private() {
    let opts = ClientOpts::parse_from(["client", "--msg", "hi", "--dest", "B"]);
    assert_eq!(
      opts.operation().unwrap(),
      ClientOperation::Private {
        to: "B".into(),
        text: "hi".into()
      }
    );
  }

  #[test]
  fn msg_and_search_conflict() {
    let opts = ClientOpts::parse_from(["client", "--msg", "hi", "--keywords", "foo", "--budget", "3"]);
    assert!(opts.operation().is_err());
  }

  #[test]
  fn search_needs_both_keywords_and_budget() {
    let opts = ClientOpts::parse_from(["client", "--keywords", "foo"]);
    assert!(opts.operation().is_err());
  }
}
