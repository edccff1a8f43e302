//! DSDV routing table: origin -> next-hop, keyed by highest observed
//! sequence (spec §2, §4.1).

use dashmap::DashMap;

use crate::{
  model::{Origin, SeqNo},
  peer::PeerAddr,
};

#[derive(Debug, Default)]
pub struct RoutingTable {
  routes: DashMap<Origin, (PeerAddr, SeqNo)>,
}

impl RoutingTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Records `sender` as the next hop for `origin` iff `id` is higher
  /// than any sequence number previously observed for that origin (spec
  /// §4.1 "Routing (DSDV)").
  pub fn observe(&self, origin: &Origin, id: SeqNo, sender: PeerAddr) {
    match self.routes.get(origin).map(|r| r.1) {
      Some(highest) if highest >= id => {}
      _ => {
        self.routes.insert(origin.clone(), (sender, id));
      }
    }
  }

  pub fn next_hop(&self, origin: &Origin) -> Option<PeerAddr> {
    self.routes.get(origin).map(|r| r.0.clone())
  }

  pub fn snapshot(&self) -> Vec<(Origin, PeerAddr)> {
    self
      .routes
      .iter()
      .map(|e| (e.key().clone(), e.value().0.clone()))
      .collect()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn keeps_route_with_highest_sequence() {
    let table = RoutingTable::new();
    let a = Origin::new("A");
    table.observe(&a, 1, PeerAddr::new("127.0.0.1:5001"));
    table.observe(&a, 3, PeerAddr::new("127.0.0.1:5002"));
    table.observe(&a, 2, PeerAddr::new("127.0.0.1:5003"));
    assert_eq!(table.next_hop(&a), Some(PeerAddr::new("127.0.0.1:5002")));
  }
}
