//! Per-origin next-expected sequence numbers and message store (spec §3,
//! §4.1). Design Note: replaces the shared-map-plus-global-`RWLock`
//! shape with a `PerOrigin<T>` abstraction -- the top-level map is only
//! locked during slot insertion, each origin's log has its own lock.

use std::{collections::BTreeMap, sync::Arc};

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::{MongerableRecord, Origin, SeqNo};

#[derive(Debug, Default)]
struct PerOriginLog {
  /// `1 + max{k : Messages[o][1..k] all present}`.
  next_total: SeqNo,
  /// Advances only when an unconfirmed TLC message joins the
  /// contiguous prefix (spec §3 VectorClock invariants).
  next_round: SeqNo,
  messages: BTreeMap<SeqNo, MongerableRecord>,
}

impl PerOriginLog {
  fn new() -> Self {
    Self {
      next_total: 1,
      next_round: 1,
      messages: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Default)]
pub struct VectorClock {
  origins: DashMap<Origin, Arc<RwLock<PerOriginLog>>>,
}

impl VectorClock {
  pub fn new() -> Self {
    Self::default()
  }

  fn slot(&self, origin: &Origin) -> Arc<RwLock<PerOriginLog>> {
    self
      .origins
      .entry(origin.clone())
      .or_insert_with(|| Arc::new(RwLock::new(PerOriginLog::new())))
      .clone()
  }

  /// Installs `record` if its `(origin, id)` is new. Returns `false` on
  /// replay (spec §4.1 "the VectorClock rejects replays by returning
  /// false from addMessage").
  pub async fn add_message(&self, record: MongerableRecord) -> bool {
    let origin = record.origin().clone();
    let id = record.id();
    if id == 0 {
      return false;
    }
    let slot = self.slot(&origin);
    let mut log = slot.write().await;
    if log.messages.contains_key(&id) {
      return false;
    }
    log.messages.insert(id, record);
    while let Some(next) = log.messages.get(&log.next_total) {
      let bump_round = matches!(next, MongerableRecord::Tlc(t) if t.is_unconfirmed());
      log.next_total += 1;
      if bump_round {
        log.next_round += 1;
      }
    }
    true
  }

  pub async fn next_total(&self, origin: &Origin) -> SeqNo {
    self.slot(origin).read().await.next_total
  }

  pub async fn next_round(&self, origin: &Origin) -> SeqNo {
    self.slot(origin).read().await.next_round
  }

  pub async fn get(&self, origin: &Origin, id: SeqNo) -> Option<MongerableRecord> {
    self.slot(origin).read().await.messages.get(&id).cloned()
  }

  /// Every record exposed to observers for `origin`, in contiguous
  /// sequence order (spec §5 ordering guarantees).
  pub async fn contiguous(&self, origin: &Origin) -> Vec<MongerableRecord> {
    let log = self.slot(origin).read().await;
    (1..log.next_total)
      .filter_map(|id| log.messages.get(&id).cloned())
      .collect()
  }

  pub fn known_origins(&self) -> Vec<Origin> {
    self.origins.iter().map(|e| e.key().clone()).collect()
  }

  /// Snapshot of the local want vector, used both to build `Status`
  /// packets and to stamp a TLC message's `vector_clock` field.
  pub async fn create_want(&self) -> Vec<(Origin, SeqNo)> {
    let mut want = Vec::new();
    for origin in self.known_origins() {
      let next_total = self.next_total(&origin).await;
      want.push((origin, next_total));
    }
    want
  }

  /// Reconciliation comparison (spec §4.1 `reconcile`): `i_have` is the
  /// first `(origin, next_id)` the peer lacks; `you_have` is the first
  /// origin where the peer is ahead of us.
  pub async fn compare(
    &self,
    peer_want: &[(Origin, SeqNo)],
  ) -> (Option<(Origin, SeqNo)>, Option<Origin>) {
    use std::collections::HashMap;
    let peer_map: HashMap<&Origin, SeqNo> =
      peer_want.iter().map(|(o, n)| (o, *n)).collect();

    for origin in self.known_origins() {
      let local_next = self.next_total(&origin).await;
      let peer_next = peer_map.get(&origin).copied().unwrap_or(1);
      if local_next > peer_next {
        return (Some((origin, peer_next)), None);
      }
    }

    for (origin, peer_next) in peer_want {
      let local_next = self.next_total(origin).await;
      if *peer_next > local_next {
        return (None, Some(origin.clone()));
      }
    }

    (None, None)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::model::RumorRecord;

  fn rumor(origin: &str, id: SeqNo) -> MongerableRecord {
    MongerableRecord::Rumor(RumorRecord {
      origin: Origin::new(origin),
      id,
      text: "hello".into(),
    })
  }

  #[tokio::test]
  async fn contiguity_holds_after_out_of_order_arrival() {
    let vc = VectorClock::new();
    assert!(vc.add_message(rumor("A", 2)).await);
    assert_eq!(vc.next_total(&Origin::new("A")).await, 1);
    assert!(vc.add_message(rumor("A", 1)).await);
    assert_eq!(vc.next_total(&Origin::new("A")).await, 3);
    assert_eq!(vc.contiguous(&Origin::new("A")).await.len(), 2);
  }

  #[tokio::test]
  async fn duplicate_add_is_rejected() {
    let vc = VectorClock::new();
    assert!(vc.add_message(rumor("A", 1)).await);
    assert!(!vc.add_message(rumor("A", 1)).await);
  }

  #[tokio::test]
  async fn compare_finds_i_have_and_you_have() {
    let vc = VectorClock::new();
    vc.add_message(rumor("A", 1)).await;
    vc.add_message(rumor("A", 2)).await;

    let peer_want = vec![(Origin::new("A"), 1), (Origin::new("B"), 3)];
    let (i_have, you_have) = vc.compare(&peer_want).await;
    assert_eq!(i_have, Some((Origin::new("A"), 1)));
    assert_eq!(you_have, None);

    vc.add_message(rumor("A", 1)).await; // no-op, already present
    let peer_want = vec![(Origin::new("A"), 3)];
    let (i_have, you_have) = vc.compare(&peer_want).await;
    assert_eq!(i_have, None);
    assert_eq!(you_have, None);

    let peer_want = vec![(Origin::new("B"), 3)];
    let (i_have, you_have) = vc.compare(&peer_want).await;
    assert_eq!(i_have, None);
    assert_eq!(you_have, Some(Origin::new("B")));
  }
}
