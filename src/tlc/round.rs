//! Round comparison and fitness tie-breaking (spec §4.2).

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::model::{Origin, SeqNo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundComparison {
  Old,
  Same,
  Future,
}

/// `compareRound` (spec §4.2): `other` is the round we currently believe
/// `origin` to be in; confirmations are adjusted down by one because they
/// report on the round the proposal closed, not the round the origin has
/// already moved into.
pub fn compare_round(other: u32, is_confirmation: bool, my_round: u32) -> RoundComparison {
  let other = if is_confirmation {
    other.saturating_sub(1)
  } else {
    other
  };
  if other < my_round {
    RoundComparison::Old
  } else if other == my_round {
    RoundComparison::Same
  } else {
    RoundComparison::Future
  }
}

/// Deterministic per-(name, round) fitness generator (Design Note: "use a
/// seedable PRNG owned by the TLC engine, seeded from `(name, round)` for
/// determinism in tests while retaining randomness across nodes").
pub fn fitness_for(name: &str, round: u32) -> f32 {
  let mut seed = [0u8; 32];
  let digest = blake_seed(name, round);
  seed[..8].copy_from_slice(&digest.to_le_bytes());
  let mut rng = ChaCha8Rng::from_seed(seed);
  rng.gen_range(0.0..1.0)
}

fn blake_seed(name: &str, round: u32) -> u64 {
  use std::hash::{Hash, Hasher};
  let mut hasher = std::collections::hash_map::DefaultHasher::new();
  name.hash(&mut hasher);
  round.hash(&mut hasher);
  hasher.finish()
}

/// Fitness tie-breaking (spec §4.2): `(fitness desc, origin asc, id asc)`
/// gives every node the same winner among competing confirmed proposals.
pub fn more_fit(
  a: (f32, &Origin, SeqNo),
  b: (f32, &Origin, SeqNo),
) -> std::cmp::Ordering {
  let (fa, oa, ia) = a;
  let (fb, ob, ib) = b;
  fb.partial_cmp(&fa)
    .unwrap_or(std::cmp::Ordering::Equal)
    .then_with(|| oa.cmp(ob))
    .then_with(|| ia.cmp(&ib))
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn compare_round_adjusts_confirmations_down_by_one() {
    assert_eq!(compare_round(5, true, 4), RoundComparison::Same);
    assert_eq!(compare_round(5, false, 4), RoundComparison::Future);
    assert_eq!(compare_round(3, false, 4), RoundComparison::Old);
  }

  #[test]
  fn fitness_is_deterministic_for_same_inputs() {
    assert_eq!(fitness_for("A:1", 3), fitness_for("A:1", 3));
    assert_ne!(fitness_for("A:1", 3), fitness_for("A:1", 4));
  }

  #[test]
  fn tie_break_prefers_higher_fitness_then_origin_then_id() {
    let origin_a = Origin::new("A");
    let origin_b = Origin::new("B");
    assert_eq!(
      more_fit((0.9, &origin_a, 1), (0.5, &origin_b, 1)),
      std::cmp::Ordering::Less
    );
    assert_eq!(
      more_fit((0.5, &origin_a, 1), (0.5, &origin_b, 1)),
      std::cmp::Ordering::Less
    );
  }
}
