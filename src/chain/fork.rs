//! Fork tracking as an explicit value type.
//!
//! Design Note: the source modifies a "backup" chain by aliasing a
//! shared slice. Here a side chain is an owned [`ChainView`]; `handle_fork`
//! takes two owned views and only ever swaps which one is "main", never
//! aliases into the other.

use super::block::Block;

/// An owned, linear run of blocks. Both the main chain and (when one
/// exists) the side chain are represented the same way.
#[derive(Debug, Clone, Default)]
pub struct ChainView {
  pub blocks: Vec<Block>,
}

impl ChainView {
  pub fn height(&self) -> u64 {
    self.blocks.len() as u64
  }

  pub fn tip(&self) -> Option<&Block> {
    self.blocks.last()
  }
}

/// Outcome of offering a newly received block to the fork tracker.
pub enum ForkOutcome {
  /// Extended whichever chain currently matches; no fork created.
  Extended,
  /// A new side chain was opened at `height - 1`.
  SideChainOpened,
  /// The side chain just overtook the main chain (reorg).
  Reorged,
  /// The side chain fell too far behind and was discarded.
  SideChainDiscarded,
  /// The block didn't fit either chain (neither next-height-matching
  /// nor one-behind-with-matching-parent).
  Rejected,
}

/// Maximum length the main chain may lead the side chain by before the
/// side chain is discarded (spec §4.3).
const MAX_SIDE_CHAIN_LAG: u64 = 4;

/// Applies spec §4.3's fork handling rules to a received `block` given
/// the current main chain and an optional side chain.
///
/// Each condition below names exactly one outcome (Design Note:
/// "the source's handleFork sometimes falls through on the same
/// condition; the spec resolves to the stricter one-condition-per-block
/// behaviour").
pub fn handle_fork(
  main: &mut ChainView,
  side: &mut Option<ChainView>,
  block: Block,
) -> ForkOutcome {
  let main_len = main.height();

  if block.id == main_len {
    if Some(block.prev_hash.as_str()) == main.tip().map(|b| b.hash.as_str()) {
      main.blocks.push(block);
      if side.is_some() {
        return maybe_reorg_or_discard(main, side, false);
      }
      return ForkOutcome::Extended;
    }
    if main_len >= 1 {
      let parent_matches = main
        .blocks
        .get((main_len - 1) as usize)
        .map(|b| b.hash == block.prev_hash)
        .unwrap_or(false);
      if parent_matches {
        let mut new_side = ChainView {
          blocks: main.blocks[..(main_len - 1) as usize].to_vec(),
        };
        new_side.blocks.push(block);
        *side = Some(new_side);
        return ForkOutcome::SideChainOpened;
      }
    }
    return ForkOutcome::Rejected;
  }

  if let Some(s) = side.as_mut() {
    if block.id == s.height() && Some(block.prev_hash.as_str()) == s.tip().map(|b| b.hash.as_str())
    {
      s.blocks.push(block);
      let reorg = s.height() > main.height();
      return maybe_reorg_or_discard(main, side, reorg);
    }
  }

  ForkOutcome::Rejected
}

fn maybe_reorg_or_discard(
  main: &mut ChainView,
  side: &mut Option<ChainView>,
  should_reorg: bool,
) -> ForkOutcome {
  if should_reorg {
    if let Some(s) = side.take() {
      let old_main = std::mem::replace(main, s);
      *side = Some(old_main);
      return ForkOutcome::Reorged;
    }
  }
  if let Some(s) = side.as_ref() {
    if main.height() > s.height() + MAX_SIDE_CHAIN_LAG {
      *side = None;
      return ForkOutcome::SideChainDiscarded;
    }
  }
  ForkOutcome::Extended
}
