//! One-to-many matching: an anchor amount covered by a group of rows on the
//! other side, found with a pair fast path and a bounded subset-sum table.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::config::{MatchConfiguration, TuningConfig};
use crate::engine::Residual;
use crate::fuzzy::FuzzyScorer;
use crate::index::CandidateIndex;
use crate::model::{AmountColumn, Side, SplitMatch};
use crate::progress::{Cancelled, PhaseProgress};
use crate::store::Record;

/// Candidates folded between two compaction passes over the sum table.
const COMPACT_EVERY: usize = 16;

/// One pool member offered to the finder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitCandidate {
    pub index: usize,
    /// Absolute amount in cents.
    pub cents: i64,
    pub reference_score: u8,
}

// ---------------------------------------------------------------------------
// Combination search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SplitCombinationFinder {
    tolerance_cents: i64,
    max_group_size: usize,
    max_table_entries: usize,
    pairs_checked: u64,
    dp_states: u64,
    pruned_states: u64,
    cap_hits: u64,
}

impl SplitCombinationFinder {
    pub fn new(tolerance_cents: i64, max_group_size: usize, max_table_entries: usize) -> Self {
        Self {
            tolerance_cents: tolerance_cents.max(0),
            max_group_size,
            max_table_entries: max_table_entries.max(1),
            pairs_checked: 0,
            dp_states: 0,
            pruned_states: 0,
            cap_hits: 0,
        }
    }

    pub fn from_tuning(tuning: &TuningConfig) -> Self {
        Self::new(
            tuning.split_tolerance_cents,
            tuning.split_max_group_size,
            tuning.split_max_table_entries,
        )
    }

    /// Positions into `pool` (ascending) of at least two candidates whose
    /// amounts sum to within tolerance of `target_cents`, or `None`.
    pub fn find(&mut self, target_cents: i64, pool: &[SplitCandidate]) -> Option<Vec<usize>> {
        let target = target_cents.abs();
        let min_sum = target - self.tolerance_cents;
        let max_sum = target.saturating_add(self.tolerance_cents);
        if target == 0 || pool.len() < 2 || self.max_group_size < 2 {
            return None;
        }

        // Largest amounts first, ties by row index.
        let mut order: Vec<usize> = (0..pool.len())
            .filter(|&p| pool[p].cents > 0 && pool[p].cents <= max_sum)
            .collect();
        order.sort_by(|&a, &b| {
            pool[b]
                .cents
                .cmp(&pool[a].cents)
                .then(pool[a].index.cmp(&pool[b].index))
        });
        let amounts: Vec<i64> = order.iter().map(|&p| pool[p].cents).collect();

        let hit = match self.find_pair(&amounts, min_sum, max_sum) {
            Some((i, j)) => Some(vec![i, j]),
            None if self.max_group_size > 2 => self.find_subset(&amounts, min_sum, max_sum),
            None => None,
        };
        hit.map(|sorted_positions| {
            let mut positions: Vec<usize> = sorted_positions.into_iter().map(|k| order[k]).collect();
            positions.sort_unstable();
            positions
        })
    }

    /// Two-pointer style scan over descending amounts.
    fn find_pair(&mut self, amounts: &[i64], min_sum: i64, max_sum: i64) -> Option<(usize, usize)> {
        let n = amounts.len();
        for i in 0..n.saturating_sub(1) {
            // Best pair still available from here on.
            if amounts[i].saturating_add(amounts[i + 1]) < min_sum {
                break;
            }
            for j in (i + 1)..n {
                self.pairs_checked += 1;
                let sum = amounts[i].saturating_add(amounts[j]);
                if sum > max_sum {
                    continue;
                }
                if sum < min_sum {
                    break;
                }
                return Some((i, j));
            }
        }
        None
    }

    /// Sum table keyed by reachable sum, holding the shortest position list
    /// reaching it. Candidates are folded in once each.
    fn find_subset(&mut self, amounts: &[i64], min_sum: i64, max_sum: i64) -> Option<Vec<usize>> {
        let n = amounts.len();
        let mut remaining: Vec<i64> = vec![0; n + 1];
        for k in (0..n).rev() {
            remaining[k] = remaining[k + 1].saturating_add(amounts[k]);
        }
        if remaining[0] < min_sum {
            return None;
        }

        let mut table: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        let mut capped = false;
        for k in 0..n {
            let amount = amounts[k];
            let mut additions: Vec<(i64, Vec<usize>)> = Vec::new();
            for (&sum, list) in &table {
                if list.len() >= self.max_group_size {
                    continue;
                }
                let next = sum.saturating_add(amount);
                if next > max_sum {
                    continue;
                }
                let mut grown = Vec::with_capacity(list.len() + 1);
                grown.extend_from_slice(list);
                grown.push(k);
                if next >= min_sum {
                    log::trace!("split hit: {} rows, {} table entries", grown.len(), table.len());
                    return Some(grown);
                }
                additions.push((next, grown));
            }
            additions.push((amount, vec![k]));

            for (sum, list) in additions {
                self.dp_states += 1;
                let len = table.len();
                match table.entry(sum) {
                    Entry::Occupied(mut existing) => {
                        if list.len() < existing.get().len() {
                            existing.insert(list);
                        }
                    }
                    Entry::Vacant(slot) if len < self.max_table_entries => {
                        slot.insert(list);
                    }
                    Entry::Vacant(_) => capped = true,
                }
            }

            if (k + 1) % COMPACT_EVERY == 0 || table.len() >= self.max_table_entries {
                let rest = remaining[k + 1];
                let max_len = self.max_group_size;
                let before = table.len();
                table.retain(|&sum, list| list.len() < max_len && sum.saturating_add(rest) >= min_sum);
                self.pruned_states += (before - table.len()) as u64;
            }
        }
        if capped {
            self.cap_hits += 1;
            log::trace!("split table capped at {} entries", self.max_table_entries);
        }
        None
    }

    pub fn pairs_checked(&self) -> u64 {
        self.pairs_checked
    }

    pub fn dp_states(&self) -> u64 {
        self.dp_states
    }

    /// Table entries dropped by compaction.
    pub fn pruned_states(&self) -> u64 {
        self.pruned_states
    }

    /// Searches that hit the table cap at least once.
    pub fn cap_hits(&self) -> u64 {
        self.cap_hits
    }
}

// ---------------------------------------------------------------------------
// Anchor pass
// ---------------------------------------------------------------------------

/// One direction of split matching: every residual anchor on `anchor_side`
/// against the residual rows of the opposite side.
pub(crate) struct SplitPass<'a> {
    pub config: &'a MatchConfiguration,
    pub anchor_side: Side,
    pub anchors: &'a [Record],
    pub counterparts: &'a [Record],
    pub counterpart_index: &'a CandidateIndex,
}

impl SplitPass<'_> {
    pub fn run(
        &self,
        finder: &mut SplitCombinationFinder,
        residual: &mut Residual,
        scorer: &mut FuzzyScorer,
        progress: &mut PhaseProgress<'_>,
    ) -> Result<Vec<SplitMatch>, Cancelled> {
        let counterpart_side = match self.anchor_side {
            Side::Ledger => Side::Statement,
            Side::Statement => Side::Ledger,
        };
        let tolerance = self.config.tuning.split_tolerance_cents.max(0);
        let mut found = Vec::new();

        for anchor in self.anchors {
            progress.step()?;
            if residual.is_used(self.anchor_side, anchor.index) {
                continue;
            }
            let Some((column, target)) = self.anchor_amount(anchor) else {
                continue;
            };
            if self.config.match_references && anchor.reference.is_none() {
                continue;
            }

            let entries = self.counterpart_index.range_candidates(
                target.saturating_add(tolerance),
                column,
                anchor.date,
                residual.used(counterpart_side),
            );
            let pool: Vec<SplitCandidate> = entries
                .into_iter()
                .filter_map(|entry| {
                    let score = self.reference_score(anchor, &self.counterparts[entry.index], scorer)?;
                    Some(SplitCandidate {
                        index: entry.index,
                        cents: entry.cents,
                        reference_score: score,
                    })
                })
                .collect();
            if pool.len() < 2 {
                continue;
            }

            let Some(positions) = finder.find(target, &pool) else {
                continue;
            };
            let chosen: Vec<SplitCandidate> = positions.iter().map(|&p| pool[p]).collect();
            residual.mark(self.anchor_side, anchor.index);
            for c in &chosen {
                residual.mark(counterpart_side, c.index);
            }
            found.push(SplitMatch {
                anchor_side: self.anchor_side,
                anchor_index: anchor.index,
                counterpart_indices: chosen.iter().map(|c| c.index).collect(),
                similarities: chosen.iter().map(|c| c.reference_score).collect(),
                total_cents: chosen.iter().fold(0i64, |acc, c| acc.saturating_add(c.cents)),
            });
        }
        Ok(found)
    }

    /// Column the counterparts must compete in, and the absolute target.
    fn anchor_amount(&self, anchor: &Record) -> Option<(AmountColumn, i64)> {
        match self.anchor_side {
            Side::Statement => anchor
                .amount_cents
                .filter(|c| *c != 0)
                .map(|c| (self.config.amount_mode.column_for(c), c.abs())),
            Side::Ledger => anchor.ledger_anchor(),
        }
    }

    /// Similarity recorded for a counterpart, or `None` if references are
    /// compared and this one does not qualify.
    fn reference_score(&self, anchor: &Record, other: &Record, scorer: &mut FuzzyScorer) -> Option<u8> {
        if !self.config.match_references {
            return Some(100);
        }
        let a = anchor.reference.as_deref()?;
        let b = other.reference.as_deref()?;
        if a == b {
            return Some(100);
        }
        if !self.config.fuzzy_enabled {
            return None;
        }
        let score = scorer.score_normalized(a, b);
        (score >= self.config.similarity_threshold).then_some(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(amounts: &[i64]) -> Vec<SplitCandidate> {
        amounts
            .iter()
            .enumerate()
            .map(|(index, &cents)| SplitCandidate {
                index,
                cents,
                reference_score: 100,
            })
            .collect()
    }

    fn sum_of(pool: &[SplitCandidate], positions: &[usize]) -> i64 {
        positions.iter().map(|&p| pool[p].cents).sum()
    }

    #[test]
    fn pair_fast_path() {
        let mut finder = SplitCombinationFinder::new(0, 6, 1000);
        let p = pool(&[300, 700, 50]);
        assert_eq!(finder.find(1000, &p), Some(vec![0, 1]));
        assert_eq!(finder.dp_states(), 0);
    }

    #[test]
    fn three_way_split() {
        let mut finder = SplitCombinationFinder::new(2, 6, 1000);
        let p = pool(&[40_000, 35_000, 25_000]);
        let hit = finder.find(100_000, &p).unwrap();
        assert_eq!(hit, vec![0, 1, 2]);
        assert_eq!(sum_of(&p, &hit), 100_000);
    }

    #[test]
    fn tolerance_is_inclusive() {
        let mut finder = SplitCombinationFinder::new(2, 6, 1000);
        let p = pool(&[500, 498]);
        assert_eq!(finder.find(1000, &p), Some(vec![0, 1]));

        let p = pool(&[500, 497]);
        assert_eq!(finder.find(1000, &p), None);
    }

    #[test]
    fn single_exact_amount_is_not_a_split() {
        let mut finder = SplitCombinationFinder::new(0, 6, 1000);
        let p = pool(&[1000, 1]);
        assert_eq!(finder.find(1000, &p), None);
    }

    #[test]
    fn group_size_is_bounded() {
        let p = pool(&[250, 250, 250, 250]);
        let mut small = SplitCombinationFinder::new(0, 3, 1000);
        assert_eq!(small.find(1000, &p), None);
        let mut large = SplitCombinationFinder::new(0, 4, 1000);
        assert_eq!(large.find(1000, &p), Some(vec![0, 1, 2, 3]));
    }

    #[test]
    fn oversized_candidates_ignored() {
        let mut finder = SplitCombinationFinder::new(0, 6, 1000);
        let p = pool(&[5000, 600, 400]);
        assert_eq!(finder.find(1000, &p), Some(vec![1, 2]));
    }

    #[test]
    fn unreachable_target() {
        let mut finder = SplitCombinationFinder::new(0, 6, 1000);
        let p = pool(&[100, 200, 300]);
        assert_eq!(finder.find(1000, &p), None);
    }

    #[test]
    fn larger_pool_finds_valid_subset() {
        let mut finder = SplitCombinationFinder::new(0, 6, 250_000);
        let amounts = [1_111, 2_222, 3_333, 4_444, 5_555, 6_666, 7_777, 8_888, 9_999, 123, 456, 789];
        let p = pool(&amounts);
        let target = 123 + 456 + 789 + 1_111;
        let hit = finder.find(target, &p).unwrap();
        assert!(hit.len() >= 2 && hit.len() <= 6);
        assert_eq!(sum_of(&p, &hit), target);
        assert!(hit.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn tiny_table_cap_still_terminates() {
        let mut finder = SplitCombinationFinder::new(0, 6, 2);
        let p = pool(&[100, 200, 300, 400, 500]);
        let hit = finder.find(1400, &p);
        if let Some(hit) = hit {
            assert_eq!(sum_of(&p, &hit), 1400);
        }
    }

    #[test]
    fn capped_search_is_counted() {
        let mut finder = SplitCombinationFinder::new(0, 6, 2);
        let p = pool(&[100, 200, 300, 400, 500]);
        assert_eq!(finder.find(1450, &p), None);
        assert_eq!(finder.cap_hits(), 1);

        let mut roomy = SplitCombinationFinder::new(0, 6, 1000);
        assert_eq!(roomy.find(1450, &p), None);
        assert_eq!(roomy.cap_hits(), 0);
    }

    #[test]
    fn compaction_keeps_late_solution() {
        // Twenty decoys fold in between the two large parts and the small one
        // that completes the group, so the table is compacted before the hit.
        let mut amounts: Vec<i64> = (0..20).map(|i| 2_000 + i).collect();
        amounts.extend([1_111, 2_222, 3_333]);
        let p = pool(&amounts);

        let mut finder = SplitCombinationFinder::new(0, 3, 1000);
        assert_eq!(finder.find(6_666, &p), Some(vec![20, 21, 22]));
        assert!(finder.dp_states() > 23);
        assert!(finder.pruned_states() > 0);
        assert_eq!(finder.cap_hits(), 0);
    }

    #[test]
    fn huge_amounts_do_not_overflow() {
        let p = pool(&[90_000_000_000_000_000; 110]);
        let mut finder = SplitCombinationFinder::new(0, 6, 1000);
        assert_eq!(finder.find(100_000_000_000_000_000, &p), None);

        let mut wide = SplitCombinationFinder::new(i64::MAX, 6, 1000);
        let hit = wide.find(i64::MAX, &p).unwrap();
        assert_eq!(hit, vec![0, 1]);
    }
}
