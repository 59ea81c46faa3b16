use crate::config::MatchConfiguration;
use crate::engine::Residual;
use crate::fuzzy::FuzzyScorer;
use crate::index::{CandidateIndex, Probe};
use crate::model::{MatchKind, MatchedPair};
use crate::progress::{Cancelled, PhaseProgress};
use crate::store::Record;

/// One-to-one matching of statement rows against the ledger on the enabled
/// criteria, with fuzzy reference fallback.
pub(crate) struct ExactFuzzyMatcher<'a> {
    config: &'a MatchConfiguration,
    ledger: &'a [Record],
    ledger_index: &'a CandidateIndex,
}

impl<'a> ExactFuzzyMatcher<'a> {
    pub fn new(config: &'a MatchConfiguration, ledger: &'a [Record], ledger_index: &'a CandidateIndex) -> Self {
        Self {
            config,
            ledger,
            ledger_index,
        }
    }

    /// Walk statement rows in order. Each pair consumes both rows immediately.
    pub fn run(
        &self,
        statement: &[Record],
        residual: &mut Residual,
        scorer: &mut FuzzyScorer,
        progress: &mut PhaseProgress<'_>,
    ) -> Result<Vec<MatchedPair>, Cancelled> {
        let mut matched = Vec::new();
        for stmt in statement {
            progress.step()?;
            if residual.statement[stmt.index] {
                continue;
            }
            let found = if self.config.references_only() {
                self.by_reference(stmt, &residual.ledger, scorer)
            } else {
                self.by_candidates(stmt, &residual.ledger, scorer)
            };
            if let Some(pair) = found {
                residual.ledger[pair.ledger_index] = true;
                residual.statement[pair.statement_index] = true;
                matched.push(pair);
            }
        }
        Ok(matched)
    }

    fn by_candidates(&self, stmt: &Record, used: &[bool], scorer: &mut FuzzyScorer) -> Option<MatchedPair> {
        let mode = self.config.amount_mode;
        let probe = Probe {
            date: stmt.date,
            amount: stmt.amount_cents.map(|c| (mode.column_for(c), c.abs())),
            reference: stmt.reference.as_deref(),
        };
        let pool = self.ledger_index.candidate_set(&probe, used);
        if !self.config.match_references {
            return pool.first().map(|&li| pair(li, stmt.index, 100, MatchKind::Exact));
        }
        let reference = stmt.reference.as_deref()?;
        self.pick(stmt.index, reference, &pool, scorer)
    }

    /// References are the only criterion: hash lookup first, then fuzzy over
    /// rows sharing a token (or every residual row if none does).
    fn by_reference(&self, stmt: &Record, used: &[bool], scorer: &mut FuzzyScorer) -> Option<MatchedPair> {
        let reference = stmt.reference.as_deref()?;
        if let Some(&li) = self.ledger_index.exact_reference(reference, used).first() {
            return Some(pair(li, stmt.index, 100, MatchKind::Exact));
        }
        if !self.config.fuzzy_enabled {
            return None;
        }
        let mut pool = self.ledger_index.token_candidates(reference, used);
        if pool.is_empty() {
            pool = (0..self.ledger.len()).filter(|&i| !used[i]).collect();
        }
        self.pick(stmt.index, reference, &pool, scorer)
    }

    /// First exact reference in `pool` wins; otherwise the best fuzzy score at
    /// or above the threshold, earliest row on ties.
    fn pick(&self, stmt_index: usize, reference: &str, pool: &[usize], scorer: &mut FuzzyScorer) -> Option<MatchedPair> {
        let mut best: Option<(usize, u8)> = None;
        for &li in pool {
            let Some(other) = self.ledger[li].reference.as_deref() else {
                continue;
            };
            if other == reference {
                return Some(pair(li, stmt_index, 100, MatchKind::Exact));
            }
            if !self.config.fuzzy_enabled {
                continue;
            }
            let score = scorer.score_normalized(reference, other);
            if score >= self.config.similarity_threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((li, score));
            }
        }
        best.map(|(li, score)| pair(li, stmt_index, score, MatchKind::Fuzzy))
    }
}

fn pair(ledger_index: usize, statement_index: usize, similarity: u8, kind: MatchKind) -> MatchedPair {
    MatchedPair {
        ledger_index,
        statement_index,
        similarity,
        kind,
    }
}
