use crate::config::MatchConfiguration;
use crate::engine::Residual;
use crate::index::CandidateIndex;
use crate::model::ForeignCreditMatch;
use crate::progress::{Cancelled, PhaseProgress};
use crate::store::Record;

const AMOUNT_SCORE: u8 = 50;
const DATE_SCORE: u8 = 50;
const MIN_SCORE: u8 = 50;

/// High-value statement rows whose references rarely survive the bank
/// (foreign wires, FX settlements) matched on amount and optionally date.
pub(crate) struct ForeignCreditMatcher<'a> {
    config: &'a MatchConfiguration,
    ledger: &'a [Record],
    ledger_index: &'a CandidateIndex,
}

impl<'a> ForeignCreditMatcher<'a> {
    pub fn new(config: &'a MatchConfiguration, ledger: &'a [Record], ledger_index: &'a CandidateIndex) -> Self {
        Self {
            config,
            ledger,
            ledger_index,
        }
    }

    pub fn run(
        &self,
        statement: &[Record],
        residual: &mut Residual,
        progress: &mut PhaseProgress<'_>,
    ) -> Result<Vec<ForeignCreditMatch>, Cancelled> {
        let threshold = self.config.tuning.foreign_credit_threshold_cents;
        let mut matched = Vec::new();
        for stmt in statement {
            progress.step()?;
            if residual.statement[stmt.index] {
                continue;
            }
            let Some(signed) = stmt.amount_cents else {
                continue;
            };
            if signed.abs() <= threshold {
                continue;
            }
            if let Some(found) = self.best_for(stmt, signed, &residual.ledger) {
                residual.ledger[found.ledger_index] = true;
                residual.statement[found.statement_index] = true;
                matched.push(found);
            }
        }
        Ok(matched)
    }

    fn best_for(&self, stmt: &Record, signed: i64, used: &[bool]) -> Option<ForeignCreditMatch> {
        let column = self.config.amount_mode.column_for(signed);
        // Dates only add to the score here, so the lookup is by amount alone.
        let candidates = self.ledger_index.amount_candidates(column, signed.abs(), used);

        let mut best: Option<(usize, u8)> = None;
        for li in candidates {
            let mut score = AMOUNT_SCORE;
            if self.config.match_dates && stmt.date.is_some() && stmt.date == self.ledger[li].date {
                score += DATE_SCORE;
            }
            if score >= MIN_SCORE && best.map_or(true, |(_, s)| score > s) {
                best = Some((li, score));
            }
        }
        best.map(|(ledger_index, score)| ForeignCreditMatch {
            ledger_index,
            statement_index: stmt.index,
            score,
        })
    }
}
