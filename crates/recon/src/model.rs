use std::collections::HashSet;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Sides + columns
// ---------------------------------------------------------------------------

/// Which input dataset a record (or a split anchor) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Ledger,
    Statement,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ledger => write!(f, "ledger"),
            Self::Statement => write!(f, "statement"),
        }
    }
}

/// Ledger amount column a comparison runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountColumn {
    Debit,
    Credit,
}

// ---------------------------------------------------------------------------
// Matches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

/// One ledger row paired with one statement row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedPair {
    pub ledger_index: usize,
    pub statement_index: usize,
    /// Reference similarity, 0..=100. 100 when references were not compared.
    pub similarity: u8,
    pub kind: MatchKind,
}

/// High-value statement row matched on amount (and optionally date) only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignCreditMatch {
    pub ledger_index: usize,
    pub statement_index: usize,
    pub score: u8,
}

/// One anchor row whose amount is covered by several rows on the other side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitMatch {
    pub anchor_side: Side,
    pub anchor_index: usize,
    /// Ascending row indices on the opposite side.
    pub counterpart_indices: Vec<usize>,
    /// Reference similarity per counterpart, aligned with `counterpart_indices`.
    pub similarities: Vec<u8>,
    /// Sum of the counterpart amounts (absolute), in cents.
    pub total_cents: i64,
}

impl SplitMatch {
    pub fn total_amount(&self) -> f64 {
        self.total_cents as f64 / 100.0
    }

    /// Side the counterpart indices refer to.
    pub fn counterpart_side(&self) -> Side {
        match self.anchor_side {
            Side::Ledger => Side::Statement,
            Side::Statement => Side::Ledger,
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub matched: Vec<MatchedPair>,
    pub foreign_credits: Vec<ForeignCreditMatch>,
    pub split_matches: Vec<SplitMatch>,
    pub unmatched_ledger: Vec<usize>,
    pub unmatched_statement: Vec<usize>,
}

impl MatchResult {
    /// All ledger indices referenced by any bucket, in bucket order.
    pub fn ledger_indices(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self.matched.iter().map(|m| m.ledger_index).collect();
        out.extend(self.foreign_credits.iter().map(|m| m.ledger_index));
        for split in &self.split_matches {
            match split.anchor_side {
                Side::Ledger => out.push(split.anchor_index),
                Side::Statement => out.extend(split.counterpart_indices.iter().copied()),
            }
        }
        out.extend(self.unmatched_ledger.iter().copied());
        out
    }

    /// All statement indices referenced by any bucket, in bucket order.
    pub fn statement_indices(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self.matched.iter().map(|m| m.statement_index).collect();
        out.extend(self.foreign_credits.iter().map(|m| m.statement_index));
        for split in &self.split_matches {
            match split.anchor_side {
                Side::Statement => out.push(split.anchor_index),
                Side::Ledger => out.extend(split.counterpart_indices.iter().copied()),
            }
        }
        out.extend(self.unmatched_statement.iter().copied());
        out
    }

    /// Check that every index of both inputs lands in exactly one bucket.
    pub fn verify_partition(&self, ledger_len: usize, statement_len: usize) -> Result<(), String> {
        check_cover(Side::Ledger, &self.ledger_indices(), ledger_len)?;
        check_cover(Side::Statement, &self.statement_indices(), statement_len)
    }
}

fn check_cover(side: Side, indices: &[usize], len: usize) -> Result<(), String> {
    let mut seen = HashSet::with_capacity(indices.len());
    for &i in indices {
        if i >= len {
            return Err(format!("{side} index {i} out of range (len {len})"));
        }
        if !seen.insert(i) {
            return Err(format!("{side} index {i} appears in more than one bucket"));
        }
    }
    if seen.len() != len {
        return Err(format!("{side}: {} of {len} indices covered", seen.len()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Phases + progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Prepare,
    ExactFuzzy,
    ForeignCredit,
    SplitStatementAnchor,
    SplitLedgerAnchor,
    Finalize,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prepare => write!(f, "prepare"),
            Self::ExactFuzzy => write!(f, "exact_fuzzy"),
            Self::ForeignCredit => write!(f, "foreign_credit"),
            Self::SplitStatementAnchor => write!(f, "split_statement_anchor"),
            Self::SplitLedgerAnchor => write!(f, "split_ledger_anchor"),
            Self::Finalize => write!(f, "finalize"),
        }
    }
}

/// Batched progress notification emitted by a running engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub processed: usize,
    pub total: usize,
    /// Completion of the current phase, 0.0..=100.0.
    pub percent_complete: f64,
    /// Records processed per second within the current phase.
    pub throughput: f64,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummary {
    pub ledger_rows: usize,
    pub statement_rows: usize,
    pub matched_pairs: usize,
    pub exact_pairs: usize,
    pub fuzzy_pairs: usize,
    pub foreign_credits: usize,
    pub split_matches: usize,
    pub split_ledger_rows: usize,
    pub split_statement_rows: usize,
    pub unmatched_ledger: usize,
    pub unmatched_statement: usize,
    /// Share of ledger rows placed in any matched bucket, 0.0..=100.0.
    pub ledger_match_rate: f64,
    /// Share of statement rows placed in any matched bucket, 0.0..=100.0.
    pub statement_match_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub engine_version: String,
    pub elapsed_ms: u64,
    pub fuzzy_cache_hits: u64,
    pub fuzzy_cache_misses: u64,
    pub split_pairs_checked: u64,
    pub split_dp_states: u64,
    /// Split searches abandoned with the sum table full.
    pub split_cap_hits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconReport {
    pub result: MatchResult,
    pub summary: MatchSummary,
    pub stats: RunStats,
}

/// How a run ended. Cancellation is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Box<ReconReport>),
    Cancelled,
}

impl RunOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn into_report(self) -> Option<ReconReport> {
        match self {
            Self::Completed(report) => Some(*report),
            Self::Cancelled => None,
        }
    }
}
