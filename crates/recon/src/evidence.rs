use crate::model::{MatchKind, MatchResult, MatchSummary, Side};

/// Compute summary counts and match rates from a finished result.
pub fn compute_summary(result: &MatchResult, ledger_rows: usize, statement_rows: usize) -> MatchSummary {
    let exact_pairs = result
        .matched
        .iter()
        .filter(|m| m.kind == MatchKind::Exact)
        .count();
    let fuzzy_pairs = result.matched.len() - exact_pairs;

    let mut split_ledger_rows = 0;
    let mut split_statement_rows = 0;
    for split in &result.split_matches {
        match split.anchor_side {
            Side::Statement => {
                split_statement_rows += 1;
                split_ledger_rows += split.counterpart_indices.len();
            }
            Side::Ledger => {
                split_ledger_rows += 1;
                split_statement_rows += split.counterpart_indices.len();
            }
        }
    }

    MatchSummary {
        ledger_rows,
        statement_rows,
        matched_pairs: result.matched.len(),
        exact_pairs,
        fuzzy_pairs,
        foreign_credits: result.foreign_credits.len(),
        split_matches: result.split_matches.len(),
        split_ledger_rows,
        split_statement_rows,
        unmatched_ledger: result.unmatched_ledger.len(),
        unmatched_statement: result.unmatched_statement.len(),
        ledger_match_rate: rate(ledger_rows - result.unmatched_ledger.len().min(ledger_rows), ledger_rows),
        statement_match_rate: rate(
            statement_rows - result.unmatched_statement.len().min(statement_rows),
            statement_rows,
        ),
    }
}

fn rate(matched: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        matched as f64 / total as f64 * 100.0
    }
}
