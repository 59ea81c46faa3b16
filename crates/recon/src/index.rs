//! Lookup structures that narrow each comparison to a small candidate pool.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::config::MatchConfiguration;
use crate::model::{AmountColumn, Side};
use crate::store::Record;

/// Amount bucket width: 1,000.00 in cents.
pub const AMOUNT_BUCKET_CENTS: i64 = 100_000;

/// Shortest reference token kept in the token index.
pub const MIN_TOKEN_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountEntry {
    pub index: usize,
    /// Absolute amount in cents.
    pub cents: i64,
    /// Ledger column this entry competes in. For statement rows this is the
    /// column their sign selects under the configured amount mode.
    pub column: AmountColumn,
}

/// What a lookup is keyed on. Fields left `None` are not filtered on.
#[derive(Debug, Clone, Copy, Default)]
pub struct Probe<'a> {
    pub date: Option<NaiveDate>,
    pub amount: Option<(AmountColumn, i64)>,
    pub reference: Option<&'a str>,
}

/// Per-side candidate index, built once per run over the side being searched.
#[derive(Debug, Default)]
pub struct CandidateIndex {
    len: usize,
    by_date: Option<HashMap<NaiveDate, Vec<usize>>>,
    by_amount: Option<BTreeMap<i64, Vec<AmountEntry>>>,
    by_reference: Option<HashMap<String, Vec<usize>>>,
    by_token: Option<HashMap<String, Vec<usize>>>,
}

pub fn bucket_of(cents: i64) -> i64 {
    cents.abs() / AMOUNT_BUCKET_CENTS
}

/// Alphanumeric runs of at least [`MIN_TOKEN_LEN`] characters, deduplicated, in order.
pub fn tokens(reference: &str) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for tok in reference.split(|c: char| !c.is_alphanumeric()) {
        if tok.chars().count() >= MIN_TOKEN_LEN && !out.contains(&tok) {
            out.push(tok);
        }
    }
    out
}

impl CandidateIndex {
    /// Index `records` (all belonging to `side`) for the criteria `config` enables.
    pub(crate) fn build(records: &[Record], side: Side, config: &MatchConfiguration) -> Self {
        let mut index = CandidateIndex {
            len: records.len(),
            ..Default::default()
        };

        if config.match_dates {
            let mut map: HashMap<NaiveDate, Vec<usize>> = HashMap::new();
            for rec in records {
                if let Some(date) = rec.date {
                    map.entry(date).or_default().push(rec.index);
                }
            }
            index.by_date = Some(map);
        }

        if config.match_amounts {
            let mut map: BTreeMap<i64, Vec<AmountEntry>> = BTreeMap::new();
            for rec in records {
                for entry in amount_entries(rec, side, config) {
                    map.entry(bucket_of(entry.cents)).or_default().push(entry);
                }
            }
            index.by_amount = Some(map);
        }

        if config.match_references {
            let mut full: HashMap<String, Vec<usize>> = HashMap::new();
            let mut by_token: HashMap<String, Vec<usize>> = HashMap::new();
            for rec in records {
                let Some(reference) = rec.reference.as_deref() else {
                    continue;
                };
                full.entry(reference.to_string()).or_default().push(rec.index);
                if config.fuzzy_enabled {
                    for tok in tokens(reference) {
                        by_token.entry(tok.to_string()).or_default().push(rec.index);
                    }
                }
            }
            index.by_reference = Some(full);
            if config.fuzzy_enabled {
                index.by_token = Some(by_token);
            }
        }

        index
    }

    /// Unused record indices agreeing with the probe on every indexed
    /// date/amount criterion, ascending. A probe missing a value for an
    /// indexed criterion gets no candidates. With neither dates nor amounts
    /// indexed, every unused record is a candidate.
    pub fn candidate_set(&self, probe: &Probe<'_>, used: &[bool]) -> Vec<usize> {
        let by_date = match &self.by_date {
            Some(map) => match probe.date {
                Some(date) => Some(map.get(&date).map(Vec::as_slice).unwrap_or(&[])),
                None => return Vec::new(),
            },
            None => None,
        };

        let by_amount: Option<Vec<usize>> = match &self.by_amount {
            Some(map) => match probe.amount {
                Some((column, cents)) => Some(amount_hits(map, column, cents)),
                None => return Vec::new(),
            },
            None => None,
        };

        let merged = match (by_date, by_amount) {
            (Some(dates), Some(amounts)) => intersect_sorted(dates, &amounts),
            (Some(dates), None) => dates.to_vec(),
            (None, Some(amounts)) => amounts,
            (None, None) => (0..self.len).collect(),
        };
        merged.into_iter().filter(|&i| !is_used(used, i)).collect()
    }

    /// Unused records with exactly this absolute amount in `column`, ignoring
    /// dates. Ascending.
    pub fn amount_candidates(&self, column: AmountColumn, cents: i64, used: &[bool]) -> Vec<usize> {
        let Some(map) = &self.by_amount else {
            return Vec::new();
        };
        amount_hits(map, column, cents)
            .into_iter()
            .filter(|&i| !is_used(used, i))
            .collect()
    }

    /// Unused records with exactly this normalized reference, ascending.
    pub fn exact_reference(&self, reference: &str, used: &[bool]) -> Vec<usize> {
        self.by_reference
            .as_ref()
            .and_then(|map| map.get(reference))
            .map(|hits| hits.iter().copied().filter(|&i| !is_used(used, i)).collect())
            .unwrap_or_default()
    }

    /// Unused records sharing at least one token with `reference`, ascending.
    pub fn token_candidates(&self, reference: &str, used: &[bool]) -> Vec<usize> {
        let Some(map) = &self.by_token else {
            return Vec::new();
        };
        let mut hits: Vec<usize> = tokens(reference)
            .into_iter()
            .filter_map(|tok| map.get(tok))
            .flatten()
            .copied()
            .filter(|&i| !is_used(used, i))
            .collect();
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    /// Unused records competing in `column` with `0 < amount <= max_cents`,
    /// restricted to `date` when dates are indexed. Ascending, with amounts.
    pub fn range_candidates(
        &self,
        max_cents: i64,
        column: AmountColumn,
        date: Option<NaiveDate>,
        used: &[bool],
    ) -> Vec<AmountEntry> {
        let Some(map) = &self.by_amount else {
            return Vec::new();
        };
        let same_date: Option<&[usize]> = match &self.by_date {
            Some(dates) => match date {
                Some(d) => Some(dates.get(&d).map(Vec::as_slice).unwrap_or(&[])),
                None => return Vec::new(),
            },
            None => None,
        };

        let mut out: Vec<AmountEntry> = map
            .range(..=bucket_of(max_cents))
            .flat_map(|(_, entries)| entries.iter())
            .filter(|e| e.column == column && e.cents > 0 && e.cents <= max_cents)
            .filter(|e| !is_used(used, e.index))
            .filter(|e| same_date.map_or(true, |d| d.binary_search(&e.index).is_ok()))
            .copied()
            .collect();
        out.sort_unstable_by_key(|e| e.index);
        out.dedup_by_key(|e| e.index);
        out
    }
}

fn amount_entries(rec: &Record, side: Side, config: &MatchConfiguration) -> Vec<AmountEntry> {
    match side {
        Side::Ledger => [AmountColumn::Debit, AmountColumn::Credit]
            .into_iter()
            .filter(|col| config.amount_mode.allows(*col))
            .filter_map(|column| {
                rec.ledger_cents(column).map(|cents| AmountEntry {
                    index: rec.index,
                    cents,
                    column,
                })
            })
            .collect(),
        Side::Statement => rec
            .amount_cents
            .map(|signed| AmountEntry {
                index: rec.index,
                cents: signed.abs(),
                column: config.amount_mode.column_for(signed),
            })
            .into_iter()
            .collect(),
    }
}

fn amount_hits(map: &BTreeMap<i64, Vec<AmountEntry>>, column: AmountColumn, cents: i64) -> Vec<usize> {
    let cents = cents.abs();
    let mut hits: Vec<usize> = map
        .get(&bucket_of(cents))
        .into_iter()
        .flatten()
        .filter(|e| e.column == column && e.cents == cents)
        .map(|e| e.index)
        .collect();
    hits.sort_unstable();
    hits.dedup();
    hits
}

fn is_used(used: &[bool], index: usize) -> bool {
    used.get(index).copied().unwrap_or(false)
}

/// Intersection of two ascending index lists.
fn intersect_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedgerColumns, StatementColumns};

    fn d(day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2025, 1, day)
    }

    fn ledger(index: usize, day: u32, debit: Option<i64>, credit: Option<i64>, reference: &str) -> Record {
        Record {
            index,
            date: d(day),
            reference: crate::fuzzy::normalize(reference),
            debit_cents: debit,
            credit_cents: credit,
            amount_cents: None,
        }
    }

    fn config(dates: bool, amounts: bool, refs: bool, fuzzy: bool) -> MatchConfiguration {
        let mut config = MatchConfiguration {
            match_dates: dates,
            match_amounts: amounts,
            match_references: refs,
            fuzzy_enabled: fuzzy,
            ledger: LedgerColumns {
                date: Some("d".into()),
                reference: Some("r".into()),
                debit: Some("dr".into()),
                credit: Some("cr".into()),
            },
            statement: StatementColumns {
                date: Some("d".into()),
                reference: Some("r".into()),
                amount: Some("a".into()),
            },
            ..Default::default()
        };
        config.validate().unwrap();
        config
    }

    fn sample() -> Vec<Record> {
        vec![
            ledger(0, 1, Some(50_000), None, "INV-100 Acme"),
            ledger(1, 1, Some(50_000), None, "INV-101"),
            ledger(2, 2, Some(50_000), None, "Acme refund"),
            ledger(3, 1, None, Some(50_000), "INV-102"),
            ledger(4, 1, Some(250_000), None, "big"),
        ]
    }

    #[test]
    fn candidate_set_intersects_date_and_amount() {
        let idx = CandidateIndex::build(&sample(), Side::Ledger, &config(true, true, false, false));
        let probe = Probe {
            date: d(1),
            amount: Some((AmountColumn::Debit, 50_000)),
            reference: None,
        };
        assert_eq!(idx.candidate_set(&probe, &[]), vec![0, 1]);

        let used = vec![true, false, false, false, false];
        assert_eq!(idx.candidate_set(&probe, &used), vec![1]);

        let credit_probe = Probe {
            amount: Some((AmountColumn::Credit, -50_000)),
            ..probe
        };
        assert_eq!(idx.candidate_set(&credit_probe, &[]), vec![3]);
    }

    #[test]
    fn missing_probe_value_yields_nothing() {
        let idx = CandidateIndex::build(&sample(), Side::Ledger, &config(true, true, false, false));
        let probe = Probe {
            date: None,
            amount: Some((AmountColumn::Debit, 50_000)),
            reference: None,
        };
        assert!(idx.candidate_set(&probe, &[]).is_empty());
    }

    #[test]
    fn amount_candidates_ignore_dates() {
        let idx = CandidateIndex::build(&sample(), Side::Ledger, &config(true, true, false, false));
        assert_eq!(idx.amount_candidates(AmountColumn::Debit, 50_000, &[]), vec![0, 1, 2]);
        assert_eq!(idx.amount_candidates(AmountColumn::Credit, 50_000, &[]), vec![3]);
    }

    #[test]
    fn reference_and_token_lookups() {
        let idx = CandidateIndex::build(&sample(), Side::Ledger, &config(false, false, true, true));
        assert_eq!(idx.exact_reference("inv-101", &[]), vec![1]);
        assert!(idx.exact_reference("inv-999", &[]).is_empty());
        // "acme" is shared by rows 0 and 2; "inv" by 0, 1, 3.
        assert_eq!(idx.token_candidates("acme ltd", &[]), vec![0, 2]);
        assert_eq!(idx.token_candidates("inv 7", &[]), vec![0, 1, 3]);
    }

    #[test]
    fn token_index_needs_fuzzy() {
        let idx = CandidateIndex::build(&sample(), Side::Ledger, &config(false, false, true, false));
        assert!(idx.token_candidates("acme", &[]).is_empty());
        assert_eq!(idx.exact_reference("big", &[]), vec![4]);
    }

    #[test]
    fn range_candidates_scan_lower_buckets() {
        let idx = CandidateIndex::build(&sample(), Side::Ledger, &config(true, true, false, false));
        let hits = idx.range_candidates(260_000, AmountColumn::Debit, d(1), &[]);
        let ids: Vec<usize> = hits.iter().map(|e| e.index).collect();
        assert_eq!(ids, vec![0, 1, 4]);

        let hits = idx.range_candidates(100_000, AmountColumn::Debit, d(1), &[]);
        let ids: Vec<usize> = hits.iter().map(|e| e.index).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn statement_entries_follow_sign() {
        let stmts = vec![
            Record {
                amount_cents: Some(-1_000),
                ..Record::blank(0)
            },
            Record {
                amount_cents: Some(1_000),
                ..Record::blank(1)
            },
        ];
        let idx = CandidateIndex::build(&stmts, Side::Statement, &config(false, true, false, false));
        let probe = Probe {
            amount: Some((AmountColumn::Credit, 1_000)),
            ..Default::default()
        };
        assert_eq!(idx.candidate_set(&probe, &[]), vec![0]);
    }

    #[test]
    fn tokens_skip_short_runs() {
        assert_eq!(tokens("ab inv-100 inv"), vec!["inv", "100"]);
    }

    #[test]
    fn buckets_are_1000_wide() {
        assert_eq!(bucket_of(99_999), 0);
        assert_eq!(bucket_of(100_000), 1);
        assert_eq!(bucket_of(-250_000), 2);
    }
}
