// Property-based tests for the matching phases.
// CI: 128 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use proptest::prelude::*;

use matchbook_recon::{
    run, Cell, ConfigError, Dataset, FuzzyScorer, LedgerColumns, MatchConfiguration, ReconError, ReconReport,
    RecordStore, RunOutcome, Side, StatementColumns,
};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_128() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(128),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

const REFS: &[&str] = &["INV100", "inv100", "INV-101", "Payment ABC", "Paymnt ABC", "", "rent"];

const AMOUNTS: &[i64] = &[100, 250, 350, 400, 600, 1_000, 99_998, 100_000, 1_500_000, 2_000_000];

const TOLERANCE_CENTS: i64 = 2;
const FOREIGN_THRESHOLD_CENTS: i64 = 1_000_000;

#[derive(Debug, Clone)]
struct LedgerRow {
    day: u32,
    reference: usize,
    debit: Option<i64>,
    credit: Option<i64>,
}

#[derive(Debug, Clone)]
struct StatementRow {
    day: u32,
    reference: usize,
    cents: i64,
}

#[derive(Debug, Clone, Copy)]
struct Criteria {
    dates: bool,
    references: bool,
    amounts: bool,
    fuzzy: bool,
}

fn arb_ledger_row() -> impl Strategy<Value = LedgerRow> {
    (1u32..=3, 0..REFS.len(), prop::sample::select(AMOUNTS), any::<bool>()).prop_map(
        |(day, reference, cents, is_credit)| LedgerRow {
            day,
            reference,
            debit: (!is_credit).then_some(cents),
            credit: is_credit.then_some(cents),
        },
    )
}

fn arb_statement_row() -> impl Strategy<Value = StatementRow> {
    (1u32..=3, 0..REFS.len(), prop::sample::select(AMOUNTS), any::<bool>()).prop_map(
        |(day, reference, cents, outflow)| StatementRow {
            day,
            reference,
            cents: if outflow { -cents } else { cents },
        },
    )
}

fn arb_criteria() -> impl Strategy<Value = Criteria> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(dates, references, amounts, fuzzy)| {
        Criteria {
            dates,
            references,
            amounts,
            fuzzy,
        }
    })
}

fn arb_dataset(max_rows: usize) -> impl Strategy<Value = (Vec<LedgerRow>, Vec<StatementRow>)> {
    (
        prop::collection::vec(arb_ledger_row(), 0..max_rows),
        prop::collection::vec(arb_statement_row(), 0..max_rows),
    )
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn money(cents: Option<i64>) -> Cell {
    cents.map_or(Cell::Empty, |c| Cell::from(c as f64 / 100.0))
}

fn date(day: u32) -> Cell {
    Cell::from(format!("2025-01-{day:02}"))
}

fn build_store(ledger: &[LedgerRow], statement: &[StatementRow]) -> RecordStore {
    let mut l = Dataset::new(["Date", "Reference", "Debit", "Credit"]);
    for row in ledger {
        l.push_row(vec![
            date(row.day),
            Cell::from(REFS[row.reference]),
            money(row.debit),
            money(row.credit),
        ]);
    }
    let mut s = Dataset::new(["Date", "Reference", "Amount"]);
    for row in statement {
        s.push_row(vec![date(row.day), Cell::from(REFS[row.reference]), money(Some(row.cents))]);
    }
    RecordStore::new(l, s)
}

fn build_config(criteria: Criteria) -> MatchConfiguration {
    MatchConfiguration {
        match_dates: criteria.dates,
        match_references: criteria.references,
        match_amounts: criteria.amounts,
        fuzzy_enabled: criteria.fuzzy,
        ledger: LedgerColumns {
            date: Some("Date".into()),
            reference: Some("Reference".into()),
            debit: Some("Debit".into()),
            credit: Some("Credit".into()),
        },
        statement: StatementColumns {
            date: Some("Date".into()),
            reference: Some("Reference".into()),
            amount: Some("Amount".into()),
        },
        ..Default::default()
    }
}

/// `None` when the criteria are rejected as a configuration error.
fn reconcile(ledger: &[LedgerRow], statement: &[StatementRow], criteria: Criteria) -> Option<ReconReport> {
    match run(build_store(ledger, statement), build_config(criteria)) {
        Ok(RunOutcome::Completed(report)) => Some(*report),
        Ok(RunOutcome::Cancelled) => panic!("run cancelled without a cancel request"),
        Err(ReconError::Config(ConfigError::NoCriteria)) => {
            assert!(!criteria.dates && !criteria.references && !criteria.amounts);
            None
        }
        Err(other) => panic!("unexpected error: {other}"),
    }
}

fn ledger_anchor_cents(row: &LedgerRow) -> i64 {
    row.debit.filter(|c| *c != 0).or(row.credit).unwrap_or(0)
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(config_128())]

    #[test]
    fn every_row_lands_in_exactly_one_bucket(
        (ledger, statement) in arb_dataset(12),
        criteria in arb_criteria(),
    ) {
        if let Some(report) = reconcile(&ledger, &statement, criteria) {
            prop_assert!(report.result.verify_partition(ledger.len(), statement.len()).is_ok());
            prop_assert!(report.result.unmatched_ledger.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(report.result.unmatched_statement.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(report.summary.ledger_rows, ledger.len());
        }
    }

    #[test]
    fn identical_inputs_give_identical_results(
        (ledger, statement) in arb_dataset(12),
        criteria in arb_criteria(),
    ) {
        let first = reconcile(&ledger, &statement, criteria);
        let second = reconcile(&ledger, &statement, criteria);
        match (first, second) {
            (Some(a), Some(b)) => {
                prop_assert_eq!(a.result, b.result);
                prop_assert_eq!(a.summary, b.summary);
            }
            (None, None) => {}
            _ => prop_assert!(false, "one run failed and the other succeeded"),
        }
    }

    #[test]
    fn splits_sum_within_tolerance(
        (ledger, statement) in arb_dataset(10),
        dates in any::<bool>(),
    ) {
        let criteria = Criteria { dates, references: false, amounts: true, fuzzy: false };
        let report = reconcile(&ledger, &statement, criteria).unwrap();
        for split in &report.result.split_matches {
            prop_assert!(split.counterpart_indices.len() >= 2);
            prop_assert!(split.counterpart_indices.len() <= 6);
            prop_assert!(split.counterpart_indices.windows(2).all(|w| w[0] < w[1]));

            let (target, parts): (i64, i64) = match split.anchor_side {
                Side::Statement => (
                    statement[split.anchor_index].cents.abs(),
                    split.counterpart_indices.iter().map(|&i| ledger_anchor_cents(&ledger[i])).sum(),
                ),
                Side::Ledger => (
                    ledger_anchor_cents(&ledger[split.anchor_index]),
                    split.counterpart_indices.iter().map(|&i| statement[i].cents.abs()).sum(),
                ),
            };
            prop_assert_eq!(parts, split.total_cents);
            prop_assert!((split.total_cents - target).abs() <= TOLERANCE_CENTS);
        }
    }

    #[test]
    fn foreign_credits_are_above_threshold(
        (ledger, statement) in arb_dataset(12),
        dates in any::<bool>(),
        references in any::<bool>(),
    ) {
        let criteria = Criteria { dates, references, amounts: true, fuzzy: true };
        let report = reconcile(&ledger, &statement, criteria).unwrap();
        for credit in &report.result.foreign_credits {
            let stmt = &statement[credit.statement_index];
            let led = &ledger[credit.ledger_index];
            prop_assert!(stmt.cents.abs() > FOREIGN_THRESHOLD_CENTS);
            let column_amount = if stmt.cents < 0 { led.credit } else { led.debit };
            prop_assert_eq!(column_amount, Some(stmt.cents.abs()));
            prop_assert!(credit.score == 50 || credit.score == 100);
        }
    }

    #[test]
    fn fuzzy_score_is_symmetric(a in "[a-zA-Z0-9 -]{0,16}", b in "[a-zA-Z0-9 -]{0,16}") {
        let mut scorer = FuzzyScorer::new();
        let ab = scorer.score(&a, &b);
        let ba = scorer.score(&b, &a);
        prop_assert_eq!(ab, ba);
        prop_assert!(ab <= 100);
    }
}
