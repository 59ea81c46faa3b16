use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use std::time::Instant;

use crate::config::MatchConfiguration;
use crate::error::{ConfigError, ReconError};
use crate::evidence::compute_summary;
use crate::foreign::ForeignCreditMatcher;
use crate::fuzzy::FuzzyScorer;
use crate::index::CandidateIndex;
use crate::matcher::ExactFuzzyMatcher;
use crate::model::{MatchResult, Phase, ProgressEvent, ReconReport, RunOutcome, RunStats, Side};
use crate::progress::{cancel_token, CancelToken, Cancelled, Reporter};
use crate::split::{SplitCombinationFinder, SplitPass};
use crate::store::{Record, RecordStore};

/// Matching phases, in the order they run.
pub const PHASES: [Phase; 4] = [
    Phase::ExactFuzzy,
    Phase::ForeignCredit,
    Phase::SplitStatementAnchor,
    Phase::SplitLedgerAnchor,
];

// ---------------------------------------------------------------------------
// Residual pools
// ---------------------------------------------------------------------------

/// Consumed flags for both sides. Flags only ever go from false to true.
#[derive(Debug, Clone)]
pub(crate) struct Residual {
    pub ledger: Vec<bool>,
    pub statement: Vec<bool>,
}

impl Residual {
    pub fn new(ledger_len: usize, statement_len: usize) -> Self {
        Self {
            ledger: vec![false; ledger_len],
            statement: vec![false; statement_len],
        }
    }

    pub fn used(&self, side: Side) -> &[bool] {
        match side {
            Side::Ledger => &self.ledger,
            Side::Statement => &self.statement,
        }
    }

    pub fn is_used(&self, side: Side, index: usize) -> bool {
        self.used(side).get(index).copied().unwrap_or(false)
    }

    pub fn mark(&mut self, side: Side, index: usize) {
        let flags = match side {
            Side::Ledger => &mut self.ledger,
            Side::Statement => &mut self.statement,
        };
        if let Some(flag) = flags.get_mut(index) {
            *flag = true;
        }
    }

    fn unused(flags: &[bool]) -> Vec<usize> {
        flags
            .iter()
            .enumerate()
            .filter(|(_, used)| !**used)
            .map(|(i, _)| i)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A validated reconciliation run. Owns its inputs; consumed by [`run`](Self::run).
pub struct ReconciliationEngine {
    store: RecordStore,
    config: MatchConfiguration,
    progress: Option<Sender<ProgressEvent>>,
    cancel: CancelToken,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("ledger_rows", &self.store.ledger.len())
            .field("statement_rows", &self.store.statement.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Mutable state threaded through the phases.
struct RunState {
    ledger: Vec<Record>,
    statement: Vec<Record>,
    ledger_index: CandidateIndex,
    statement_index: CandidateIndex,
    residual: Residual,
    scorer: FuzzyScorer,
    finder: SplitCombinationFinder,
    result: MatchResult,
}

impl ReconciliationEngine {
    /// Validate `config` (normalizing its amount mode) against `store`.
    pub fn new(store: RecordStore, mut config: MatchConfiguration) -> Result<Self, ConfigError> {
        config.validate()?;
        config.validate_against(&store)?;
        Ok(Self {
            store,
            config,
            progress: None,
            cancel: cancel_token(),
        })
    }

    pub fn with_progress(mut self, sender: Sender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &MatchConfiguration {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every phase to completion, or until cancellation is observed.
    pub fn run(self) -> Result<RunOutcome, ReconError> {
        let started = Instant::now();
        let ledger_rows = self.store.ledger.len();
        let statement_rows = self.store.statement.len();
        log::info!(
            "reconciliation started: {ledger_rows} ledger rows, {statement_rows} statement rows, amount mode {}",
            self.config.amount_mode
        );

        let reporter = Reporter::new(
            self.progress.clone(),
            self.cancel.clone(),
            self.config.tuning.progress_batch,
        );
        let mut state = guarded(Phase::Prepare, || self.prepare())?;

        for phase in PHASES {
            let step = guarded(phase, || self.run_phase(phase, &mut state, &reporter))?;
            if step.is_err() {
                log::info!("reconciliation cancelled during {phase}");
                return Ok(RunOutcome::Cancelled);
            }
        }
        if reporter.is_cancelled() {
            log::info!("reconciliation cancelled before finalize");
            return Ok(RunOutcome::Cancelled);
        }

        let report = guarded(Phase::Finalize, || finalize(state, started))??;
        log::info!(
            "reconciliation finished in {} ms: {} pairs, {} foreign credits, {} splits, {} ledger / {} statement unmatched",
            report.stats.elapsed_ms,
            report.summary.matched_pairs,
            report.summary.foreign_credits,
            report.summary.split_matches,
            report.summary.unmatched_ledger,
            report.summary.unmatched_statement,
        );
        Ok(RunOutcome::Completed(Box::new(report)))
    }

    fn prepare(&self) -> RunState {
        let (ledger, statement) = self.store.extract(&self.config);
        let ledger_index = CandidateIndex::build(&ledger, Side::Ledger, &self.config);
        let statement_index = CandidateIndex::build(&statement, Side::Statement, &self.config);
        log::debug!(
            "prepared {} ledger and {} statement records",
            ledger.len(),
            statement.len()
        );
        RunState {
            residual: Residual::new(ledger.len(), statement.len()),
            ledger,
            statement,
            ledger_index,
            statement_index,
            scorer: FuzzyScorer::new(),
            finder: SplitCombinationFinder::from_tuning(&self.config.tuning),
            result: MatchResult::default(),
        }
    }

    fn run_phase(&self, phase: Phase, state: &mut RunState, reporter: &Reporter) -> Result<(), Cancelled> {
        let config = &self.config;
        let total = match phase {
            Phase::SplitLedgerAnchor => state.ledger.len(),
            _ => state.statement.len(),
        };
        // Foreign credits and splits compare amounts; without them there is nothing to do.
        let active = phase == Phase::ExactFuzzy || config.match_amounts;
        let mut progress = reporter.begin(phase, if active { total } else { 0 })?;
        if !active {
            progress.finish();
            log::debug!("{phase}: skipped, amounts not matched");
            return Ok(());
        }

        match phase {
            Phase::ExactFuzzy => {
                let matcher = ExactFuzzyMatcher::new(config, &state.ledger, &state.ledger_index);
                let pairs = matcher.run(&state.statement, &mut state.residual, &mut state.scorer, &mut progress)?;
                log::debug!("{phase}: {} pairs from {} statement rows", pairs.len(), progress.processed());
                state.result.matched = pairs;
            }
            Phase::ForeignCredit => {
                let matcher = ForeignCreditMatcher::new(config, &state.ledger, &state.ledger_index);
                let found = matcher.run(&state.statement, &mut state.residual, &mut progress)?;
                log::debug!("{phase}: {} foreign credits", found.len());
                state.result.foreign_credits = found;
            }
            Phase::SplitStatementAnchor | Phase::SplitLedgerAnchor => {
                let pass = if phase == Phase::SplitStatementAnchor {
                    SplitPass {
                        config,
                        anchor_side: Side::Statement,
                        anchors: &state.statement,
                        counterparts: &state.ledger,
                        counterpart_index: &state.ledger_index,
                    }
                } else {
                    SplitPass {
                        config,
                        anchor_side: Side::Ledger,
                        anchors: &state.ledger,
                        counterparts: &state.statement,
                        counterpart_index: &state.statement_index,
                    }
                };
                let found = pass.run(&mut state.finder, &mut state.residual, &mut state.scorer, &mut progress)?;
                log::debug!("{phase}: {} split groups", found.len());
                state.result.split_matches.extend(found);
            }
            Phase::Prepare | Phase::Finalize => {}
        }
        progress.finish();
        Ok(())
    }
}

fn finalize(mut state: RunState, started: Instant) -> Result<ReconReport, ReconError> {
    state.result.unmatched_ledger = Residual::unused(&state.residual.ledger);
    state.result.unmatched_statement = Residual::unused(&state.residual.statement);

    let ledger_rows = state.ledger.len();
    let statement_rows = state.statement.len();
    state
        .result
        .verify_partition(ledger_rows, statement_rows)
        .map_err(|message| ReconError::Internal {
            phase: Phase::Finalize,
            message,
        })?;

    let summary = compute_summary(&state.result, ledger_rows, statement_rows);
    let stats = RunStats {
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        fuzzy_cache_hits: state.scorer.hits(),
        fuzzy_cache_misses: state.scorer.misses(),
        split_pairs_checked: state.finder.pairs_checked(),
        split_dp_states: state.finder.dp_states(),
        split_cap_hits: state.finder.cap_hits(),
    };
    state.scorer.clear();

    Ok(ReconReport {
        result: state.result,
        summary,
        stats,
    })
}

/// Run `f`, turning a panic into an internal error tagged with `phase`.
fn guarded<T>(phase: Phase, f: impl FnOnce() -> T) -> Result<T, ReconError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        log::error!("internal error during {phase}: {message}");
        ReconError::Internal { phase, message }
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Validate and run on the current thread, without progress reporting.
pub fn run(store: RecordStore, config: MatchConfiguration) -> Result<RunOutcome, ReconError> {
    ReconciliationEngine::new(store, config)?.run()
}
