//! `matchbook-recon`: ledger to bank statement reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded tabular records and a matching
//! configuration, returns which rows pair up (one-to-one, high-value foreign
//! credits, or one-to-many splits) and which stay unmatched. No file parsing
//! or rendering.
//!
//! Runs either on the caller's thread ([`run`]) or on a worker thread
//! ([`start`]) with batched progress events and cooperative cancellation.

pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
mod foreign;
pub mod fuzzy;
pub mod index;
mod matcher;
pub mod model;
pub mod progress;
pub mod split;
pub mod store;
pub mod worker;

pub use config::{AmountMode, LedgerColumns, MatchConfiguration, StatementColumns, TuningConfig};
pub use engine::{run, ReconciliationEngine};
pub use error::{ConfigError, ReconError};
pub use fuzzy::FuzzyScorer;
pub use model::{
    AmountColumn, ForeignCreditMatch, MatchKind, MatchResult, MatchSummary, MatchedPair, Phase, ProgressEvent,
    ReconReport, RunOutcome, RunStats, Side, SplitMatch,
};
pub use progress::CancelToken;
pub use split::{SplitCandidate, SplitCombinationFinder};
pub use store::{Cell, Dataset, RecordStore, Row};
pub use worker::{start, ReconHandle};
