use thiserror::Error;

use crate::model::{Phase, Side};

/// Configuration problems, reported before any matching work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no matching criterion enabled (dates, references, amounts are all off)")]
    NoCriteria,
    #[error("reference matching enabled but the {side} reference column is not set")]
    MissingReferenceColumn { side: Side },
    #[error("amount matching enabled but the statement amount column is not set")]
    MissingStatementAmountColumn,
    #[error("amount matching enabled but neither ledger debit nor credit column is set")]
    MissingLedgerAmountColumns,
    #[error("date matching enabled but the {side} date column is not set")]
    MissingDateColumn { side: Side },
    #[error("similarity threshold must be within 0..=100, got {0}")]
    ThresholdOutOfRange(u8),
    #[error("{side} data has no column '{column}'")]
    UnknownColumn { side: Side, column: String },
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum ReconError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Unexpected fault inside a phase. The run is abandoned.
    #[error("internal error during {phase}: {message}")]
    Internal { phase: Phase, message: String },
}
