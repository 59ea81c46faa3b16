use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::{AmountColumn, Side};
use crate::store::RecordStore;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Matching settings for one reconciliation run.
///
/// `amount_mode` is never read from user input: [`MatchConfiguration::validate`]
/// derives it from which ledger amount columns are configured.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchConfiguration {
    #[serde(default)]
    pub match_dates: bool,
    #[serde(default)]
    pub match_references: bool,
    #[serde(default)]
    pub match_amounts: bool,
    #[serde(skip)]
    pub amount_mode: AmountMode,
    #[serde(default)]
    pub fuzzy_enabled: bool,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: u8,
    #[serde(default)]
    pub ledger: LedgerColumns,
    #[serde(default)]
    pub statement: StatementColumns,
    #[serde(default)]
    pub tuning: TuningConfig,
}

fn default_similarity_threshold() -> u8 {
    80
}

impl Default for MatchConfiguration {
    fn default() -> Self {
        Self {
            match_dates: false,
            match_references: false,
            match_amounts: false,
            amount_mode: AmountMode::default(),
            fuzzy_enabled: false,
            similarity_threshold: default_similarity_threshold(),
            ledger: LedgerColumns::default(),
            statement: StatementColumns::default(),
            tuning: TuningConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Amount mode
// ---------------------------------------------------------------------------

/// Which ledger amount columns take part in amount comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmountMode {
    DebitsOnly,
    CreditsOnly,
    #[default]
    Both,
}

impl AmountMode {
    /// Ledger column a signed statement amount is compared against.
    /// Under `Both` the sign decides: inflows pair with debits, outflows with credits.
    pub fn column_for(&self, statement_cents: i64) -> AmountColumn {
        match self {
            Self::DebitsOnly => AmountColumn::Debit,
            Self::CreditsOnly => AmountColumn::Credit,
            Self::Both => {
                if statement_cents < 0 {
                    AmountColumn::Credit
                } else {
                    AmountColumn::Debit
                }
            }
        }
    }

    pub fn allows(&self, column: AmountColumn) -> bool {
        match self {
            Self::DebitsOnly => column == AmountColumn::Debit,
            Self::CreditsOnly => column == AmountColumn::Credit,
            Self::Both => true,
        }
    }
}

impl std::fmt::Display for AmountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DebitsOnly => write!(f, "debits_only"),
            Self::CreditsOnly => write!(f, "credits_only"),
            Self::Both => write!(f, "both"),
        }
    }
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerColumns {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub debit: Option<String>,
    #[serde(default)]
    pub credit: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatementColumns {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
}

// ---------------------------------------------------------------------------
// Tuning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TuningConfig {
    /// Statement rows strictly above this absolute amount enter the foreign credit pass.
    #[serde(default = "default_foreign_threshold")]
    pub foreign_credit_threshold_cents: i64,
    #[serde(default = "default_split_tolerance")]
    pub split_tolerance_cents: i64,
    #[serde(default = "default_split_group")]
    pub split_max_group_size: usize,
    #[serde(default = "default_split_table")]
    pub split_max_table_entries: usize,
    /// Records handled between progress events and cancellation checks.
    #[serde(default = "default_progress_batch")]
    pub progress_batch: usize,
}

fn default_foreign_threshold() -> i64 {
    1_000_000
}

fn default_split_tolerance() -> i64 {
    2
}

fn default_split_group() -> usize {
    6
}

fn default_split_table() -> usize {
    250_000
}

fn default_progress_batch() -> usize {
    256
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            foreign_credit_threshold_cents: default_foreign_threshold(),
            split_tolerance_cents: default_split_tolerance(),
            split_max_group_size: default_split_group(),
            split_max_table_entries: default_split_table(),
            progress_batch: default_progress_batch(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

fn is_set(column: &Option<String>) -> bool {
    column.as_deref().is_some_and(|c| !c.trim().is_empty())
}

impl MatchConfiguration {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let mut config: MatchConfiguration =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&input)
    }

    /// Check the enabled criteria have the columns they need, then derive
    /// `amount_mode` from the configured ledger amount columns.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if !self.match_dates && !self.match_references && !self.match_amounts {
            return Err(ConfigError::NoCriteria);
        }

        if self.similarity_threshold > 100 {
            return Err(ConfigError::ThresholdOutOfRange(self.similarity_threshold));
        }

        if self.match_references {
            if !is_set(&self.ledger.reference) {
                return Err(ConfigError::MissingReferenceColumn { side: Side::Ledger });
            }
            if !is_set(&self.statement.reference) {
                return Err(ConfigError::MissingReferenceColumn { side: Side::Statement });
            }
        }

        if self.match_amounts {
            if !is_set(&self.statement.amount) {
                return Err(ConfigError::MissingStatementAmountColumn);
            }
            self.amount_mode = match (is_set(&self.ledger.debit), is_set(&self.ledger.credit)) {
                (true, false) => AmountMode::DebitsOnly,
                (false, true) => AmountMode::CreditsOnly,
                (true, true) => AmountMode::Both,
                (false, false) => return Err(ConfigError::MissingLedgerAmountColumns),
            };
        }

        if self.match_dates {
            if !is_set(&self.ledger.date) {
                return Err(ConfigError::MissingDateColumn { side: Side::Ledger });
            }
            if !is_set(&self.statement.date) {
                return Err(ConfigError::MissingDateColumn { side: Side::Statement });
            }
        }

        Ok(())
    }

    /// Every column an enabled criterion reads must exist in the loaded data.
    pub fn validate_against(&self, store: &RecordStore) -> Result<(), ConfigError> {
        let mut required: Vec<(Side, &Option<String>)> = Vec::new();
        if self.match_dates {
            required.push((Side::Ledger, &self.ledger.date));
            required.push((Side::Statement, &self.statement.date));
        }
        if self.match_references {
            required.push((Side::Ledger, &self.ledger.reference));
            required.push((Side::Statement, &self.statement.reference));
        }
        if self.match_amounts {
            required.push((Side::Ledger, &self.ledger.debit));
            required.push((Side::Ledger, &self.ledger.credit));
            required.push((Side::Statement, &self.statement.amount));
        }

        for (side, column) in required {
            let Some(name) = column.as_deref().filter(|c| !c.trim().is_empty()) else {
                continue;
            };
            if store.dataset(side).column_index(name).is_none() {
                return Err(ConfigError::UnknownColumn {
                    side,
                    column: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Only references are compared: phase 1 can use direct reference lookups.
    pub fn references_only(&self) -> bool {
        self.match_references && !self.match_dates && !self.match_amounts
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
