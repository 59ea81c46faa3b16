use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::MatchConfiguration;
use crate::fuzzy::normalize;
use crate::model::{AmountColumn, Side};

// ---------------------------------------------------------------------------
// Cells + rows
// ---------------------------------------------------------------------------

/// One cell of an input row.
///
/// Deserializes untagged: `null` -> Empty, numbers -> Number, ISO dates -> Date,
/// any other string -> Text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Empty,
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<NaiveDate> for Cell {
    fn from(value: NaiveDate) -> Self {
        Cell::Date(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Empty, Into::into)
    }
}

/// Ordered rows sharing one set of user-configured columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    lookup: HashMap<String, usize>,
    rows: Vec<Vec<Cell>>,
}

impl Dataset {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut lookup = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            // First occurrence wins for duplicated headers.
            lookup.entry(name.clone()).or_insert(i);
        }
        Self {
            columns,
            lookup,
            rows: Vec::new(),
        }
    }

    /// Append a row, padding with `Empty` or truncating to the column count.
    pub fn push_row(&mut self, mut cells: Vec<Cell>) {
        cells.resize(self.columns.len(), Cell::Empty);
        self.rows.push(cells);
    }

    pub fn with_row(mut self, cells: Vec<Cell>) -> Self {
        self.push_row(cells);
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|cells| Row {
            dataset: self,
            cells,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |cells| Row {
            dataset: self,
            cells,
        })
    }
}

/// Borrowed view of one dataset row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    dataset: &'a Dataset,
    cells: &'a [Cell],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Cell> {
        self.dataset
            .column_index(column)
            .and_then(|i| self.cells.get(i))
    }

    pub fn cells(&self) -> &'a [Cell] {
        self.cells
    }
}

/// The two inputs of one run. Moved into the engine, never mutated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStore {
    pub ledger: Dataset,
    pub statement: Dataset,
}

impl RecordStore {
    pub fn new(ledger: Dataset, statement: Dataset) -> Self {
        Self { ledger, statement }
    }

    pub fn dataset(&self, side: Side) -> &Dataset {
        match side {
            Side::Ledger => &self.ledger,
            Side::Statement => &self.statement,
        }
    }

    /// Pull the semantic fields each enabled criterion needs out of both datasets.
    pub(crate) fn extract(&self, config: &MatchConfiguration) -> (Vec<Record>, Vec<Record>) {
        let ledger = self
            .ledger
            .rows()
            .enumerate()
            .map(|(i, row)| {
                let mut rec = Record::blank(i);
                if config.match_dates {
                    rec.date = date_field(Side::Ledger, i, &row, config.ledger.date.as_deref());
                }
                if config.match_references {
                    rec.reference = reference_field(&row, config.ledger.reference.as_deref());
                }
                if config.match_amounts {
                    if config.amount_mode.allows(AmountColumn::Debit) {
                        rec.debit_cents =
                            amount_field(Side::Ledger, i, &row, config.ledger.debit.as_deref());
                    }
                    if config.amount_mode.allows(AmountColumn::Credit) {
                        rec.credit_cents =
                            amount_field(Side::Ledger, i, &row, config.ledger.credit.as_deref());
                    }
                }
                rec
            })
            .collect();

        let statement = self
            .statement
            .rows()
            .enumerate()
            .map(|(i, row)| {
                let mut rec = Record::blank(i);
                if config.match_dates {
                    rec.date =
                        date_field(Side::Statement, i, &row, config.statement.date.as_deref());
                }
                if config.match_references {
                    rec.reference = reference_field(&row, config.statement.reference.as_deref());
                }
                if config.match_amounts {
                    rec.amount_cents =
                        amount_field(Side::Statement, i, &row, config.statement.amount.as_deref());
                }
                rec
            })
            .collect();

        (ledger, statement)
    }
}

// ---------------------------------------------------------------------------
// Extracted records
// ---------------------------------------------------------------------------

/// Semantic fields of one row. `None` means absent or unparseable; any
/// comparison against `None` fails.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Record {
    pub index: usize,
    pub date: Option<NaiveDate>,
    /// Normalized (trimmed, lower-cased) reference.
    pub reference: Option<String>,
    pub debit_cents: Option<i64>,
    pub credit_cents: Option<i64>,
    /// Signed statement amount.
    pub amount_cents: Option<i64>,
}

impl Record {
    pub fn blank(index: usize) -> Self {
        Self {
            index,
            date: None,
            reference: None,
            debit_cents: None,
            credit_cents: None,
            amount_cents: None,
        }
    }

    /// Absolute ledger amount in the given column.
    pub fn ledger_cents(&self, column: AmountColumn) -> Option<i64> {
        match column {
            AmountColumn::Debit => self.debit_cents,
            AmountColumn::Credit => self.credit_cents,
        }
        .map(i64::abs)
    }

    /// The column and absolute amount a ledger row anchors a split with:
    /// the debit when present and non-zero, otherwise the credit.
    pub fn ledger_anchor(&self) -> Option<(AmountColumn, i64)> {
        [AmountColumn::Debit, AmountColumn::Credit]
            .into_iter()
            .find_map(|col| self.ledger_cents(col).filter(|c| *c != 0).map(|c| (col, c)))
    }
}

// ---------------------------------------------------------------------------
// Field parsing
// ---------------------------------------------------------------------------

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Serial day numbers accepted as spreadsheet dates (1900-01-01 .. 2173-10-14).
const SERIAL_DATE_RANGE: std::ops::RangeInclusive<f64> = 1.0..=100_000.0;

fn date_field(side: Side, row_index: usize, row: &Row<'_>, column: Option<&str>) -> Option<NaiveDate> {
    let cell = row.get(column?)?;
    let parsed = parse_date(cell);
    if parsed.is_none() && !matches!(cell, Cell::Empty) {
        log::debug!(
            "{side} row {row_index}: cannot parse date {cell:?} in column '{}'",
            column.unwrap_or_default()
        );
    }
    parsed
}

fn amount_field(side: Side, row_index: usize, row: &Row<'_>, column: Option<&str>) -> Option<i64> {
    let cell = row.get(column?)?;
    let parsed = parse_amount_cents(cell);
    if parsed.is_none() && !is_blank(cell) {
        log::debug!(
            "{side} row {row_index}: cannot parse amount {cell:?} in column '{}'",
            column.unwrap_or_default()
        );
    }
    parsed
}

fn reference_field(row: &Row<'_>, column: Option<&str>) -> Option<String> {
    let text = match row.get(column?)? {
        Cell::Empty => return None,
        Cell::Text(s) => s.clone(),
        Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        Cell::Number(n) => n.to_string(),
        Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
    };
    normalize(&text)
}

fn is_blank(cell: &Cell) -> bool {
    match cell {
        Cell::Empty => true,
        Cell::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

pub(crate) fn parse_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Date(d) => Some(*d),
        Cell::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .or_else(|| {
                    DATETIME_FORMATS
                        .iter()
                        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                        .map(|dt| dt.date())
                })
        }
        Cell::Number(n) if SERIAL_DATE_RANGE.contains(n) => {
            let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
            epoch.checked_add_signed(Duration::days(n.trunc() as i64))
        }
        _ => None,
    }
}

/// Parse a cell into signed cents. Accepts currency symbols, thousands
/// separators, `(1.00)` and `1.00-` as negatives.
pub(crate) fn parse_amount_cents(cell: &Cell) -> Option<i64> {
    let value = match cell {
        Cell::Number(n) => *n,
        Cell::Text(s) => parse_amount_text(s)?,
        Cell::Empty | Cell::Date(_) => return None,
    };
    if !value.is_finite() || value.abs() > 1e15 {
        return None;
    }
    Some((value * 100.0).round() as i64)
}

fn parse_amount_text(input: &str) -> Option<f64> {
    let mut s = input.trim();
    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        negative = true;
        s = inner.trim();
    }
    if let Some(rest) = s.strip_suffix('-') {
        negative = !negative;
        s = rest.trim();
    }

    let s = strip_currency_code(s);
    if !comma_groups_valid(s) {
        return None;
    }
    let mut cleaned = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '0'..='9' | '.' | '-' | '+' => cleaned.push(c),
            ',' | ' ' | '\'' | '\u{a0}' => {}
            c if CURRENCY_SYMBOLS.contains(&c) => {}
            _ => return None,
        }
    }
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Commas are only thousands separators: none after the decimal point, and
/// every group after the first exactly three digits. "1.234,56" is rejected
/// rather than read as 1.23.
fn comma_groups_valid(s: &str) -> bool {
    let whole = match s.rfind('.') {
        Some(dot) if s[dot..].contains(',') => return false,
        Some(dot) => &s[..dot],
        None => s,
    };
    let mut groups = whole.split(',');
    let Some(first) = groups.next() else {
        return true;
    };
    let mut grouped = false;
    for group in groups {
        if group.len() != 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        grouped = true;
    }
    !grouped || (1..=3).contains(&first.bytes().filter(u8::is_ascii_digit).count())
}

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹', '₦', '₩'];

/// Drop a leading or trailing three-letter currency code ("USD 10", "10 EUR").
fn strip_currency_code(s: &str) -> &str {
    let is_code = |part: &str| part.len() == 3 && part.chars().all(|c| c.is_ascii_alphabetic());
    let mut s = s.trim();
    if s.len() >= 3 && s.is_char_boundary(3) && is_code(&s[..3]) {
        s = s[3..].trim_start();
    }
    if s.len() >= 3 && s.is_char_boundary(s.len() - 3) && is_code(&s[s.len() - 3..]) {
        s = s[..s.len() - 3].trim_end();
    }
    s
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
