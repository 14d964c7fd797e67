//! Human-readable document numbers.
//!
//! Two strategies exist. Most order types derive the next sequence from the
//! highest primary key in their table. Invoices restart every calendar year
//! and scan the numeric suffix of the existing numbers for that year
//! (`INV-2024-000001`, `INV-2024-000002`, ...).
//!
//! Neither strategy is safe under concurrent inserts on its own; callers
//! persist through `DocumentService::insert_numbered`, which relies on the
//! unique index on each `number` column and retries on collision.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberingStrategy {
    /// `prefix + pad(max(id) + 1)`
    MaxIdPlusOne,
    /// `prefix + year + "-" + pad(max(suffix for year) + 1)`
    YearlySequence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingScheme {
    pub prefix: String,
    pub width: usize,
    pub strategy: NumberingStrategy,
}

impl NumberingScheme {
    pub fn new(prefix: &str, width: usize, strategy: NumberingStrategy) -> Self {
        Self {
            prefix: prefix.to_string(),
            width,
            strategy,
        }
    }

    /// Prefix shared by every number this scheme emits for `year`.
    pub fn prefix_for(&self, year: i32) -> String {
        match self.strategy {
            NumberingStrategy::MaxIdPlusOne => self.prefix.clone(),
            NumberingStrategy::YearlySequence => yearly_prefix(&self.prefix, year),
        }
    }

    /// Builds the number for an already computed sequence value.
    pub fn render(&self, year: i32, sequence: u64) -> String {
        format_number(&self.prefix_for(year), sequence, self.width)
    }
}

pub fn format_number(prefix: &str, sequence: u64, width: usize) -> String {
    format!("{}{:0width$}", prefix, sequence, width = width)
}

pub fn yearly_prefix(prefix: &str, year: i32) -> String {
    format!("{}{}-", prefix, year)
}

/// `max(id) + 1`, starting at 1 for an empty table.
pub fn next_from_max_id(max_id: Option<i32>) -> u64 {
    match max_id {
        Some(id) if id > 0 => id as u64 + 1,
        _ => 1,
    }
}

/// Parses the numeric suffix of every number carrying `year_prefix` and
/// returns the next free sequence value.
pub fn next_yearly_sequence<'a, I>(existing: I, year_prefix: &str) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    existing
        .into_iter()
        .filter_map(|number| number.strip_prefix(year_prefix))
        .filter_map(|suffix| suffix.parse::<u64>().ok())
        .max()
        .map_or(1, |max| max + 1)
}
