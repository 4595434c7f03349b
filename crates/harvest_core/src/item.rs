use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which field group a stored record is still missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKind {
    Value,
    Spread,
    Total,
    All,
}

impl MissingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingKind::Value => "value",
            MissingKind::Spread => "spread",
            MissingKind::Total => "total",
            MissingKind::All => "all",
        }
    }
}

impl fmt::Display for MissingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One harvesting unit. Immutable once enumerated from the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItem {
    pub entity: String,
    pub date: NaiveDate,
    pub sequence: u32,
    pub kind: MissingKind,
}

impl WorkItem {
    pub fn new(entity: impl Into<String>, date: NaiveDate, sequence: u32, kind: MissingKind) -> Self {
        Self {
            entity: entity.into(),
            date,
            sequence,
            kind,
        }
    }

    /// Stable key used for upserts and failure reporting: `entity/date/sequence/kind`.
    pub fn identity(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.entity,
            self.date.format("%Y-%m-%d"),
            self.sequence,
            self.kind
        )
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

/// Inclusive date range selecting which outstanding work a run harvests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self::new(day, day)
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar days covered; zero for an inverted range.
    pub fn days(&self) -> u64 {
        if !self.is_valid() {
            return 0;
        }
        (self.end - self.start).num_days() as u64 + 1
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
