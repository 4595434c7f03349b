use serde::{Deserialize, Serialize};

use crate::MissingKind;

/// One sub-record of a fetched payload. Every data field is optional; sources
/// frequently publish partial rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordRow {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

impl RecordRow {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_spread(mut self, spread: f64) -> Self {
        self.spread = Some(spread);
        self
    }

    pub fn with_total(mut self, total: f64) -> Self {
        self.total = Some(total);
        self
    }

    /// Whether this row carries at least one field the given kind asks for.
    pub fn has_field_for(&self, kind: MissingKind) -> bool {
        match kind {
            MissingKind::Value => self.value.is_some(),
            MissingKind::Spread => self.spread.is_some(),
            MissingKind::Total => self.total.is_some(),
            MissingKind::All => {
                self.value.is_some() || self.spread.is_some() || self.total.is_some()
            }
        }
    }
}

/// Structured record produced by a fetch adapter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordPayload {
    #[serde(default)]
    pub rows: Vec<RecordRow>,
}

impl RecordPayload {
    pub fn new(rows: Vec<RecordRow>) -> Self {
        Self { rows }
    }

    /// Minimal completeness: at least one row has at least one field the kind needs.
    /// A payload failing this is treated as "no data", not as a success.
    pub fn is_complete_for(&self, kind: MissingKind) -> bool {
        self.rows.iter().any(|row| row.has_field_for(kind))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
