use harvest_core::{BatchRecord, DateRange, WorkItem};
use thiserror::Error;

use crate::PersistError;

/// Per-record outcome of one batch upsert, in batch order.
pub type UpsertResults = Vec<Result<(), PersistenceError>>;

/// One record inside a batch failed to write. The rest of the batch is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to persist {identity}: {message}")]
pub struct PersistenceError {
    pub identity: String,
    pub message: String,
}

impl PersistenceError {
    pub fn new(identity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            message: message.into(),
        }
    }
}

/// Store-level failures: enumeration, or a batch transaction that could not run at all.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not decode {what}: {message}")]
    Decode { what: String, message: String },
    #[error("transaction failed: {0}")]
    Transaction(String),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// The shared store. Enumerates outstanding work and upserts harvested records.
///
/// Only the batch writer calls `upsert_batch`; the orchestrator calls
/// `outstanding` once before the writer takes ownership.
#[async_trait::async_trait]
pub trait HarvestStore: Send {
    async fn outstanding(&mut self, range: &DateRange) -> Result<Vec<WorkItem>, StoreError>;

    /// Idempotent upsert keyed by identity, one transaction per call. Returns one
    /// result per record; `Err` means nothing in the batch was attempted.
    async fn upsert_batch(&mut self, batch: &[BatchRecord]) -> Result<UpsertResults, StoreError>;
}
