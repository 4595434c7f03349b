//! Harvest core: work identities, payload schema, outcomes, counters and run configuration.
mod config;
mod item;
mod outcome;
mod payload;
mod stats;

pub use config::{ConfigError, HarvestConfig};
pub use item::{DateRange, MissingKind, WorkItem};
pub use outcome::{BatchRecord, FailureKind, FetchError, FetchOutcome, SourceRole};
pub use payload::{RecordPayload, RecordRow};
pub use stats::{FailureSample, HarvestStats, StatsSnapshot};
