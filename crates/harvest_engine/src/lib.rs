//! Harvest engine: rate-limited fetching, source fallback, worker pool and batched persistence.
mod adapter;
mod batch;
mod directory_store;
mod filename;
mod http;
mod orchestrator;
mod persist;
mod pool;
mod progress;
mod rate_limit;
mod resolver;
mod store;

pub use adapter::{AdapterFactory, AdapterResponse, FetchAdapter, SourceSet};
pub use batch::{BatchSettings, BatchWriter, FlushTrigger, WriterInput, WriterPhase, WriterReport};
pub use directory_store::{DirectoryStore, StoredRecord};
pub use filename::record_filename;
pub use http::{HttpAdapter, HttpAdapterFactory, HttpSourceSettings};
pub use orchestrator::{HarvestError, HarvestSummary, Harvester};
pub use persist::{AtomicFileWriter, PersistError};
pub use pool::{PoolLimiters, PoolReport, WorkerPool};
pub use progress::ProgressReporter;
pub use rate_limit::{RateLimitError, RateLimiter};
pub use resolver::{Resolution, ResolvePolicy, SourceResolver};
pub use store::{HarvestStore, PersistenceError, StoreError, UpsertResults};
