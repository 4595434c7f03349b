use std::sync::Arc;
use std::time::Duration;

use harvest_core::{FetchError, RecordPayload, WorkItem};

/// What a source returned for one item, before completeness validation.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterResponse {
    Payload(RecordPayload),
    /// The source answered without error but has nothing for this item.
    Empty,
}

/// One external source. Instances hold per-call session state and are owned by
/// exactly one worker; they are never shared.
#[async_trait::async_trait]
pub trait FetchAdapter: Send {
    fn name(&self) -> &str;

    /// Fetches the record for `item`. `timeout` is the budget for this call;
    /// the resolver enforces it as well.
    async fn fetch(&mut self, item: &WorkItem, timeout: Duration) -> Result<AdapterResponse, FetchError>;
}

/// Builds a private adapter instance for each worker.
pub trait AdapterFactory: Send + Sync {
    fn build(&self, worker_id: usize) -> Result<Box<dyn FetchAdapter>, FetchError>;
}

impl<F> AdapterFactory for F
where
    F: Fn(usize) -> Result<Box<dyn FetchAdapter>, FetchError> + Send + Sync,
{
    fn build(&self, worker_id: usize) -> Result<Box<dyn FetchAdapter>, FetchError> {
        self(worker_id)
    }
}

/// The fallback chain: a required primary and an optional secondary source.
#[derive(Clone)]
pub struct SourceSet {
    pub primary: Arc<dyn AdapterFactory>,
    pub secondary: Option<Arc<dyn AdapterFactory>>,
}

impl SourceSet {
    pub fn new(primary: Arc<dyn AdapterFactory>) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn AdapterFactory>) -> Self {
        self.secondary = Some(secondary);
        self
    }
}
