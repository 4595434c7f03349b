#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use harvest_core::{
    BatchRecord, DateRange, FetchError, MissingKind, RecordPayload, RecordRow, SourceRole,
    WorkItem,
};
use harvest_engine::{
    AdapterFactory, AdapterResponse, FetchAdapter, HarvestStore, PersistenceError, StoreError,
    UpsertResults,
};
use tokio::time::Instant;

pub fn init_logging() {
    harvest_logging::initialize_for_tests();
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, 12).unwrap()
}

/// Item `n` of a run; sequence numbers start at 1.
pub fn item(n: u32) -> WorkItem {
    WorkItem::new("harbor-city", day(), n, MissingKind::All)
}

pub fn items(count: u32) -> Vec<WorkItem> {
    (1..=count).map(item).collect()
}

pub fn payload(value: f64) -> RecordPayload {
    RecordPayload::new(vec![RecordRow::new("main").with_value(value)])
}

pub fn record(n: u32) -> BatchRecord {
    BatchRecord::new(item(n), payload(f64::from(n)), SourceRole::Primary)
}

/// What a scripted adapter does for one call.
#[derive(Debug, Clone)]
pub enum Step {
    Payload(RecordPayload),
    Empty,
    Fail(FetchError),
    Delay(Duration, Box<Step>),
    Panic,
}

impl Step {
    pub fn delayed(delay: Duration, then: Step) -> Self {
        Step::Delay(delay, Box::new(then))
    }
}

/// Decides the step from the item and the 1-based attempt number for that item.
pub type Script = Arc<dyn Fn(&WorkItem, u32) -> Step + Send + Sync>;

pub fn script<F>(f: F) -> Script
where
    F: Fn(&WorkItem, u32) -> Step + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone)]
pub struct Call {
    pub source: String,
    pub identity: String,
    pub worker_id: usize,
    pub at: Instant,
}

/// Shared record of every adapter call, plus in-flight tracking.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<Call>>,
    built: Mutex<Vec<(String, usize)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CallLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, source: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.source == source)
            .collect()
    }

    pub fn built(&self) -> Vec<(String, usize)> {
        self.built.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight { log: self.clone() }
    }
}

struct InFlight {
    log: Arc<CallLog>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ScriptedAdapter {
    name: String,
    worker_id: usize,
    script: Script,
    log: Arc<CallLog>,
    attempts: HashMap<String, u32>,
}

#[async_trait::async_trait]
impl FetchAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&mut self, item: &WorkItem, _timeout: Duration) -> Result<AdapterResponse, FetchError> {
        let identity = item.identity();
        let attempt = {
            let counter = self.attempts.entry(identity.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        self.log.calls.lock().unwrap().push(Call {
            source: self.name.clone(),
            identity,
            worker_id: self.worker_id,
            at: Instant::now(),
        });
        let _guard = self.log.enter();

        let mut step = (self.script)(item, attempt);
        loop {
            match step {
                Step::Payload(payload) => return Ok(AdapterResponse::Payload(payload)),
                Step::Empty => return Ok(AdapterResponse::Empty),
                Step::Fail(err) => return Err(err),
                Step::Delay(delay, then) => {
                    tokio::time::sleep(delay).await;
                    step = *then;
                }
                Step::Panic => panic!("scripted adapter failure"),
            }
        }
    }
}

/// A factory building a fresh [`ScriptedAdapter`] per worker.
pub fn scripted(name: &str, script: Script, log: Arc<CallLog>) -> Arc<dyn AdapterFactory> {
    let name = name.to_string();
    Arc::new(move |worker_id: usize| -> Result<Box<dyn FetchAdapter>, FetchError> {
        log.built.lock().unwrap().push((name.clone(), worker_id));
        Ok(Box::new(ScriptedAdapter {
            name: name.clone(),
            worker_id,
            script: script.clone(),
            log: log.clone(),
            attempts: HashMap::new(),
        }))
    })
}

#[derive(Debug, Clone)]
pub struct Upsert {
    pub identity: String,
    pub payload: RecordPayload,
    pub source: SourceRole,
}

#[derive(Debug, Default)]
pub struct MemoryState {
    pub targets: Vec<WorkItem>,
    pub rows: HashMap<String, Upsert>,
    pub upserts: Vec<Upsert>,
    pub batches: Vec<(usize, Instant)>,
    pub fail_identities: HashSet<String>,
    pub fail_batches: bool,
}

/// In-memory store; clones share state so tests can inspect it after the
/// writer has taken ownership.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn with_targets(targets: Vec<WorkItem>) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().targets = targets;
        store
    }

    pub fn fail_identity(&self, identity: String) {
        self.state.lock().unwrap().fail_identities.insert(identity);
    }

    pub fn fail_batches(&self) {
        self.state.lock().unwrap().fail_batches = true;
    }

    pub fn upserts(&self) -> Vec<Upsert> {
        self.state.lock().unwrap().upserts.clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .batches
            .iter()
            .map(|(size, _)| *size)
            .collect()
    }

    pub fn batch_times(&self) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .batches
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn stored(&self, identity: &str) -> Option<Upsert> {
        self.state.lock().unwrap().rows.get(identity).cloned()
    }
}

#[async_trait::async_trait]
impl HarvestStore for MemoryStore {
    async fn outstanding(&mut self, range: &DateRange) -> Result<Vec<WorkItem>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .targets
            .iter()
            .filter(|item| range.contains(item.date))
            .filter(|item| !state.rows.contains_key(&item.identity()))
            .cloned()
            .collect())
    }

    async fn upsert_batch(&mut self, batch: &[BatchRecord]) -> Result<UpsertResults, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_batches {
            return Err(StoreError::Transaction("store unavailable".to_string()));
        }
        state.batches.push((batch.len(), Instant::now()));
        let mut results = Vec::with_capacity(batch.len());
        for record in batch {
            let identity = record.identity();
            if state.fail_identities.contains(&identity) {
                results.push(Err(PersistenceError::new(identity, "constraint violation")));
                continue;
            }
            let upsert = Upsert {
                identity: identity.clone(),
                payload: record.payload.clone(),
                source: record.source,
            };
            state.rows.insert(identity, upsert.clone());
            state.upserts.push(upsert);
            results.push(Ok(()));
        }
        Ok(results)
    }
}

/// Largest number of calls starting within any half-open window `[t, t + window)`.
pub fn max_calls_in_window(calls: &[Call], window: Duration) -> usize {
    let mut times: Vec<Instant> = calls.iter().map(|call| call.at).collect();
    times.sort();
    max_in_window(&times, window)
}

pub fn max_in_window(times: &[Instant], window: Duration) -> usize {
    let mut sorted = times.to_vec();
    sorted.sort();
    (0..sorted.len())
        .map(|i| {
            sorted[i..]
                .iter()
                .take_while(|t| t.duration_since(sorted[i]) < window)
                .count()
        })
        .max()
        .unwrap_or(0)
}
