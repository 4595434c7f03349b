//! Single consumer persisting harvested records in batches.
//!
//! Phases: `Accumulating` until the buffer reaches `batch_size` or
//! `flush_interval` has passed since the last flush, then `Flushing`, then back.
//! A [`WriterInput::Drain`] (or a closed queue) flushes what is left and ends in
//! `Drained`.

use std::sync::Arc;
use std::time::Duration;

use harvest_core::{BatchRecord, HarvestConfig, HarvestStats};
use harvest_logging::{harvest_debug, harvest_error, harvest_info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::{HarvestStore, PersistenceError};

#[derive(Debug)]
pub enum WriterInput {
    Record(BatchRecord),
    /// No more input: flush the partial batch and stop.
    Drain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterPhase {
    Accumulating,
    Flushing,
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Interval,
    Drain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl From<&HarvestConfig> for BatchSettings {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            flush_interval: config.flush_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriterReport {
    pub received: u64,
    pub written: u64,
    pub dropped: u64,
    /// Trigger of every flush, in order.
    pub flushes: Vec<FlushTrigger>,
}

impl WriterReport {
    pub fn flush_count(&self) -> usize {
        self.flushes.len()
    }
}

pub struct BatchWriter {
    store: Box<dyn HarvestStore>,
    settings: BatchSettings,
    stats: Arc<HarvestStats>,
    buffer: Vec<BatchRecord>,
    phase: WriterPhase,
    last_flush: Instant,
    report: WriterReport,
}

impl BatchWriter {
    pub fn new(store: Box<dyn HarvestStore>, settings: BatchSettings, stats: Arc<HarvestStats>) -> Self {
        let batch_size = settings.batch_size.max(1);
        Self {
            store,
            settings: BatchSettings {
                batch_size,
                ..settings
            },
            stats,
            buffer: Vec::with_capacity(batch_size),
            phase: WriterPhase::Accumulating,
            last_flush: Instant::now(),
            report: WriterReport::default(),
        }
    }

    pub fn phase(&self) -> WriterPhase {
        self.phase
    }

    pub fn spawn(self, input: mpsc::Receiver<WriterInput>) -> JoinHandle<WriterReport> {
        tokio::spawn(self.run(input))
    }

    pub async fn run(mut self, mut input: mpsc::Receiver<WriterInput>) -> WriterReport {
        self.last_flush = Instant::now();
        loop {
            let deadline = self.last_flush + self.settings.flush_interval;
            match tokio::time::timeout_at(deadline, input.recv()).await {
                Ok(Some(WriterInput::Record(record))) => {
                    self.report.received += 1;
                    self.buffer.push(record);
                    if self.buffer.len() >= self.settings.batch_size {
                        self.flush(FlushTrigger::Size).await;
                    } else if Instant::now() >= deadline {
                        self.flush(FlushTrigger::Interval).await;
                    }
                }
                Ok(Some(WriterInput::Drain)) | Ok(None) => break,
                Err(_elapsed) => {
                    if self.buffer.is_empty() {
                        // Nothing to write; restart the interval instead of spinning.
                        self.last_flush = Instant::now();
                    } else {
                        self.flush(FlushTrigger::Interval).await;
                    }
                }
            }
        }

        if !self.buffer.is_empty() {
            self.flush(FlushTrigger::Drain).await;
        }
        self.phase = WriterPhase::Drained;
        harvest_info!(
            "batch writer drained: {} received, {} written, {} dropped, {} flush(es)",
            self.report.received,
            self.report.written,
            self.report.dropped,
            self.report.flush_count()
        );
        self.report
    }

    async fn flush(&mut self, trigger: FlushTrigger) {
        self.phase = WriterPhase::Flushing;
        let batch = std::mem::take(&mut self.buffer);
        harvest_debug!("flushing {} record(s) ({:?})", batch.len(), trigger);

        match self.store.upsert_batch(&batch).await {
            Ok(results) => {
                let mut results = results.into_iter();
                let mut written = 0u64;
                for record in &batch {
                    match results.next() {
                        Some(Ok(())) => written += 1,
                        Some(Err(err)) => self.drop_record(record, &err),
                        None => self.drop_record(
                            record,
                            &PersistenceError::new(record.identity(), "store returned no result"),
                        ),
                    }
                }
                self.report.written += written;
                self.stats.record_persisted(written);
            }
            Err(err) => {
                harvest_error!("batch of {} record(s) failed: {}", batch.len(), err);
                for record in &batch {
                    let failure = PersistenceError::new(record.identity(), err.to_string());
                    self.drop_record(record, &failure);
                }
            }
        }

        self.report.flushes.push(trigger);
        self.last_flush = Instant::now();
        self.buffer = Vec::with_capacity(self.settings.batch_size);
        self.phase = WriterPhase::Accumulating;
    }

    fn drop_record(&mut self, record: &BatchRecord, err: &PersistenceError) {
        harvest_error!("dropped {}: {}", record.identity(), err);
        self.report.dropped += 1;
        self.stats
            .record_persist_failure(&record.identity(), &err.message);
    }
}
