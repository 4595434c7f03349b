//! File-backed [`HarvestStore`].
//!
//! Layout under the root directory:
//! - `manifest.ron` lists every known target (`Vec<WorkItem>`).
//! - `records/` holds one JSON file per identity, named by [`record_filename`].
//!
//! A target is outstanding while its record file does not exist. Upserts replace
//! the file atomically, so writing the same identity twice is harmless.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use harvest_core::{BatchRecord, DateRange, RecordPayload, SourceRole, WorkItem};
use harvest_logging::{harvest_debug, harvest_info};
use serde::{Deserialize, Serialize};

use crate::{
    record_filename, AtomicFileWriter, HarvestStore, PersistenceError, StoreError, UpsertResults,
};

const MANIFEST_FILENAME: &str = "manifest.ron";
const RECORDS_DIR: &str = "records";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    targets: Vec<WorkItem>,
}

/// On-disk shape of one harvested record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub identity: String,
    pub item: WorkItem,
    pub source: SourceRole,
    pub harvested_utc: String,
    pub payload: RecordPayload,
}

pub struct DirectoryStore {
    root: AtomicFileWriter,
    records: AtomicFileWriter,
}

impl DirectoryStore {
    /// Opens (and creates if needed) a store rooted at `root`. Fails when either
    /// directory cannot be written.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let records = AtomicFileWriter::create(root.join(RECORDS_DIR))?;
        let root = AtomicFileWriter::create(root)?;
        Ok(Self { root, records })
    }

    pub fn root(&self) -> &Path {
        self.root.dir()
    }

    pub fn write_manifest(&self, targets: &[WorkItem]) -> Result<(), StoreError> {
        let manifest = Manifest {
            targets: targets.to_vec(),
        };
        let text = ron::ser::to_string_pretty(&manifest, ron::ser::PrettyConfig::new()).map_err(
            |e| StoreError::Decode {
                what: MANIFEST_FILENAME.to_string(),
                message: e.to_string(),
            },
        )?;
        self.root.write(MANIFEST_FILENAME, text.as_bytes())?;
        Ok(())
    }

    /// Every target in the manifest. A missing manifest means no targets.
    pub fn load_manifest(&self) -> Result<Vec<WorkItem>, StoreError> {
        let path = self.root().join(MANIFEST_FILENAME);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                harvest_info!("no manifest at {:?}; nothing to harvest", path);
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };
        let manifest: Manifest = ron::from_str(&text).map_err(|e| StoreError::Decode {
            what: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(manifest.targets)
    }

    pub fn record_path(&self, item: &WorkItem) -> PathBuf {
        self.records.dir().join(record_filename(item))
    }

    pub fn read_record(&self, item: &WorkItem) -> Result<Option<StoredRecord>, StoreError> {
        let path = self.record_path(item);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode {
            what: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(record))
    }

    fn upsert_one(&self, record: &BatchRecord, harvested_utc: &str) -> Result<(), PersistenceError> {
        let identity = record.identity();
        let stored = StoredRecord {
            identity: identity.clone(),
            item: record.item.clone(),
            source: record.source,
            harvested_utc: harvested_utc.to_string(),
            payload: record.payload.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&stored)
            .map_err(|e| PersistenceError::new(identity.clone(), e.to_string()))?;
        self.records
            .write(&record_filename(&record.item), &bytes)
            .map_err(|e| PersistenceError::new(identity, e.to_string()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl HarvestStore for DirectoryStore {
    async fn outstanding(&mut self, range: &DateRange) -> Result<Vec<WorkItem>, StoreError> {
        let mut items: Vec<WorkItem> = self
            .load_manifest()?
            .into_iter()
            .filter(|item| range.contains(item.date))
            .filter(|item| !self.record_path(item).exists())
            .collect();
        items.sort();
        items.dedup();
        harvest_debug!("{} outstanding item(s) in {}", items.len(), range);
        Ok(items)
    }

    async fn upsert_batch(&mut self, batch: &[BatchRecord]) -> Result<UpsertResults, StoreError> {
        let harvested_utc = Utc::now().to_rfc3339();
        Ok(batch
            .iter()
            .map(|record| self.upsert_one(record, &harvested_utc))
            .collect())
    }
}
