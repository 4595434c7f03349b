use std::fs;

use chrono::NaiveDate;
use harvest_core::{BatchRecord, DateRange, MissingKind, RecordPayload, RecordRow, SourceRole, WorkItem};
use harvest_engine::{record_filename, AtomicFileWriter, DirectoryStore, HarvestStore, StoreError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
}

fn target(day: u32, sequence: u32) -> WorkItem {
    WorkItem::new("harbor-city", date(day), sequence, MissingKind::Total)
}

fn record(item: WorkItem, total: f64) -> BatchRecord {
    BatchRecord::new(
        item,
        RecordPayload::new(vec![RecordRow::new("main").with_total(total)]),
        SourceRole::Primary,
    )
}

#[tokio::test]
async fn outstanding_is_in_range_and_not_yet_stored() {
    let temp = TempDir::new().unwrap();
    let mut store = DirectoryStore::open(temp.path()).unwrap();
    store
        .write_manifest(&[target(12, 2), target(11, 1), target(12, 1), target(14, 1), target(12, 1)])
        .unwrap();

    let range = DateRange::new(date(11), date(12));
    assert_eq!(
        store.outstanding(&range).await.unwrap(),
        vec![target(11, 1), target(12, 1), target(12, 2)]
    );

    let results = store.upsert_batch(&[record(target(12, 1), 9.0)]).await.unwrap();
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(
        store.outstanding(&range).await.unwrap(),
        vec![target(11, 1), target(12, 2)]
    );
}

#[tokio::test]
async fn missing_manifest_means_nothing_to_do() {
    let temp = TempDir::new().unwrap();
    let mut store = DirectoryStore::open(temp.path().join("fresh")).unwrap();
    assert!(store.root().join("records").is_dir());
    let range = DateRange::single(date(12));
    assert!(store.outstanding(&range).await.unwrap().is_empty());
}

#[tokio::test]
async fn upsert_is_idempotent_and_last_write_wins() {
    let temp = TempDir::new().unwrap();
    let mut store = DirectoryStore::open(temp.path()).unwrap();
    let item = target(12, 1);

    store.upsert_batch(&[record(item.clone(), 1.0)]).await.unwrap();
    store.upsert_batch(&[record(item.clone(), 2.0)]).await.unwrap();

    let files: Vec<_> = fs::read_dir(temp.path().join("records")).unwrap().collect();
    assert_eq!(files.len(), 1);
    let stored = store.read_record(&item).unwrap().expect("record stored");
    assert_eq!(stored.identity, item.identity());
    assert_eq!(stored.item, item);
    assert_eq!(stored.source, SourceRole::Primary);
    assert_eq!(stored.payload.rows[0].total, Some(2.0));
    assert!(!stored.harvested_utc.is_empty());
}

#[test]
fn unknown_record_reads_as_none() {
    let temp = TempDir::new().unwrap();
    let store = DirectoryStore::open(temp.path()).unwrap();
    assert!(store.read_record(&target(12, 7)).unwrap().is_none());
}

#[test]
fn filenames_are_deterministic_and_distinct() {
    let a = WorkItem::new("harbor/city", date(12), 1, MissingKind::Total);
    let b = WorkItem::new("harbor?city", date(12), 1, MissingKind::Total);
    let name = record_filename(&a);
    assert_eq!(name, record_filename(&a.clone()));
    assert!(name.starts_with("harbor_city_20240412_1_total--"));
    assert!(name.ends_with(".json"));
    assert_ne!(name, record_filename(&b));
}

#[test]
fn writer_creates_missing_dir() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("out");
    let writer = AtomicFileWriter::create(new_dir.clone()).unwrap();
    assert!(new_dir.is_dir());

    let first = writer.write("record.json", b"one").unwrap();
    let second = writer.write("record.json", b"two").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "two");
}

#[test]
fn writer_rejects_a_file_in_place_of_the_dir() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    assert!(AtomicFileWriter::create(file_path.clone()).is_err());
    assert_eq!(fs::read_to_string(&file_path).unwrap(), "x");
}

#[test]
fn open_fails_when_root_is_not_a_directory() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("store");
    fs::write(&file_path, "x").unwrap();

    let result = DirectoryStore::open(&file_path);
    assert!(matches!(result, Err(StoreError::Persist(_))));
}

#[tokio::test]
async fn records_dir_removed_after_open_fails_per_record() {
    let temp = TempDir::new().unwrap();
    let mut store = DirectoryStore::open(temp.path()).unwrap();
    fs::remove_dir_all(temp.path().join("records")).unwrap();

    let results = store
        .upsert_batch(&[record(target(12, 1), 1.0), record(target(12, 2), 2.0)])
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    let failed: Vec<String> = results
        .into_iter()
        .filter_map(|result| result.err().map(|err| err.identity))
        .collect();
    assert_eq!(failed, vec![target(12, 1).identity(), target(12, 2).identity()]);
}
