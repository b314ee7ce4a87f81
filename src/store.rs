// 🗄️ Record Store - atomic JSON persistence for filings and transactions
//
// Every write rewrites the whole collection into a temp file in the same
// directory and renames it over the target, so a crash leaves either the old
// or the new file on disk, never a torn one.

use crate::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// A lock file older than this was left behind by a killed process
const STALE_LOCK_AFTER: Duration = Duration::from_secs(300);

/// Run lock age after which a pipeline run is presumed killed
const STALE_RUN_LOCK_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

/// Lock file held for the duration of a pipeline run
const RUN_LOCK_FILE: &str = ".run.lock";

// ============================================================================
// COLLECTIONS + RECORDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Filings,
    Transactions,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Filings => "filings",
            Collection::Transactions => "transactions",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.name())
    }
}

/// A typed record persisted in one collection, keyed by its id
pub trait Record: Serialize + DeserializeOwned + Clone {
    const COLLECTION: Collection;

    fn record_id(&self) -> String;

    /// Schema checks beyond what deserialization enforces
    fn validate(&self) -> std::result::Result<(), String>;
}

/// On-disk envelope of one collection file
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "R: Record")]
struct CollectionFile<R: Record> {
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,

    #[serde(default)]
    markers: BTreeMap<String, String>,

    #[serde(default)]
    records: BTreeMap<String, R>,

    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl<R: Record> Default for CollectionFile<R> {
    fn default() -> Self {
        CollectionFile {
            last_updated: None,
            markers: BTreeMap::new(),
            records: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

// ============================================================================
// RECORD STORE
// ============================================================================

/// Store handle, shared by every component through an `Arc`
#[derive(Debug)]
pub struct RecordStore {
    root: PathBuf,
    in_flight: Mutex<HashSet<Collection>>,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RecordStore {
            root: root.into(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Open a store, creating the data directory when missing
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = RecordStore::new(root);
        store.ensure_ready()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.file_name())
    }

    fn lock_path(&self, collection: Collection) -> PathBuf {
        self.root.join(format!(".{}.lock", collection.file_name()))
    }

    /// Create the data directory and check both collections parse
    pub fn ensure_ready(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        if !self.root.is_dir() {
            return Err(MonitorError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("data directory {} is not a directory", self.root.display()),
            )));
        }
        self.load::<crate::entities::Filing>()?;
        self.load::<crate::entities::Transaction>()?;
        Ok(())
    }

    // ========================================================================
    // READS
    // ========================================================================

    fn load<R: Record>(&self) -> Result<CollectionFile<R>> {
        let collection = R::COLLECTION;
        let path = self.path_of(collection);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CollectionFile::default()),
            Err(e) => return Err(e.into()),
        };

        let file: CollectionFile<R> =
            serde_json::from_slice(&bytes).map_err(|e| MonitorError::CorruptStore {
                collection: collection.name().to_string(),
                reason: format!("{} does not parse: {}", path.display(), e),
            })?;

        for (key, record) in &file.records {
            if record.record_id() != *key {
                return Err(MonitorError::CorruptStore {
                    collection: collection.name().to_string(),
                    reason: format!("record keyed '{}' carries id '{}'", key, record.record_id()),
                });
            }
            record.validate().map_err(|reason| MonitorError::CorruptStore {
                collection: collection.name().to_string(),
                reason: format!("record '{}': {}", key, reason),
            })?;
        }

        Ok(file)
    }

    /// All records of a collection, ordered by id
    pub fn get_all<R: Record>(&self) -> Result<Vec<R>> {
        Ok(self.load::<R>()?.records.into_values().collect())
    }

    pub fn get<R: Record>(&self, id: &str) -> Result<Option<R>> {
        Ok(self.load::<R>()?.records.remove(id))
    }

    pub fn read_marker(&self, collection: Collection, name: &str) -> Result<Option<String>> {
        let markers = match collection {
            Collection::Filings => self.load::<crate::entities::Filing>()?.markers,
            Collection::Transactions => self.load::<crate::entities::Transaction>()?.markers,
        };
        Ok(markers.get(name).cloned())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    pub fn upsert<R: Record>(&self, record: &R) -> Result<()> {
        self.upsert_many(std::slice::from_ref(record))
    }

    pub fn upsert_many<R: Record>(&self, records: &[R]) -> Result<()> {
        for record in records {
            check_record(record)?;
        }
        self.modify::<R, _, _>(|file| {
            for record in records {
                file.records.insert(record.record_id(), record.clone());
            }
            Ok(())
        })
    }

    /// Remove a record; returns whether it existed
    pub fn delete<R: Record>(&self, id: &str) -> Result<bool> {
        self.modify::<R, _, _>(|file| Ok(file.records.remove(id).is_some()))
    }

    /// Read-modify-write of one record under the collection lock
    ///
    /// # Returns
    /// * `Ok(Some((before, after)))` - `apply` accepted the record and it was persisted
    /// * `Ok(None)` - no record with this id
    /// * `Err(..)` - `apply` refused the change or the write failed; nothing is persisted
    pub fn update<R, F>(&self, id: &str, apply: F) -> Result<Option<(R, R)>>
    where
        R: Record,
        F: FnOnce(&R) -> Result<R>,
    {
        self.modify::<R, _, _>(|file| {
            let Some(before) = file.records.get(id).cloned() else {
                return Ok(None);
            };
            let after = apply(&before)?;
            check_record(&after)?;
            file.records.insert(after.record_id(), after.clone());
            Ok(Some((before, after)))
        })
    }

    /// Replace every record matching `belongs` with `records`, in one write
    pub fn replace_group<R, F>(&self, belongs: F, records: &[R]) -> Result<usize>
    where
        R: Record,
        F: Fn(&R) -> bool,
    {
        for record in records {
            check_record(record)?;
        }
        self.modify::<R, _, _>(|file| {
            let before = file.records.len();
            file.records.retain(|_, record| !belongs(record));
            let removed = before - file.records.len();
            for record in records {
                file.records.insert(record.record_id(), record.clone());
            }
            Ok(removed)
        })
    }

    pub fn write_marker(&self, collection: Collection, name: &str, value: &str) -> Result<()> {
        match collection {
            Collection::Filings => self.modify::<crate::entities::Filing, _, _>(|file| {
                file.markers.insert(name.to_string(), value.to_string());
                Ok(())
            }),
            Collection::Transactions => {
                self.modify::<crate::entities::Transaction, _, _>(|file| {
                    file.markers.insert(name.to_string(), value.to_string());
                    Ok(())
                })
            }
        }
    }

    /// Load, mutate and atomically persist one collection under its write lock
    fn modify<R, T, F>(&self, mutate: F) -> Result<T>
    where
        R: Record,
        F: FnOnce(&mut CollectionFile<R>) -> Result<T>,
    {
        let _guard = self.lock(R::COLLECTION)?;
        let mut file = self.load::<R>()?;
        let out = mutate(&mut file)?;
        file.last_updated = Some(Utc::now());

        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path_of(R::COLLECTION), &bytes)?;
        debug!(
            collection = R::COLLECTION.name(),
            records = file.records.len(),
            "collection persisted"
        );
        Ok(out)
    }

    // ========================================================================
    // WRITE LOCK
    // ========================================================================

    fn lock(&self, collection: Collection) -> Result<WriteGuard<'_>> {
        {
            let mut in_flight = self.in_flight.lock().map_err(|_| MonitorError::StoreLocked {
                collection: collection.name().to_string(),
            })?;
            if !in_flight.insert(collection) {
                return Err(MonitorError::StoreLocked {
                    collection: collection.name().to_string(),
                });
            }
        }

        let lock_path = self.lock_path(collection);
        match create_lock_file(&lock_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists && lock_is_stale(&lock_path, STALE_LOCK_AFTER) => {
                warn!(
                    collection = collection.name(),
                    path = %lock_path.display(),
                    "breaking stale store lock"
                );
                let retried = fs::remove_file(&lock_path).and_then(|_| create_lock_file(&lock_path));
                if let Err(e) = retried {
                    self.release(collection);
                    return Err(lock_error(collection, e));
                }
            }
            Err(e) => {
                self.release(collection);
                return Err(lock_error(collection, e));
            }
        }

        Ok(WriteGuard {
            store: self,
            collection,
            lock_path,
        })
    }

    /// Hold the run lock until the returned guard drops
    ///
    /// Fails with `StoreLocked` while another run, in this process or another,
    /// holds it. A lock older than six hours is broken with a warning.
    pub fn lock_run(&self) -> Result<RunLock> {
        let path = self.root.join(RUN_LOCK_FILE);
        match create_lock_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists && lock_is_stale(&path, STALE_RUN_LOCK_AFTER) => {
                warn!(path = %path.display(), "breaking stale run lock");
                fs::remove_file(&path)
                    .and_then(|_| create_lock_file(&path))
                    .map_err(run_lock_error)?;
            }
            Err(e) => return Err(run_lock_error(e)),
        }
        debug!(path = %path.display(), "run lock acquired");
        Ok(RunLock { path })
    }

    fn release(&self, collection: Collection) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&collection);
        }
    }
}

/// Held for one pipeline run; removes the lock file on drop
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to remove run lock: {}", e);
        }
    }
}

struct WriteGuard<'a> {
    store: &'a RecordStore,
    collection: Collection,
    lock_path: PathBuf,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!(path = %self.lock_path.display(), "failed to remove store lock: {}", e);
        }
        self.store.release(self.collection);
    }
}

fn check_record<R: Record>(record: &R) -> Result<()> {
    record.validate().map_err(|reason| MonitorError::Validation {
        collection: R::COLLECTION.name().to_string(),
        id: record.record_id(),
        reason,
    })
}

fn lock_error(collection: Collection, e: std::io::Error) -> MonitorError {
    if e.kind() == ErrorKind::AlreadyExists {
        MonitorError::StoreLocked {
            collection: collection.name().to_string(),
        }
    } else {
        MonitorError::Io(e)
    }
}

fn run_lock_error(e: std::io::Error) -> MonitorError {
    if e.kind() == ErrorKind::AlreadyExists {
        MonitorError::StoreLocked {
            collection: "pipeline run".to_string(),
        }
    } else {
        MonitorError::Io(e)
    }
}

fn create_lock_file(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339())?;
    Ok(())
}

fn lock_is_stale(path: &Path, after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > after)
        .unwrap_or(false)
}

/// Write-to-temp then rename; the temp file is removed on any failure
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        MonitorError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        ))
    })?;
    let tmp = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|s| s.to_str()).unwrap_or("collection"),
        uuid::Uuid::new_v4()
    ));

    let written = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
