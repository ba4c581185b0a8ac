//! In-memory collection of [ReachRecord]s with memoized aggregate results
//! and a versioned, self-describing file representation.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ReachError, ReachRecord, StudyResults};

/// Bumped whenever the serialized schema changes; older files are rejected
/// rather than reinterpreted.
const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct DatabaseFile {
    version: u32,
    records: Vec<ReachRecord>,
}

/// Ordered mapping from record id to [ReachRecord], owning the records of a
/// study.
///
/// Aggregate [StudyResults] are computed lazily and cached; [ReachDatabase::update]
/// is the only record mutator and invalidates the cache.
#[derive(Debug, Default)]
pub struct ReachDatabase {
    records: BTreeMap<String, ReachRecord>,
    results: Mutex<Option<StudyResults>>,
}

impl ReachDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under its own id, replacing any previous entry.
    pub fn insert(&mut self, record: ReachRecord) {
        *self.results.lock() = None;
        self.records.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<&ReachRecord> {
        self.records.get(id)
    }

    /// Replace an existing record. The sole mutator besides [ReachDatabase::insert];
    /// invalidates the cached results.
    pub fn update(&mut self, record: ReachRecord) -> Result<(), ReachError> {
        if !self.records.contains_key(&record.id) {
            return Err(ReachError::UnknownRecord(record.id));
        }
        *self.results.lock() = None;
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over the records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ReachRecord> {
        self.records.values()
    }

    /// The id-ordered record map, e.g. for taking a step snapshot.
    pub fn records(&self) -> &BTreeMap<String, ReachRecord> {
        &self.records
    }

    /// Aggregate statistics over all records. Memoized; recomputed on demand
    /// after a mutation.
    pub fn results(&self) -> StudyResults {
        let mut cache = self.results.lock();
        *cache.get_or_insert_with(|| StudyResults::from_records(self.records.values()))
    }

    /// Serialize to `path`, atomically: the document is written to a sibling
    /// temporary file first and then renamed over the destination.
    pub fn save(&self, path: &Path) -> Result<(), ReachError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| ReachError::Config(format!("'{}' is not a file path", path.display())))?;
        let tmp = path.with_file_name(format!("{}.tmp", file_name.to_string_lossy()));

        let document = DatabaseFile {
            version: SCHEMA_VERSION,
            records: self.records.values().cloned().collect(),
        };
        let writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(writer, &document)
            .map_err(|err| ReachError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?;
        fs::rename(&tmp, path)?;

        debug!(records = self.records.len(), path = %path.display(), "saved reach database");
        Ok(())
    }

    /// Deserialize from `path`. Decode failures and schema mismatches are
    /// reported as [ReachError::CorruptDatabase].
    pub fn load(path: &Path) -> Result<Self, ReachError> {
        let reader = BufReader::new(File::open(path)?);
        let document: DatabaseFile =
            serde_json::from_reader(reader).map_err(|err| ReachError::CorruptDatabase(err.to_string()))?;

        if document.version != SCHEMA_VERSION {
            return Err(ReachError::CorruptDatabase(format!(
                "schema version {} (expected {})",
                document.version, SCHEMA_VERSION
            )));
        }

        let records: BTreeMap<String, ReachRecord> = document
            .records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        debug!(records = records.len(), path = %path.display(), "loaded reach database");
        Ok(ReachDatabase {
            records,
            results: Mutex::new(None),
        })
    }
}
