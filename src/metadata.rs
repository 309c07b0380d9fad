//! Conversion records for change detection.
//!
//! # Design
//!
//! One JSON document holds every record, keyed by the source's absolute
//! path:
//!
//! ```json
//! { "version": 1, "records": { "/docs/report.pdf": { "path": "...", "content_hash": "...", ... } } }
//! ```
//!
//! The file is read once when the store is opened and held in memory.
//! Lookups take a shared read lock, so concurrent workers never wait on
//! each other to decide skip-vs-convert. Updates go through a single async
//! writer lock: the writer copies the map, flushes the copy, and only then
//! swaps it in. Memory never runs ahead of disk, and the file always
//! reflects a prefix of the update sequence.
//!
//! ## Crash safety
//!
//! Every flush writes a sibling temp file, fsyncs it and renames it over
//! the store. A crash mid-write leaves the previous complete file behind.
//!
//! ## Corruption
//!
//! A file that fails to parse, or carries a different `version`, is logged
//! and replaced by an empty store on the next flush. Losing the records
//! only costs re-conversion; refusing to run would cost the whole batch.

use crate::error::ConversionError;
use crate::source::SourceDocument;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Bump to invalidate every existing store when the record format changes.
pub const STORE_VERSION: u32 = 1;

/// What the store knows about one converted source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub path: PathBuf,
    pub content_hash: String,
    pub converted_at: DateTime<Utc>,
    pub output_path: PathBuf,
    pub model: String,
}

impl ConversionRecord {
    pub fn new(source: &SourceDocument, output_path: PathBuf, model: impl Into<String>) -> Self {
        Self {
            path: source.path.clone(),
            content_hash: source.content_hash.clone(),
            converted_at: Utc::now(),
            output_path,
            model: model.into(),
        }
    }
}

/// Change-detection state of a source, for the `status` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Never converted.
    New,
    /// Converted and unchanged since.
    UpToDate,
    /// Converted, but the content hash differs now.
    Changed,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    records: BTreeMap<String, ConversionRecord>,
}

/// Persistent map of source path → [`ConversionRecord`].
pub struct MetadataStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, ConversionRecord>>,
    writer: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("path", &self.path)
            .field("records", &self.len())
            .finish()
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl MetadataStore {
    /// Load the store at `path`. Missing, unreadable or corrupt files yield
    /// an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<StoreFile>(&content) {
                Ok(file) if file.version == STORE_VERSION => {
                    debug!("Loaded {} record(s) from {}", file.records.len(), path.display());
                    file.records
                }
                Ok(file) => {
                    warn!(
                        "Metadata store {} has version {} (expected {}); starting empty",
                        path.display(),
                        file.version,
                        STORE_VERSION
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!(
                        "Metadata store {} is corrupt ({}); starting empty",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(
                    "Cannot read metadata store {} ({}); starting empty",
                    path.display(),
                    e
                );
                BTreeMap::new()
            }
        };

        Self {
            path,
            records: RwLock::new(records),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lookup(&self, path: &Path) -> Option<ConversionRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key(path))
            .cloned()
    }

    /// All records, ordered by source path.
    pub fn records(&self) -> Vec<ConversionRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Insert or replace the record for `record.path`, then flush.
    ///
    /// The in-memory map only changes once the flush succeeded.
    pub async fn upsert(&self, record: ConversionRecord) -> Result<(), ConversionError> {
        let _writer = self.writer.lock().await;
        let mut next = self.snapshot();
        next.insert(key(&record.path), record);
        self.commit(next).await
    }

    /// Drop records whose source no longer exists, and, when
    /// `older_than_days` is set, records converted longer ago than that.
    ///
    /// Returns the number of records removed.
    pub async fn clean(&self, older_than_days: Option<u32>) -> Result<usize, ConversionError> {
        let _writer = self.writer.lock().await;
        let cutoff = older_than_days.map(|d| Utc::now() - ChronoDuration::days(i64::from(d)));

        let mut next = self.snapshot();
        let before = next.len();
        next.retain(|_, r| {
            let stale = cutoff.is_some_and(|c| r.converted_at < c);
            r.path.exists() && !stale
        });
        let removed = before - next.len();

        if removed > 0 {
            self.commit(next).await?;
            info!("Removed {} record(s) from {}", removed, self.path.display());
        }
        Ok(removed)
    }

    /// Classify `source` against its stored record.
    pub fn status(&self, source: &SourceDocument) -> RecordStatus {
        match self.lookup(&source.path) {
            None => RecordStatus::New,
            Some(r) if r.content_hash == source.content_hash => RecordStatus::UpToDate,
            Some(_) => RecordStatus::Changed,
        }
    }

    fn snapshot(&self) -> BTreeMap<String, ConversionRecord> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Flush `next`, then publish it. Callers hold the writer lock.
    async fn commit(&self, next: BTreeMap<String, ConversionRecord>) -> Result<(), ConversionError> {
        let bytes = self.serialise(&next)?;
        self.flush(bytes).await?;
        *self.records.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(())
    }

    fn serialise(&self, records: &BTreeMap<String, ConversionRecord>) -> Result<Vec<u8>, ConversionError> {
        #[derive(Serialize)]
        struct StoreRef<'a> {
            version: u32,
            records: &'a BTreeMap<String, ConversionRecord>,
        }
        serde_json::to_vec_pretty(&StoreRef {
            version: STORE_VERSION,
            records,
        })
        .map_err(|e| self.error(e))
    }

    async fn flush(&self, bytes: Vec<u8>) -> Result<(), ConversionError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| self.error(format!("flush task panicked: {e}")))?
            .map_err(|e| self.error(e))
    }

    fn error(&self, detail: impl std::fmt::Display) -> ConversionError {
        ConversionError::MetadataStore {
            path: self.path.clone(),
            detail: detail.to_string(),
        }
    }
}

/// The change-detection policy: skip iff a record exists and its stored
/// hash equals the freshly computed one.
pub fn should_skip(source: &SourceDocument, record: Option<&ConversionRecord>) -> bool {
    record.is_some_and(|r| r.content_hash == source.content_hash)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
