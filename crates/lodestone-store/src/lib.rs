//! # lodestone-store: the persistence sink
//!
//! Each replica writes every file mutation through to a sink keyed by
//! `(filename, replica_id)`, one JSON blob per file per replica. The sink
//! exists for post-restart inspection; reads are never served from it and
//! the recovery path is out of scope.
//!
//! Two implementations: [`DirSink`] writes blobs under a root directory
//! (`{filename}_{replica}.json`), [`MemorySink`] keeps them in a map for
//! tests.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lodestone_types::{File, FileVersion, ReplicaId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Record Schema
// ============================================================================

/// The persisted shape of one file on one replica.
///
/// Leases are deliberately absent: they are local, time-bounded state and
/// meaningless after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub owner_server_id: ReplicaId,
    pub versions: Vec<FileVersion>,
}

impl FileRecord {
    /// Snapshots a live file for persistence.
    pub fn snapshot(file: &File) -> Self {
        Self {
            filename: file.filename.clone(),
            owner_server_id: file.owner,
            versions: file.versions.clone(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Sink failures. Policy-wise these are logged by the caller and never
/// block the in-memory state change.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// Sink Contract
// ============================================================================

/// Where file records go when they change.
///
/// Implementations must be at least crash-safe at write granularity; no
/// fsync barrier is required.
pub trait FileSink: Send + Sync {
    /// Writes (or overwrites) the record for `(record.filename, replica)`.
    fn persist(&self, record: &FileRecord, replica: ReplicaId) -> Result<(), StoreError>;

    /// Removes the record for `(filename, replica)`. Removing a record
    /// that was never persisted is not an error.
    fn remove(&self, filename: &str, replica: ReplicaId) -> Result<(), StoreError>;

    /// Reads a record back, if present. Inspection only.
    fn load(&self, filename: &str, replica: ReplicaId) -> Result<Option<FileRecord>, StoreError>;
}

// ============================================================================
// Directory Sink
// ============================================================================

/// One JSON blob per `(filename, replica)` under a root directory.
#[derive(Debug)]
pub struct DirSink {
    root: PathBuf,
}

impl DirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, filename: &str, replica: ReplicaId) -> PathBuf {
        self.root.join(format!("{filename}_{replica}.json"))
    }
}

impl FileSink for DirSink {
    fn persist(&self, record: &FileRecord, replica: ReplicaId) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        let path = self.blob_path(&record.filename, replica);
        let json = serde_json::to_vec(record)?;
        fs::write(&path, json)?;
        tracing::debug!(
            filename = %record.filename,
            replica = %replica,
            path = %path.display(),
            "file record persisted"
        );
        Ok(())
    }

    fn remove(&self, filename: &str, replica: ReplicaId) -> Result<(), StoreError> {
        let path = self.blob_path(filename, replica);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(
                    filename = %filename,
                    replica = %replica,
                    "file record removed"
                );
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn load(&self, filename: &str, replica: ReplicaId) -> Result<Option<FileRecord>, StoreError> {
        let path = self.blob_path(filename, replica);
        let json = match fs::read(&path) {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&json)?))
    }
}

// ============================================================================
// Memory Sink
// ============================================================================

/// In-memory sink for tests. Data is lost on drop, which is the point.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<HashMap<(String, ReplicaId), FileRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held. Test helper.
    pub fn len(&self) -> usize {
        self.records.lock().expect("sink mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileSink for MemorySink {
    fn persist(&self, record: &FileRecord, replica: ReplicaId) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("sink mutex poisoned");
        records.insert((record.filename.clone(), replica), record.clone());
        Ok(())
    }

    fn remove(&self, filename: &str, replica: ReplicaId) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("sink mutex poisoned");
        records.remove(&(filename.to_owned(), replica));
        Ok(())
    }

    fn load(&self, filename: &str, replica: ReplicaId) -> Result<Option<FileRecord>, StoreError> {
        let records = self.records.lock().expect("sink mutex poisoned");
        Ok(records.get(&(filename.to_owned(), replica)).cloned())
    }
}

// ============================================================================
// Tests
// ============================================================================
