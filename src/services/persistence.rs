//! Player persistence seam.
//!
//! The tick only ever saves: on eviction, on autosave, and on the emergency
//! path when a tick fails. Loading and credential checks belong to the login
//! server.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::world::actor::{identity_key, Location};

/// Persisted player state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Display name.
    pub username: String,
    /// Last known position.
    pub location: Location,
    /// Ticks spent in the world this session.
    pub ticks_online: u64,
    /// When this record was produced.
    pub saved_at: DateTime<Utc>,
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Name cannot be turned into a save key.
    #[error("invalid save name: {0:?}")]
    InvalidName(String),

    /// Backend refused the write.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Where player records go.
pub trait PlayerStore: Send + Sync {
    /// Persist one record, replacing any previous one for the same identity.
    fn save(&self, record: &PlayerRecord) -> Result<(), StoreError>;
}

/// One pretty-printed JSON file per identity.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Store files under `dir` (created on first save).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Save directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a record back, if one exists.
    pub fn load(&self, username: &str) -> Result<Option<PlayerRecord>, StoreError> {
        let path = self.path_for(username)?;
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(&path)?;
        Ok(Some(serde_json::from_reader(file)?))
    }

    fn path_for(&self, username: &str) -> Result<PathBuf, StoreError> {
        let key = identity_key(username).replace(' ', "_");
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(StoreError::InvalidName(username.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl PlayerStore for JsonFileStore {
    fn save(&self, record: &PlayerRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.username)?;
        fs::create_dir_all(&self.dir)?;

        // Write-then-rename so a crash never leaves a truncated save
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, record)?;
            file.flush()?;
        }
        fs::rename(&tmp, &path)?;

        debug!("Saved {} to {}", record.username, path.display());
        Ok(())
    }
}

/// In-memory store, keyed by identity.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, PlayerRecord>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record saved for `username`.
    pub fn get(&self, username: &str) -> Option<PlayerRecord> {
        self.records.lock().get(&identity_key(username)).cloned()
    }

    /// Number of distinct identities saved.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was saved.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl PlayerStore for MemoryStore {
    fn save(&self, record: &PlayerRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .insert(identity_key(&record.username), record.clone());
        Ok(())
    }
}
