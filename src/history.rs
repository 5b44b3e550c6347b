//! Bounded record of already-relayed item ids.
//!
//! [`History`] is a FIFO set: a `VecDeque` keeps insertion order for eviction
//! and a `HashSet` answers `seen` in constant time. Both always hold the same
//! ids.
//!
//! On disk it is a small JSON document. Saves are atomic (temp file, fsync,
//! rename) so a crash or shutdown mid-write never leaves a torn file behind.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::HistoryError;

const HISTORY_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    /// Oldest first.
    ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct History {
    capacity: usize,
    order: VecDeque<String>,
    index: HashSet<String>,
}

impl History {
    /// An empty history. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            index: HashSet::with_capacity(capacity),
        }
    }

    pub fn seen(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Remember `id`. Recording an id that is already present does nothing;
    /// otherwise the oldest entry is evicted once capacity is exceeded.
    pub fn record(&mut self, id: &str) {
        if self.index.contains(id) {
            return;
        }
        self.order.push_back(id.to_string());
        self.index.insert(id.to_string());

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.index.remove(&evicted);
                debug!(id = %evicted, "Evicted oldest history entry");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ids in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Read a persisted history without any recovery.
    ///
    /// A missing file is an empty history. If the file holds more ids than
    /// `capacity`, only the newest `capacity` are kept.
    pub fn try_load(path: &Path, capacity: usize) -> Result<Self, HistoryError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new(capacity)),
            Err(e) => {
                return Err(HistoryError::Corruption {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        let file: HistoryFile =
            serde_json::from_str(&raw).map_err(|e| HistoryError::Corruption {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if file.version != HISTORY_VERSION {
            return Err(HistoryError::Corruption {
                path: path.to_path_buf(),
                reason: format!("unsupported version {}", file.version),
            });
        }

        let mut history = Self::new(capacity);
        for id in &file.ids {
            history.record(id);
        }
        Ok(history)
    }

    /// Load a persisted history, resetting to empty if the file is corrupt.
    pub fn load(path: &Path, capacity: usize) -> Self {
        match Self::try_load(path, capacity) {
            Ok(history) => {
                info!(path = %path.display(), entries = history.len(), capacity, "Loaded history");
                history
            }
            Err(e) => {
                error!(error = %e, "History unreadable, starting with an empty history");
                Self::new(capacity)
            }
        }
    }

    /// Persist atomically, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        let file = HistoryFile {
            version: HISTORY_VERSION,
            ids: self.iter().map(str::to_owned).collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let write_err = |source| HistoryError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let temp_path = path.with_extension("tmp");
        let cleanup_and_err = |e| {
            let _ = fs::remove_file(&temp_path);
            write_err(e)
        };

        let mut temp = fs::File::create(&temp_path).map_err(write_err)?;
        temp.write_all(json.as_bytes()).map_err(cleanup_and_err)?;
        temp.sync_all().map_err(cleanup_and_err)?;
        drop(temp);
        fs::rename(&temp_path, path).map_err(cleanup_and_err)?;

        debug!(path = %path.display(), entries = self.len(), "Saved history");
        Ok(())
    }
}
