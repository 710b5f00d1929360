// s0counter - S0 pulse counter daemon
// Copyright (c) 2025 The s0counter developers
//
// Licensed under AGPL-3.0.
// See https://www.gnu.org/licenses/agpl-3.0.html for details.

//! YAML snapshot file
//!
//! The file maps each meter name to its tick count and the timestamp of its
//! last pulse:
//!
//! ```yaml
//! power:
//!   ticks: 123456
//!   timestamp: 2025-03-01T12:00:00Z
//! ```
//!
//! A `counter` field written by older versions is ignored.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use s0counter::{PersistenceError, SnapshotEntry, SnapshotStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct StoredMeter {
    ticks: u64,
    timestamp: DateTime<Utc>,
}

/// Snapshot store backed by a YAML file
#[derive(Debug, Clone)]
pub struct YamlFileStore {
    path: PathBuf,
}

impl YamlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, e: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}

impl SnapshotStore for YamlFileStore {
    fn load(&self, names: &[String]) -> Result<Vec<SnapshotEntry>, PersistenceError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "creating snapshot file");
            let zero: Vec<SnapshotEntry> = names.iter().map(SnapshotEntry::zero).collect();
            self.save(&zero)?;
        }

        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let stored: BTreeMap<String, StoredMeter> = serde_yaml::from_str(&content)
            .map_err(|e| PersistenceError::Format(format!("{}: {}", self.path.display(), e)))?;

        Ok(stored
            .into_iter()
            .map(|(name, meter)| SnapshotEntry {
                name,
                ticks: meter.ticks,
                timestamp: meter.timestamp,
            })
            .collect())
    }

    fn save(&self, entries: &[SnapshotEntry]) -> Result<(), PersistenceError> {
        let stored: BTreeMap<&str, StoredMeter> = entries
            .iter()
            .map(|e| {
                (
                    e.name.as_str(),
                    StoredMeter {
                        ticks: e.ticks,
                        timestamp: e.timestamp,
                    },
                )
            })
            .collect();
        let content =
            serde_yaml::to_string(&stored).map_err(|e| PersistenceError::Format(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        // Replace atomically so a crash never leaves a truncated file
        let temp = self.temp_path();
        fs::write(&temp, content).map_err(|e| self.io_error(e))?;
        fs::rename(&temp, &self.path).map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), meters = entries.len(), "snapshot saved");
        Ok(())
    }
}
