//! Snapshot port toward persistence
//!
//! [`MeterRegistry::export`] and [`MeterRegistry::restore`] convert between
//! live meter state and [`SnapshotEntry`]s. A [`SnapshotStore`] persists
//! those entries; its format is up to the implementation.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::registry::MeterRegistry;

/// Persisted state of one meter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Meter name
    pub name: String,
    /// Tick count
    pub ticks: u64,
    /// Timestamp of the last accepted edge
    pub timestamp: DateTime<Utc>,
}

impl SnapshotEntry {
    /// Zero-valued entry for a meter
    pub fn zero(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ticks: 0,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Backing store for snapshots
pub trait SnapshotStore: Send + Sync {
    /// Load the stored entries. A store that does not exist yet is created
    /// with a zero-valued entry for each of `names`.
    fn load(&self, names: &[String]) -> Result<Vec<SnapshotEntry>, PersistenceError>;

    /// Replace the stored entries
    fn save(&self, entries: &[SnapshotEntry]) -> Result<(), PersistenceError>;
}

impl MeterRegistry {
    /// Copy the state of every meter, in name order.
    ///
    /// Each meter is read-locked on its own; no two locks are held at once.
    pub fn export(&self) -> Vec<SnapshotEntry> {
        self.iter()
            .map(|meter| {
                let state = meter.state();
                SnapshotEntry {
                    name: meter.name().to_string(),
                    ticks: state.ticks,
                    timestamp: state.last_edge,
                }
            })
            .collect()
    }

    /// Apply entries to matching meters. Unknown names are logged and
    /// skipped; meters without an entry keep their state.
    ///
    /// Returns the number of meters restored.
    pub fn restore(&self, entries: &[SnapshotEntry]) -> usize {
        let mut restored = 0;
        for entry in entries {
            match self.get(&entry.name) {
                Some(meter) => {
                    meter.restore(entry.ticks, entry.timestamp);
                    restored += 1;
                }
                None => log::warn!("snapshot entry for unknown meter {} ignored", entry.name),
            }
        }
        restored
    }

    /// Load a snapshot from `store` and restore it.
    ///
    /// A failed load is logged and leaves every meter at zero.
    pub fn restore_from(&self, store: &dyn SnapshotStore) -> usize {
        match store.load(&self.names()) {
            Ok(entries) => {
                let restored = self.restore(&entries);
                log::info!("restored {} of {} meters from snapshot", restored, self.len());
                restored
            }
            Err(e) => {
                log::warn!("snapshot load failed, starting from zero: {}", e);
                0
            }
        }
    }

    /// Export and save to `store`
    pub fn save_to(&self, store: &dyn SnapshotStore) -> Result<(), PersistenceError> {
        store.save(&self.export())
    }
}

/// In-memory snapshot store
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<Option<Vec<SnapshotEntry>>>,
}

impl MemorySnapshotStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `entries`
    pub fn with_entries(entries: Vec<SnapshotEntry>) -> Self {
        Self {
            entries: Mutex::new(Some(entries)),
        }
    }

    /// Last saved entries, if any
    pub fn entries(&self) -> Option<Vec<SnapshotEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, names: &[String]) -> Result<Vec<SnapshotEntry>, PersistenceError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entries =
            entries.get_or_insert_with(|| names.iter().map(SnapshotEntry::zero).collect());
        Ok(entries.clone())
    }

    fn save(&self, entries: &[SnapshotEntry]) -> Result<(), PersistenceError> {
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = Some(entries.to_vec());
        Ok(())
    }
}
