//! In-memory line backend
//!
//! Used by tests and by the daemon's `--emulate` mode. Lines start high,
//! the idle state of a pulled-up S0 input.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use super::{Level, Line, LineId, LineProvider, RawTransitionHandler};
use crate::error::HardwareError;

/// An emulated line whose level is set by the caller
pub struct EmulatedLine {
    id: LineId,
    level: Mutex<Level>,
    handler: Mutex<Option<RawTransitionHandler>>,
}

impl EmulatedLine {
    /// Create a line with the given initial level
    pub fn new(id: LineId, level: Level) -> Self {
        Self {
            id,
            level: Mutex::new(level),
            handler: Mutex::new(None),
        }
    }

    /// Set the level without notifying the watcher
    pub fn set_level(&self, level: Level) {
        *self.level.lock().unwrap_or_else(PoisonError::into_inner) = level;
    }

    /// Set the level and report a raw transition observed now
    pub fn inject(&self, level: Level) {
        self.inject_at(level, Utc::now());
    }

    /// Set the level and report a raw transition observed at `timestamp`.
    ///
    /// The handler runs on the calling thread, like an interrupt callback.
    pub fn inject_at(&self, level: Level, timestamp: DateTime<Utc>) {
        self.set_level(level);
        let handler = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = handler.as_ref() {
            handler(timestamp);
        }
    }

    /// Check if a handler is registered
    pub fn is_watched(&self) -> bool {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Line for EmulatedLine {
    fn id(&self) -> LineId {
        self.id
    }

    fn read_level(&self) -> Result<Level, HardwareError> {
        Ok(*self.level.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn watch(&self, handler: RawTransitionHandler) -> Result<(), HardwareError> {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
        Ok(())
    }

    fn unwatch(&self) {
        // Blocks until an in-flight handler call has returned.
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl std::fmt::Debug for EmulatedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedLine")
            .field("id", &self.id)
            .field("watched", &self.is_watched())
            .finish()
    }
}

/// Emulated GPIO chip handing out [`EmulatedLine`]s
#[derive(Default)]
pub struct EmulatedChip {
    lines: Mutex<HashMap<LineId, Arc<EmulatedLine>>>,
}

impl EmulatedChip {
    /// Create an empty chip
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a requested line for injecting transitions
    pub fn line(&self, id: LineId) -> Option<Arc<EmulatedLine>> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Number of lines currently requested
    pub fn count(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl LineProvider for EmulatedChip {
    fn request_line(&self, id: LineId) -> Result<Arc<dyn Line>, HardwareError> {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.contains_key(&id) {
            return Err(HardwareError::LineInUse(id));
        }
        let line = Arc::new(EmulatedLine::new(id, Level::High));
        lines.insert(id, Arc::clone(&line));
        Ok(line)
    }

    fn release(&self, id: LineId) -> Result<(), HardwareError> {
        let line = self
            .lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or(HardwareError::LineNotOpen(id))?;
        line.unwatch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_request_line_exclusive() {
        let chip = EmulatedChip::new();
        chip.request_line(17).unwrap();
        let result = chip.request_line(17);
        assert!(matches!(result, Err(HardwareError::LineInUse(17))));
        assert_eq!(chip.count(), 1);
    }

    #[test]
    fn test_release_allows_new_request() {
        let chip = EmulatedChip::new();
        chip.request_line(4).unwrap();
        chip.release(4).unwrap();
        assert!(chip.request_line(4).is_ok());
        assert!(matches!(
            chip.release(5),
            Err(HardwareError::LineNotOpen(5))
        ));
    }

    #[test]
    fn test_inject_updates_level_and_notifies() {
        let chip = EmulatedChip::new();
        let line = chip.request_line(22).unwrap();
        assert_eq!(line.read_level().unwrap(), Level::High);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        line.watch(Arc::new(move |_: DateTime<Utc>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        let emulated = chip.line(22).unwrap();
        emulated.inject(Level::Low);
        assert_eq!(line.read_level().unwrap(), Level::Low);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        line.unwatch();
        emulated.inject(Level::High);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!emulated.is_watched());
    }
}
