//! Line debouncing and edge filtering
//!
//! A [`Debouncer`] turns the raw transitions reported by a [`Line`] into
//! [`LogicalEdge`]s. With a non-zero window the first raw transition
//! schedules a single evaluation after the window elapses; further raw
//! transitions inside the window are dropped. The evaluation reads the level
//! at that instant and applies the [`EdgePolicy`], so any amount of bounce
//! inside one window yields at most one edge.
//!
//! Evaluations run on tokio tasks. The raw transition callback only
//! schedules and returns, so a slow window never throttles other lines.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::HardwareError;
use crate::line::{EdgePolicy, Level, Line, LineId};

/// A debounced edge accepted by the edge policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalEdge {
    /// Line the edge occurred on
    pub line: LineId,
    /// Level the line settled at
    pub level: Level,
    /// Time of the evaluation
    pub timestamp: DateTime<Utc>,
}

/// Consumer of logical edges
pub trait EdgeSink: Send + Sync {
    /// Handle one logical edge
    fn on_logical_edge(&self, edge: LogicalEdge);
}

/// Per-line debounce state
#[derive(Debug)]
struct LineDebounceState {
    policy: EdgePolicy,
    window: Duration,
    stable_level: Level,
    pending: Option<JoinHandle<()>>,
    closed: bool,
}

/// Debounce state machine for one hardware line
pub struct Debouncer {
    line: Arc<dyn Line>,
    sink: Arc<dyn EdgeSink>,
    runtime: Handle,
    state: Mutex<LineDebounceState>,
    // Held from the `closed` check until the sink returns
    dispatch: Mutex<()>,
}

impl Debouncer {
    /// Create a debouncer for `line`, seeding the stable level from the
    /// line's current level. Must be called from within a tokio runtime.
    pub fn new(
        line: Arc<dyn Line>,
        policy: EdgePolicy,
        window: Duration,
        sink: Arc<dyn EdgeSink>,
    ) -> Result<Arc<Self>, HardwareError> {
        let runtime = Handle::try_current()
            .map_err(|e| HardwareError::Unsupported(format!("no tokio runtime: {}", e)))?;
        let stable_level = line.read_level()?;

        Ok(Arc::new(Self {
            line,
            sink,
            runtime,
            state: Mutex::new(LineDebounceState {
                policy,
                window,
                stable_level,
                pending: None,
                closed: false,
            }),
            dispatch: Mutex::new(()),
        }))
    }

    /// Register this debouncer as the line's raw transition handler
    pub fn attach(self: &Arc<Self>) -> Result<(), HardwareError> {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.line.watch(Arc::new(move |timestamp: DateTime<Utc>| {
            if let Some(debouncer) = weak.upgrade() {
                debouncer.on_raw_transition(timestamp);
            }
        }))
    }

    /// Stop receiving raw transitions from the line
    pub fn detach(&self) {
        self.line.unwatch();
    }

    /// Line this debouncer filters
    pub fn line_id(&self) -> LineId {
        self.line.id()
    }

    /// Current edge policy
    pub fn policy(&self) -> EdgePolicy {
        self.lock().policy
    }

    /// Change the edge policy; applies from the next evaluation on
    pub fn set_policy(&self, policy: EdgePolicy) {
        self.lock().policy = policy;
    }

    /// Current debounce window
    pub fn window(&self) -> Duration {
        self.lock().window
    }

    /// Change the debounce window; a pending evaluation keeps its schedule
    pub fn set_window(&self, window: Duration) {
        self.lock().window = window;
    }

    /// Level recorded by the last evaluation
    pub fn stable_level(&self) -> Level {
        self.lock().stable_level
    }

    /// Check if an evaluation is scheduled
    pub fn is_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Handle a raw transition observed at `timestamp`.
    pub fn on_raw_transition(self: &Arc<Self>, timestamp: DateTime<Utc>) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        if state.pending.is_some() {
            log::trace!("line {}: transition inside debounce window dropped", self.line.id());
            return;
        }

        if state.window.is_zero() {
            drop(state);
            self.evaluate(timestamp, false);
            return;
        }

        let window = state.window;
        let evaluated_at = TimeDelta::from_std(window)
            .ok()
            .and_then(|delta| timestamp.checked_add_signed(delta))
            .unwrap_or(timestamp);
        let weak = Arc::downgrade(self);

        // The task cannot observe the state before `pending` is stored: it
        // needs this lock to evaluate.
        state.pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(debouncer) = weak.upgrade() {
                debouncer.evaluate(evaluated_at, true);
            }
        }));
    }

    /// Stop evaluating: drop further transitions and abort a pending
    /// evaluation. Detach from the line first so no new transition arrives.
    ///
    /// Returns once an edge already being dispatched has reached the sink,
    /// so a snapshot taken afterwards includes it.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
        }
        drop(self.dispatch.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Evaluate the settled level. Only the scheduled task clears the
    /// pending marker.
    fn evaluate(&self, timestamp: DateTime<Utc>, scheduled: bool) {
        let _dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
        let edge = {
            let mut state = self.lock();
            if scheduled {
                state.pending = None;
            }
            if state.closed {
                return;
            }

            let level = match self.line.read_level() {
                Ok(level) => level,
                Err(e) => {
                    log::warn!("line {}: level read failed: {}", self.line.id(), e);
                    return;
                }
            };

            let accepted = state.policy.accepts(state.stable_level, level);
            state.stable_level = level;

            if !accepted {
                log::trace!("line {}: settled {:?}, not an edge", self.line.id(), level);
                return;
            }
            LogicalEdge {
                line: self.line.id(),
                level,
                timestamp,
            }
        };

        log::debug!("line {}: logical edge {:?}", edge.line, edge.level);
        self.sink.on_logical_edge(edge);
    }

    fn lock(&self) -> MutexGuard<'_, LineDebounceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("line", &self.line.id())
            .field("state", &*self.lock())
            .finish()
    }
}
