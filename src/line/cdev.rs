//! Linux GPIO character device backend (`gpio` feature)

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures::future::poll_fn;
use futures::Stream;
use gpio_cdev::{
    AsyncLineEventHandle, Chip, EventRequestFlags, LineEventHandle, LineRequestFlags,
};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{Level, Line, LineId, LineProvider, RawTransitionHandler};
use crate::error::HardwareError;

const CONSUMER: &str = "s0counter";

/// A GPIO chip opened through `/dev/gpiochipN`
pub struct CdevChip {
    path: String,
    chip: Mutex<Chip>,
    requested: Mutex<HashSet<LineId>>,
    runtime: Handle,
}

impl CdevChip {
    /// Open the chip device. Must be called from within a tokio runtime.
    pub fn open(path: impl Into<String>) -> Result<Self, HardwareError> {
        let path = path.into();
        let chip = Chip::new(&path)
            .map_err(|e| HardwareError::DriverUnavailable(format!("{}: {}", path, e)))?;
        let runtime = Handle::try_current()
            .map_err(|e| HardwareError::DriverUnavailable(e.to_string()))?;
        Ok(Self {
            path,
            chip: Mutex::new(chip),
            requested: Mutex::new(HashSet::new()),
            runtime,
        })
    }
}

impl LineProvider for CdevChip {
    fn request_line(&self, id: LineId) -> Result<Arc<dyn Line>, HardwareError> {
        let mut requested = self.requested.lock().unwrap_or_else(PoisonError::into_inner);
        if requested.contains(&id) {
            return Err(HardwareError::LineInUse(id));
        }

        let line = self
            .chip
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_line(id)
            .map_err(|e| {
                HardwareError::DriverUnavailable(format!("{} line {}: {}", self.path, id, e))
            })?;

        requested.insert(id);
        Ok(Arc::new(CdevLine {
            id,
            line,
            watch: Mutex::new(None),
            runtime: self.runtime.clone(),
        }))
    }

    fn release(&self, id: LineId) -> Result<(), HardwareError> {
        if self
            .requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
        {
            Ok(())
        } else {
            Err(HardwareError::LineNotOpen(id))
        }
    }
}

type SharedEvents = Arc<Mutex<AsyncLineEventHandle>>;

struct Watch {
    events: SharedEvents,
    task: JoinHandle<()>,
}

/// A line requested from a [`CdevChip`]
pub struct CdevLine {
    id: LineId,
    line: gpio_cdev::Line,
    watch: Mutex<Option<Watch>>,
    runtime: Handle,
}

impl CdevLine {
    fn read_error(&self, e: gpio_cdev::Error) -> HardwareError {
        HardwareError::Read {
            line: self.id,
            reason: e.to_string(),
        }
    }
}

impl Line for CdevLine {
    fn id(&self) -> LineId {
        self.id
    }

    fn read_level(&self) -> Result<Level, HardwareError> {
        let watch = self.watch.lock().unwrap_or_else(PoisonError::into_inner);
        let value = match watch.as_ref() {
            // The event request owns the line; read through it
            Some(watch) => {
                let events = watch.events.lock().unwrap_or_else(PoisonError::into_inner);
                let value = AsRef::<LineEventHandle>::as_ref(&*events).get_value();
                value
            }
            None => self
                .line
                .request(LineRequestFlags::INPUT, 0, CONSUMER)
                .and_then(|handle| handle.get_value()),
        }
        .map_err(|e| self.read_error(e))?;
        Ok(Level::from(value != 0))
    }

    fn watch(&self, handler: RawTransitionHandler) -> Result<(), HardwareError> {
        self.unwatch();

        let events = self
            .line
            .events(
                LineRequestFlags::INPUT,
                EventRequestFlags::BOTH_EDGES,
                CONSUMER,
            )
            .map_err(|e| {
                HardwareError::DriverUnavailable(format!("line {} events: {}", self.id, e))
            })?;
        let events = {
            let _runtime = self.runtime.enter();
            AsyncLineEventHandle::new(events).map_err(|e| {
                HardwareError::DriverUnavailable(format!("line {} async events: {}", self.id, e))
            })?
        };
        let events: SharedEvents = Arc::new(Mutex::new(events));

        let id = self.id;
        let stream = Arc::clone(&events);
        let task = self.runtime.spawn(async move {
            loop {
                // The lock is only held while polling, never across an await
                let event = poll_fn(|cx| {
                    Pin::new(&mut *stream.lock().unwrap_or_else(PoisonError::into_inner))
                        .poll_next(cx)
                })
                .await;
                let Some(event) = event else { break };
                match event {
                    Ok(_) => handler(Utc::now()),
                    Err(e) => log::warn!("line {}: event read failed: {}", id, e),
                }
            }
        });

        *self.watch.lock().unwrap_or_else(PoisonError::into_inner) = Some(Watch { events, task });
        Ok(())
    }

    fn unwatch(&self) {
        if let Some(watch) = self
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watch.task.abort();
        }
    }
}

impl Drop for CdevLine {
    fn drop(&mut self) {
        self.unwatch();
    }
}
