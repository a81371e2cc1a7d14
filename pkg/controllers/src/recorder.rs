use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Human-readable notification attached to a StackSet or Stack.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    /// `Kind namespace/name` of the object the event belongs to.
    pub object: String,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Records events into structured logs and an in-memory ring readable by
/// tests and the probe endpoints.
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    max_events: usize,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            max_events: 1024,
        }
    }

    pub fn normal(&self, object: &str, reason: &str, message: &str) {
        info!(object, reason, "{}", message);
        self.push(EventKind::Normal, object, reason, message);
    }

    pub fn warning(&self, object: &str, reason: &str, message: &str) {
        warn!(object, reason, "{}", message);
        self.push(EventKind::Warning, object, reason, message);
    }

    fn push(&self, kind: EventKind, object: &str, reason: &str, message: &str) {
        let mut events = self.events.lock().unwrap();
        if events.len() >= self.max_events {
            events.remove(0);
        }
        events.push(Event {
            kind,
            object: object.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps an error that was already surfaced as an event, so the same
/// failure is evented at most once as it propagates up the stages.
#[derive(Debug)]
pub struct EventedError(pub anyhow::Error);

impl std::fmt::Display for EventedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for EventedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Records a warning event for `err` unless it was already evented, and
/// returns the marked error either way.
pub fn error_event(
    recorder: &Recorder,
    object: &str,
    reason: &str,
    err: anyhow::Error,
) -> anyhow::Error {
    if err.downcast_ref::<EventedError>().is_some() {
        return err;
    }
    recorder.warning(object, reason, &err.to_string());
    anyhow::Error::new(EventedError(err))
}
