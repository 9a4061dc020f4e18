use crate::event::{describe_metadata, EventKind, LogEntry};
use crate::error::ExportError;
use crate::export;
use affex_timing::{Clock, Timestamp};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Which sensor entries are echoed at `info` rather than `debug`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoPolicy {
    pub sensor_positives: bool,
    pub sensor_negatives: bool,
}

impl EchoPolicy {
    /// Session entries are always echoed at `info`; sensor entries only when
    /// their flag is set.
    pub fn loud(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::FaceDetected => self.sensor_positives,
            EventKind::NoFaceDetected => self.sensor_negatives,
            _ => !kind.is_sensor(),
        }
    }
}

/// Append-only, time-ordered record of one session.
///
/// Timestamps are taken from the clock at append time and clamped to the
/// previous entry's, so the sequence is non-decreasing even if appends race
/// with a clock read. Range queries rely on that ordering.
#[derive(Debug)]
pub struct EventLog<C: Clock> {
    clock: C,
    entries: Vec<LogEntry>,
    echo: EchoPolicy,
}

impl<C: Clock> EventLog<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            entries: Vec::with_capacity(4096),
            echo: EchoPolicy::default(),
        }
    }

    pub fn with_echo(mut self, echo: EchoPolicy) -> Self {
        self.echo = echo;
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Records an event stamped with the current time.
    pub fn append(&mut self, kind: EventKind, metadata: Option<Value>) -> Timestamp {
        let now = self.clock.now();
        let timestamp = match self.entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.echo_entry(timestamp, kind, metadata.as_ref());
        self.entries.push(LogEntry {
            timestamp,
            kind,
            metadata,
        });
        timestamp
    }

    fn echo_entry(&self, ts: Timestamp, kind: EventKind, metadata: Option<&Value>) {
        let text = describe_metadata(metadata);
        if self.echo.loud(kind) {
            info!(t_ms = ts.as_millis_f64(), "{} ({})", kind, text);
        } else {
            debug!(t_ms = ts.as_millis_f64(), "{} ({})", kind, text);
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    /// Entries matching `predicate`, in insertion order.
    pub fn query<P>(&self, predicate: P) -> Vec<&LogEntry>
    where
        P: Fn(&LogEntry) -> bool,
    {
        self.entries.iter().filter(|e| predicate(e)).collect()
    }

    /// Entries with `from <= timestamp <= to`, found by binary search.
    pub fn range(&self, from: Timestamp, to: Timestamp) -> &[LogEntry] {
        let start = self.entries.partition_point(|e| e.timestamp < from);
        let end = self.entries.partition_point(|e| e.timestamp <= to);
        if start >= end {
            &[]
        } else {
            &self.entries[start..end]
        }
    }

    /// Entries of one kind within `[from, to]`, in order.
    pub fn window(
        &self,
        kind: EventKind,
        from: Timestamp,
        to: Timestamp,
    ) -> impl Iterator<Item = &LogEntry> {
        self.range(from, to).iter().filter(move |e| e.kind == kind)
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn to_csv(&self) -> Result<String, ExportError> {
        export::write_csv(&self.entries, &self.clock)
    }
}

/// Log handle shared between the session loop and the sampling task.
#[derive(Debug)]
pub struct SharedLog<C: Clock>(Arc<Mutex<EventLog<C>>>);

impl<C: Clock> Clone for SharedLog<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<C: Clock> SharedLog<C> {
    pub fn new(log: EventLog<C>) -> Self {
        Self(Arc::new(Mutex::new(log)))
    }

    // Entries are never mutated after append, so a poisoned lock still
    // guards a valid log.
    fn lock(&self) -> MutexGuard<'_, EventLog<C>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, kind: EventKind, metadata: Option<Value>) -> Timestamp {
        self.lock().append(kind, metadata)
    }

    /// Runs `f` with exclusive access; keep it short and never await inside.
    pub fn with<R>(&self, f: impl FnOnce(&mut EventLog<C>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn to_csv(&self) -> Result<String, ExportError> {
        self.lock().to_csv()
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().entries().to_vec()
    }
}
