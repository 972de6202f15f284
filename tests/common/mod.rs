//! Shared helpers for the integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use docsync::progress::{SyncProgressEvent, SyncProgressReporter};

/// Collects events in memory and can be told to stop after `limit` reports.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<SyncProgressEvent>>,
    stop_after: Option<usize>,
    stopped: AtomicBool,
}

#[allow(dead_code)]
impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stopping_after(limit: usize) -> Self {
        Self {
            stop_after: Some(limit),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<SyncProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl SyncProgressReporter for RecordingProgress {
    fn report(&self, event: SyncProgressEvent) {
        let mut events = self.events.lock().unwrap();
        events.push(event);
        if self.stop_after.is_some_and(|limit| events.len() >= limit) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
