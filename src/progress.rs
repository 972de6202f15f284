//! Sync progress reporting.
//!
//! Slim listing accepts an optional [`SyncProgressReporter`] that is called
//! after every batch; the driver uses the same reporter for full syncs.
//! Progress goes to **stderr** so stdout stays parseable NDJSON.
//!
//! A reporter may also ask a running listing to stop early via
//! [`SyncProgressReporter::should_stop`]; the connector checks it between
//! batches.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Identity records listed so far for one entity kind.
    Listing {
        connector: String,
        entity: String,
        n: u64,
    },
    /// Documents and failures emitted so far by a sync run.
    Ingesting {
        connector: String,
        documents: u64,
        failures: u64,
    },
}

/// Receives progress events from connectors and the driver.
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);

    /// Whether the consumer wants the producer to stop at the next batch boundary.
    fn should_stop(&self) -> bool {
        false
    }
}

/// Human-friendly progress: "sync handbook  listing  page  1,200 ids".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Listing {
                connector,
                entity,
                n,
            } => format!(
                "sync {}  listing  {}  {} ids\n",
                connector,
                entity,
                format_number(*n)
            ),
            SyncProgressEvent::Ingesting {
                connector,
                documents,
                failures,
            } => format!(
                "sync {}  {} documents  {} failures\n",
                connector,
                format_number(*documents),
                format_number(*failures)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Listing {
                connector,
                entity,
                n,
            } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": "listing",
                "entity": entity,
                "n": n
            }),
            SyncProgressEvent::Ingesting {
                connector,
                documents,
                failures,
            } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": "ingesting",
                "documents": documents,
                "failures": failures
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
