//! Sync driver.
//!
//! Runs one sync mode of one configured connector and writes the result to
//! a writer as NDJSON, one line per document, slim document, or failure:
//!
//! ```text
//! {"type":"document","id":"page:12","sections":[...],...}
//! {"type":"failure","failed_entity":{"kind":"document","document_id":"page:13"},...}
//! {"type":"slim","id":"book__4"}
//! ```
//!
//! # Checkpointed mode
//!
//! The connector is re-invoked over the same window while its checkpoint
//! reports `has_more`. After every call the checkpoint blob and the window's
//! concrete bounds are written to `<state_dir>/<name>.json`, so an
//! interrupted run resumes where it stopped, over the window it started.
//! The file is removed once the window is complete. A call that neither
//! moves the checkpoint nor succeeds in listing its page stops the run.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::connector_wiki::{CREDENTIAL_BASE_URL, CREDENTIAL_TOKEN_ID, CREDENTIAL_TOKEN_SECRET};
use crate::models::{
    Document, DocumentOrFailure, FailedEntity, SecondsSinceUnixEpoch, SlimDocument,
};
use crate::progress::{ProgressMode, SyncProgressEvent, SyncProgressReporter};
use crate::traits::{BaseConnector, ConnectorRegistry, Credentials};

pub const ENV_TOKEN_ID: &str = "WIKI_API_TOKEN_ID";
pub const ENV_TOKEN_SECRET: &str = "WIKI_API_TOKEN_SECRET";

/// Which capability to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SyncMode {
    Load,
    Poll,
    Slim,
    Checkpoint,
}

/// Optional time bounds for a sync, in epoch seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncWindow {
    pub start: Option<SecondsSinceUnixEpoch>,
    pub end: Option<SecondsSinceUnixEpoch>,
}

impl SyncWindow {
    /// Build a window from `YYYY-MM-DD` dates. `until` covers its whole day.
    pub fn from_dates(since: Option<&str>, until: Option<&str>) -> Result<Self> {
        let start = match since {
            Some(s) => {
                let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .with_context(|| format!("Invalid --since date: {}", s))?;
                date.and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc().timestamp() as f64)
            }
            None => None,
        };
        let end = match until {
            Some(s) => {
                let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .with_context(|| format!("Invalid --until date: {}", s))?;
                date.and_hms_opt(23, 59, 59)
                    .map(|dt| dt.and_utc().timestamp() as f64)
            }
            None => None,
        };
        Ok(Self { start, end })
    }

    /// Concrete bounds: the epoch when `start` is absent, now when `end` is.
    pub fn bounds(&self) -> (SecondsSinceUnixEpoch, SecondsSinceUnixEpoch) {
        let start = self.start.unwrap_or(0.0);
        let end = self
            .end
            .unwrap_or_else(|| Utc::now().timestamp_millis() as f64 / 1000.0);
        (start, end)
    }
}

/// Counters for one driver run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub batches: u64,
    pub documents: u64,
    pub failures: u64,
    pub checkpoint_calls: u64,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputLine<'a> {
    Document(&'a Document),
    Slim(&'a SlimDocument),
}

/// Contents of a checkpoint state file.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCheckpoint {
    start: SecondsSinceUnixEpoch,
    end: SecondsSinceUnixEpoch,
    checkpoint: String,
}

fn write_line<W: Write, T: Serialize>(out: &mut W, line: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, line)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Credentials for connector `name`: base URL from config, tokens from the
/// environment. Absent tokens are left out so the connector reports them.
pub fn credentials_for(config: &Config, name: &str) -> Option<Credentials> {
    let wiki = config.connectors.wiki.get(name)?;
    let mut credentials = Credentials::new();
    credentials.insert(CREDENTIAL_BASE_URL.to_string(), wiki.base_url.clone());
    if let Ok(id) = std::env::var(ENV_TOKEN_ID) {
        credentials.insert(CREDENTIAL_TOKEN_ID.to_string(), id);
    }
    if let Ok(secret) = std::env::var(ENV_TOKEN_SECRET) {
        credentials.insert(CREDENTIAL_TOKEN_SECRET.to_string(), secret);
    }
    Some(credentials)
}

fn prepared_registry(config: &Config, name: &str) -> Result<ConnectorRegistry> {
    let mut registry = ConnectorRegistry::from_config(config);
    let credentials = credentials_for(config, name)
        .with_context(|| format!("Unknown connector: '{}'", name))?;
    let connector = registry
        .find_mut(name)
        .with_context(|| format!("Unknown connector: '{}'", name))?;
    connector.load_credentials(&credentials)?;
    Ok(registry)
}

/// Load credentials and run the settings check of connector `name`.
pub async fn validate_source(config: &Config, name: &str) -> Result<()> {
    let registry = prepared_registry(config, name)?;
    let connector = registry
        .find(name)
        .with_context(|| format!("Unknown connector: '{}'", name))?;

    match connector.validate_connector_settings().await {
        Ok(()) => {
            println!("{}: OK", connector.source_label());
            Ok(())
        }
        Err(e) if e.is_credential_problem() => {
            bail!("{}: credential problem, rotate or fix the token: {}", connector.source_label(), e)
        }
        Err(e) => Err(anyhow::Error::new(e)
            .context(format!("{}: settings check failed", connector.source_label()))),
    }
}

/// CLI entry point: validate, then sync to stdout.
pub async fn run_sync(
    config: &Config,
    name: &str,
    mode: SyncMode,
    since: Option<String>,
    until: Option<String>,
    progress: ProgressMode,
) -> Result<()> {
    let window = SyncWindow::from_dates(since.as_deref(), until.as_deref())?;
    let registry = prepared_registry(config, name)?;
    let connector = registry
        .find(name)
        .with_context(|| format!("Unknown connector: '{}'", name))?;

    connector.validate_connector_settings().await?;

    let reporter: Arc<dyn SyncProgressReporter> = Arc::from(progress.reporter());
    let state_path = config.sync.checkpoint_path(name);
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());

    let report = sync_connector(connector, mode, window, &state_path, reporter, &mut out).await?;
    out.flush()?;

    info!(
        connector = name,
        batches = report.batches,
        documents = report.documents,
        failures = report.failures,
        "sync complete"
    );
    Ok(())
}

/// Drive `mode` of `connector`, writing NDJSON to `out`.
#[instrument(skip_all, fields(connector = %connector.name(), mode = ?mode))]
pub async fn sync_connector<W: Write>(
    connector: &dyn BaseConnector,
    mode: SyncMode,
    window: SyncWindow,
    state_path: &Path,
    reporter: Arc<dyn SyncProgressReporter>,
    out: &mut W,
) -> Result<SyncReport> {
    let label = connector.source_label();
    let mut report = SyncReport::default();

    match mode {
        SyncMode::Load | SyncMode::Poll => {
            let mut batches = if mode == SyncMode::Load {
                connector
                    .as_load()
                    .with_context(|| format!("{} does not support full loads", label))?
                    .load_from_state()?
            } else {
                let (start, end) = window.bounds();
                connector
                    .as_poll()
                    .with_context(|| format!("{} does not support polling", label))?
                    .poll_source(start, end)?
            };

            while let Some(batch) = batches.next().await {
                let batch = batch?;
                report.batches += 1;
                for doc in &batch {
                    write_line(out, &OutputLine::Document(doc))?;
                }
                report.documents += batch.len() as u64;
                reporter.report(SyncProgressEvent::Ingesting {
                    connector: label.clone(),
                    documents: report.documents,
                    failures: report.failures,
                });
            }
        }
        SyncMode::Slim => {
            let slim = connector
                .as_slim()
                .with_context(|| format!("{} does not support slim listing", label))?;
            let mut batches =
                slim.retrieve_all_slim_documents(window.start, window.end, Some(Arc::clone(&reporter)))?;
            while let Some(batch) = batches.next().await {
                let batch = batch?;
                report.batches += 1;
                for doc in &batch {
                    write_line(out, &OutputLine::Slim(doc))?;
                }
                report.documents += batch.len() as u64;
            }
        }
        SyncMode::Checkpoint => {
            run_checkpointed(connector, window, state_path, &reporter, out, &mut report).await?;
        }
    }

    Ok(report)
}

async fn run_checkpointed<W: Write>(
    connector: &dyn BaseConnector,
    window: SyncWindow,
    state_path: &Path,
    reporter: &Arc<dyn SyncProgressReporter>,
    out: &mut W,
    report: &mut SyncReport,
) -> Result<()> {
    let label = connector.source_label();
    let resumable = connector
        .as_checkpoint()
        .with_context(|| format!("{} does not support checkpointed sync", label))?;

    let mut stored = match std::fs::read_to_string(state_path) {
        Ok(text) => {
            let stored: StoredCheckpoint = serde_json::from_str(&text).with_context(|| {
                format!("Invalid checkpoint state: {}", state_path.display())
            })?;
            info!(
                path = %state_path.display(),
                start = stored.start,
                end = stored.end,
                "resuming stored checkpoint over its original window"
            );
            stored
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let (start, end) = window.bounds();
            StoredCheckpoint {
                start,
                end,
                checkpoint: resumable.fresh_checkpoint()?.blob,
            }
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to read checkpoint: {}", state_path.display())
            })
        }
    };

    loop {
        let mut items =
            resumable.load_from_checkpoint_blob(stored.start, stored.end, &stored.checkpoint)?;
        let mut page_failed = false;
        while let Some(item) = items.next().await {
            match &item {
                DocumentOrFailure::Document(_) => report.documents += 1,
                DocumentOrFailure::Failure(failure) => {
                    report.failures += 1;
                    warn!(error_kind = %failure.error_kind, message = %failure.message, "item failed");
                    if matches!(failure.failed_entity, FailedEntity::Batch { .. }) {
                        page_failed = true;
                    }
                }
            }
            write_line(out, &item)?;
        }
        let next = items.into_checkpoint()??;
        report.checkpoint_calls += 1;
        reporter.report(SyncProgressEvent::Ingesting {
            connector: label.clone(),
            documents: report.documents,
            failures: report.failures,
        });

        if !next.has_more {
            match std::fs::remove_file(state_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).context("Failed to clear checkpoint"),
            }
            return Ok(());
        }

        let stalled = page_failed && next.blob == stored.checkpoint;
        stored.checkpoint = next.blob;
        store_checkpoint(state_path, &stored)?;
        if stalled {
            bail!(
                "{}: listing page failed without progress; checkpoint kept at {}",
                label,
                state_path.display()
            );
        }
    }
}

fn store_checkpoint(path: &Path, stored: &StoredCheckpoint) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create state dir: {}", parent.display()))?;
    }
    let text = serde_json::to_string(stored)?;
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write checkpoint: {}", path.display()))
}
