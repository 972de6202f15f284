//! Capability contracts for connectors.
//!
//! A connector implements [`BaseConnector`] plus whichever sync modes its
//! source supports. There is no monolithic base class: each mode is its own
//! trait, and a driver discovers support at runtime through the `as_*`
//! accessors (or [`BaseConnector::capabilities`]).
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │    BaseConnector     │  load_credentials, validate
//!                 └──────────┬───────────┘
//!    ┌────────┬────────┬─────┴──┬─────────┬──────────────┐
//!    ▼        ▼        ▼        ▼         ▼              ▼
//!  Load     Poll     Slim     Event   Checkpoint       OAuth
//!  (full)  (window) (ids)    (push)  (resumable)   (class-level)
//! ```
//!
//! # Lazy sequences
//!
//! Batch-producing modes return a [`DocumentBatchStream`]: nothing is
//! fetched until the caller polls, each poll yields one non-empty batch, and
//! dropping the stream between batches abandons the sync. Checkpointed sync
//! returns a [`CheckpointOutput`] whose checkpoint is retrieved only after the
//! items are drained.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::checkpoint::{
    decode_checkpoint, encode_checkpoint, CheckpointOutput, ConnectorCheckpoint,
};
use crate::error::{ConnectorError, Result};
use crate::models::{Document, DocumentSource, SecondsSinceUnixEpoch, SlimDocument};
use crate::progress::SyncProgressReporter;

/// Flat mapping of secret name to value, supplied once per connector lifetime.
pub type Credentials = BTreeMap<String, String>;

/// Lazy sequence of non-empty document batches.
pub type DocumentBatchStream<'a> = BoxStream<'a, Result<Vec<Document>>>;

/// Lazy sequence of non-empty slim-document batches.
pub type SlimBatchStream<'a> = BoxStream<'a, Result<Vec<SlimDocument>>>;

/// A sync mode a connector may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Load,
    Poll,
    Slim,
    Event,
    Checkpoint,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Load => "load",
            Capability::Poll => "poll",
            Capability::Slim => "slim",
            Capability::Event => "event",
            Capability::Checkpoint => "checkpoint",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Base contract
// ═══════════════════════════════════════════════════════════════════════

/// Contract shared by every connector.
#[async_trait]
pub trait BaseConnector: Send + Sync {
    /// Instance name, e.g. `"handbook"`.
    fn name(&self) -> &str;

    /// The kind of source this connector reads.
    fn source(&self) -> DocumentSource;

    /// Label used in logs and progress: `"{source}:{name}"`.
    fn source_label(&self) -> String {
        format!("{}:{}", self.source(), self.name())
    }

    /// Accept secrets and prepare the remote session.
    ///
    /// Returns credentials that changed and should be re-persisted (e.g. a
    /// refreshed OAuth token), or `None`.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::MissingCredential`] when a required secret is absent,
    /// [`ConnectorError::Validation`] when one is present but malformed.
    fn load_credentials(&mut self, credentials: &Credentials) -> Result<Option<Credentials>>;

    /// One cheap authenticated call to check settings before the first sync.
    ///
    /// Never consumes batch data and never touches sync state.
    ///
    /// # Errors
    ///
    /// - [`ConnectorError::MissingCredential`] if credentials were never loaded
    /// - [`ConnectorError::CredentialExpired`] on an authentication rejection
    /// - [`ConnectorError::InsufficientPermissions`] on an authorization rejection
    /// - [`ConnectorError::Validation`] for anything else, wrapping the cause
    async fn validate_connector_settings(&self) -> Result<()>;

    fn as_load(&self) -> Option<&dyn LoadConnector> {
        None
    }

    fn as_poll(&self) -> Option<&dyn PollConnector> {
        None
    }

    fn as_slim(&self) -> Option<&dyn SlimConnector> {
        None
    }

    fn as_event(&self) -> Option<&dyn EventConnector> {
        None
    }

    fn as_checkpoint(&self) -> Option<&dyn DynCheckpointConnector> {
        None
    }

    /// Sync modes this connector advertises.
    fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.as_load().is_some() {
            caps.push(Capability::Load);
        }
        if self.as_poll().is_some() {
            caps.push(Capability::Poll);
        }
        if self.as_slim().is_some() {
            caps.push(Capability::Slim);
        }
        if self.as_event().is_some() {
            caps.push(Capability::Event);
        }
        if self.as_checkpoint().is_some() {
            caps.push(Capability::Checkpoint);
        }
        caps
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Sync modes
// ═══════════════════════════════════════════════════════════════════════

/// Full-state load: the entire current document set, no time bound.
pub trait LoadConnector: BaseConnector {
    fn load_from_state(&self) -> Result<DocumentBatchStream<'_>>;
}

/// Incremental poll over `[start, end)` in epoch seconds.
pub trait PollConnector: BaseConnector {
    fn poll_source(
        &self,
        start: SecondsSinceUnixEpoch,
        end: SecondsSinceUnixEpoch,
    ) -> Result<DocumentBatchStream<'_>>;
}

/// Identity-only listing for deletion reconciliation.
pub trait SlimConnector: BaseConnector {
    /// `callback` receives progress after every batch and may request an
    /// early stop through [`SyncProgressReporter::should_stop`].
    fn retrieve_all_slim_documents(
        &self,
        start: Option<SecondsSinceUnixEpoch>,
        end: Option<SecondsSinceUnixEpoch>,
        callback: Option<Arc<dyn SyncProgressReporter>>,
    ) -> Result<SlimBatchStream<'_>>;
}

/// Push-based sources: turn one delivered event into the documents it implies.
pub trait EventConnector: BaseConnector {
    /// The stream may be empty (e.g. for deletions or unknown event types).
    fn handle_event(&self, event: serde_json::Value) -> Result<DocumentBatchStream<'_>>;
}

/// Resumable sync with connector-defined checkpoint state.
///
/// Guarantees for implementers:
/// - every item between two checkpoints is visited at most once on a
///   correctly resumed run;
/// - a failure record for one item does not end the sequence;
/// - the returned checkpoint is valid input to the next call, including a
///   finished one (`has_more == false`), which starts the following window.
pub trait CheckpointConnector: BaseConnector {
    type Checkpoint: ConnectorCheckpoint;

    /// Checkpoint for a run that has made no progress yet.
    fn build_dummy_checkpoint(&self) -> Self::Checkpoint;

    fn load_from_checkpoint(
        &self,
        start: SecondsSinceUnixEpoch,
        end: SecondsSinceUnixEpoch,
        checkpoint: Self::Checkpoint,
    ) -> Result<CheckpointOutput<'_, Self::Checkpoint>>;
}

/// A checkpoint in its persisted form, plus the one flag a driver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCheckpoint {
    pub blob: String,
    pub has_more: bool,
}

impl EncodedCheckpoint {
    pub fn encode<C: ConnectorCheckpoint>(checkpoint: &C) -> Result<Self> {
        Ok(Self {
            blob: encode_checkpoint(checkpoint)?,
            has_more: checkpoint.has_more(),
        })
    }
}

/// Item stream of a type-erased checkpointed sync.
pub type EncodedCheckpointOutput<'a> = CheckpointOutput<'a, Result<EncodedCheckpoint>>;

/// Object-safe view of [`CheckpointConnector`] working on persisted blobs.
///
/// Implemented for every `CheckpointConnector`, so drivers that only hold a
/// `dyn BaseConnector` can still run checkpointed syncs.
pub trait DynCheckpointConnector: Send + Sync {
    fn fresh_checkpoint(&self) -> Result<EncodedCheckpoint>;

    fn load_from_checkpoint_blob(
        &self,
        start: SecondsSinceUnixEpoch,
        end: SecondsSinceUnixEpoch,
        blob: &str,
    ) -> Result<EncodedCheckpointOutput<'_>>;
}

impl<T: CheckpointConnector> DynCheckpointConnector for T {
    fn fresh_checkpoint(&self) -> Result<EncodedCheckpoint> {
        EncodedCheckpoint::encode(&self.build_dummy_checkpoint())
    }

    fn load_from_checkpoint_blob(
        &self,
        start: SecondsSinceUnixEpoch,
        end: SecondsSinceUnixEpoch,
        blob: &str,
    ) -> Result<EncodedCheckpointOutput<'_>> {
        let checkpoint: T::Checkpoint = decode_checkpoint(blob)?;
        let output = self.load_from_checkpoint(start, end, checkpoint)?;
        Ok(output.map_checkpoint(|cp| EncodedCheckpoint::encode(&cp)))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// OAuth
// ═══════════════════════════════════════════════════════════════════════

/// Class-level OAuth support: no connector instance is needed.
#[async_trait]
pub trait OAuthConnector: BaseConnector {
    /// Source this OAuth flow authorizes.
    fn oauth_id() -> DocumentSource;

    /// URL the user is sent to in order to grant access.
    fn oauth_authorization_url(
        base_domain: &str,
        state: &str,
        additional_params: &BTreeMap<String, String>,
    ) -> Result<String>;

    /// Exchange an authorization code for credentials.
    async fn oauth_code_to_token(
        base_domain: &str,
        code: &str,
        additional_params: &BTreeMap<String, String>,
    ) -> Result<Credentials>;
}

/// Build an authorization URL: `authorize_endpoint?<params>&state=<state>`.
///
/// Parameters are appended in the given order, then the extra ones in key
/// order, then `state`.
pub fn build_authorization_url(
    authorize_endpoint: &str,
    params: &[(&str, &str)],
    additional_params: &BTreeMap<String, String>,
    state: &str,
) -> Result<String> {
    let mut url = url::Url::parse(authorize_endpoint).map_err(|e| {
        ConnectorError::validation_with(
            format!("invalid authorization endpoint '{}'", authorize_endpoint),
            e,
        )
    })?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
        for (key, value) in additional_params {
            query.append_pair(key, value);
        }
        query.append_pair("state", state);
    }
    Ok(url.to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of configured connector instances.
///
/// Use [`ConnectorRegistry::from_config`] to build every connector named in
/// the config file, then optionally [`register`](ConnectorRegistry::register)
/// custom ones.
pub struct ConnectorRegistry {
    connectors: Vec<Box<dyn BaseConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// Create a registry with every connector instance from the config.
    pub fn from_config(config: &crate::config::Config) -> Self {
        use crate::connector_wiki::WikiConnector;

        let mut registry = Self::new();
        for (name, cfg) in &config.connectors.wiki {
            registry.register(Box::new(WikiConnector::new(
                name.clone(),
                cfg.settings(config.sync.timeout()),
            )));
        }
        registry
    }

    pub fn register(&mut self, connector: Box<dyn BaseConnector>) {
        self.connectors.push(connector);
    }

    pub fn connectors(&self) -> &[Box<dyn BaseConnector>] {
        &self.connectors
    }

    pub fn connectors_by_source(&self, source: DocumentSource) -> Vec<&dyn BaseConnector> {
        self.connectors
            .iter()
            .filter(|c| c.source() == source)
            .map(|c| c.as_ref())
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<&dyn BaseConnector> {
        self.connectors
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Box<dyn BaseConnector>> {
        self.connectors.iter_mut().find(|c| c.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
