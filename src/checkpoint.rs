//! Checkpoint state and the two-phase checkpointed-sync output.
//!
//! A checkpointed sync yields a sequence of [`DocumentOrFailure`] items and,
//! once that sequence is exhausted, exactly one new checkpoint. The two
//! phases are explicit:
//!
//! ```text
//! connector.load_from_checkpoint(start, end, cp)
//!        │
//!        ▼
//!  CheckpointOutput ──next()──▶ item, item, failure, item ... None
//!        │
//!        └──into_checkpoint()──▶ next checkpoint (only after None)
//! ```
//!
//! Connectors build a [`CheckpointOutput`] from a stream of
//! [`CheckpointEvent`]s whose last element is [`CheckpointEvent::Finished`].

use std::fmt::Debug;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::future;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};
use crate::models::DocumentOrFailure;

/// Connector-defined resume state.
///
/// `KIND` and `VERSION` are written into the persisted envelope. A connector
/// reading a blob with a different kind, or a version it does not know,
/// fails with [`ConnectorError::IncompatibleCheckpoint`] rather than guessing.
pub trait ConnectorCheckpoint:
    Serialize + DeserializeOwned + Clone + Debug + Send + Sync + Unpin + 'static
{
    const KIND: &'static str;
    const VERSION: u32;

    /// Whether another call over the same window is needed.
    fn has_more(&self) -> bool;

    /// Older versions this connector can still read; none by default.
    fn readable_versions() -> &'static [u32] {
        &[]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    kind: String,
    version: u32,
    state: serde_json::Value,
}

/// Serialize a checkpoint into its opaque persisted form.
pub fn encode_checkpoint<C: ConnectorCheckpoint>(checkpoint: &C) -> Result<String> {
    let state = serde_json::to_value(checkpoint).map_err(|e| {
        ConnectorError::IncompatibleCheckpoint(format!("failed to serialize: {}", e))
    })?;
    let envelope = Envelope {
        kind: C::KIND.to_string(),
        version: C::VERSION,
        state,
    };
    serde_json::to_string(&envelope)
        .map_err(|e| ConnectorError::IncompatibleCheckpoint(format!("failed to serialize: {}", e)))
}

/// Parse a persisted checkpoint produced by [`encode_checkpoint`].
pub fn decode_checkpoint<C: ConnectorCheckpoint>(blob: &str) -> Result<C> {
    let envelope: Envelope = serde_json::from_str(blob)
        .map_err(|e| ConnectorError::IncompatibleCheckpoint(format!("unreadable blob: {}", e)))?;

    if envelope.kind != C::KIND {
        return Err(ConnectorError::IncompatibleCheckpoint(format!(
            "checkpoint belongs to '{}', expected '{}'",
            envelope.kind,
            C::KIND
        )));
    }
    if envelope.version != C::VERSION && !C::readable_versions().contains(&envelope.version) {
        return Err(ConnectorError::IncompatibleCheckpoint(format!(
            "{} checkpoint version {} is not supported (current {})",
            C::KIND,
            envelope.version,
            C::VERSION
        )));
    }

    serde_json::from_value(envelope.state)
        .map_err(|e| ConnectorError::IncompatibleCheckpoint(format!("invalid state: {}", e)))
}

/// Raw event produced by a connector's checkpointed stream.
#[derive(Debug)]
pub enum CheckpointEvent<C> {
    Item(DocumentOrFailure),
    /// Terminal event carrying the next checkpoint. Anything after it is ignored.
    Finished(C),
}

/// Pull-driven item stream whose final checkpoint is retrieved separately.
///
/// Implements [`Stream`] over [`DocumentOrFailure`]. The connector's work
/// only advances when the caller polls, and dropping the output abandons the
/// sync without leaking anything the stream owns.
pub struct CheckpointOutput<'a, C> {
    inner: BoxStream<'a, CheckpointEvent<C>>,
    checkpoint: Option<C>,
    drained: bool,
}

impl<'a, C: Send + Unpin + 'a> CheckpointOutput<'a, C> {
    pub fn new(events: impl Stream<Item = CheckpointEvent<C>> + Send + 'a) -> Self {
        Self {
            inner: events.boxed(),
            checkpoint: None,
            drained: false,
        }
    }

    /// True once the item stream has reported exhaustion.
    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// The next checkpoint.
    ///
    /// Fails with [`ConnectorError::CheckpointNotReady`] if the items were not
    /// fully drained, or if the connector ended without producing one.
    pub fn into_checkpoint(self) -> Result<C> {
        if !self.drained {
            return Err(ConnectorError::CheckpointNotReady);
        }
        self.checkpoint.ok_or(ConnectorError::CheckpointNotReady)
    }

    /// Transform the checkpoint this output will finish with.
    pub fn map_checkpoint<D, F>(self, f: F) -> CheckpointOutput<'a, D>
    where
        D: Send + Unpin + 'a,
        F: FnOnce(C) -> D + Send + 'a,
    {
        if self.drained {
            return CheckpointOutput {
                inner: stream::empty().boxed(),
                checkpoint: self.checkpoint.map(f),
                drained: true,
            };
        }
        let mut f = Some(f);
        let events = self.inner.filter_map(move |event| {
            let mapped = match event {
                CheckpointEvent::Item(item) => Some(CheckpointEvent::Item(item)),
                CheckpointEvent::Finished(cp) => f.take().map(|f| CheckpointEvent::Finished(f(cp))),
            };
            future::ready(mapped)
        });
        CheckpointOutput::new(events)
    }

    /// Drain every item and return them together with the next checkpoint.
    pub async fn collect_all(mut self) -> Result<(Vec<DocumentOrFailure>, C)> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item);
        }
        let checkpoint = self.into_checkpoint()?;
        Ok((items, checkpoint))
    }
}

impl<C: Send + Unpin> Stream for CheckpointOutput<'_, C> {
    type Item = DocumentOrFailure;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.drained {
            return Poll::Ready(None);
        }
        match this.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(CheckpointEvent::Item(item))) => Poll::Ready(Some(item)),
            Poll::Ready(Some(CheckpointEvent::Finished(checkpoint))) => {
                this.checkpoint = Some(checkpoint);
                this.drained = true;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.drained = true;
                Poll::Ready(None)
            }
        }
    }
}
