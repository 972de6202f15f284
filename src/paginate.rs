//! Offset pagination over paged, time-filterable listing endpoints.
//!
//! A [`Pager`] turns a dispatch table of endpoints into bounded batches:
//!
//! 1. Start each endpoint at offset 0.
//! 2. Request up to `batch_size` records from `offset`, with the optional
//!    `filter[updated_at:gte|lte]` window in the remote date format.
//! 3. Transform each raw record with the endpoint's [`EntityTransformer`].
//! 4. Advance `offset` by the number of raw records actually returned.
//! 5. Yield the batch unless it is empty.
//! 6. Move to the next endpoint once a page comes back short.
//!
//! Listing requests are paced by the pager's page limiter, and detail
//! fetches made from inside a transform go through [`TransformContext`],
//! which paces them with the detail limiter.
//!
//! A record whose transform fails never ends a sync. Batch streams
//! ([`Pager::batches`]) log it and keep the rest of the page; only a failed
//! listing request ends them. Item streams ([`Pager::checkpointed_items`])
//! cover one page per call and turn the failure into a
//! [`ConnectorFailure`](crate::models::ConnectorFailure) record.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::checkpoint::{CheckpointEvent, CheckpointOutput};
use crate::client::{JsonApi, Params};
use crate::error::{ApiError, ConnectorError, Result};
use crate::models::{
    epoch_to_utc, ConnectorFailure, Document, DocumentOrFailure, SecondsSinceUnixEpoch,
};
use crate::rate_limit::RateLimiter;

/// Timestamp format the remote listing filter expects (UTC).
pub const REMOTE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ═══════════════════════════════════════════════════════════════════════
// Time window
// ═══════════════════════════════════════════════════════════════════════

/// Optional `[start, end]` bounds on the remote `updated_at` field.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeFilter {
    pub start: Option<SecondsSinceUnixEpoch>,
    pub end: Option<SecondsSinceUnixEpoch>,
}

impl TimeFilter {
    pub fn new(start: Option<SecondsSinceUnixEpoch>, end: Option<SecondsSinceUnixEpoch>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A window that cannot contain any change: `end <= start`.
    pub fn is_empty_window(&self) -> bool {
        matches!((self.start, self.end), (Some(start), Some(end)) if end <= start)
    }

    /// Rejects bounds the remote date format cannot express.
    pub fn validate(&self) -> Result<()> {
        for bound in [self.start, self.end].into_iter().flatten() {
            if !bound.is_finite() || epoch_to_utc(bound).is_none() {
                return Err(ConnectorError::Unsupported(format!(
                    "time bound {} is out of range",
                    bound
                )));
            }
        }
        Ok(())
    }

    /// Query parameters for the filter; absent bounds are omitted entirely.
    pub fn query_params(&self) -> Params {
        let mut params = Vec::new();
        if let Some(dt) = self.start.and_then(epoch_to_utc) {
            params.push((
                "filter[updated_at:gte]".to_string(),
                dt.format(REMOTE_TIME_FORMAT).to_string(),
            ));
        }
        if let Some(dt) = self.end.and_then(epoch_to_utc) {
            params.push((
                "filter[updated_at:lte]".to_string(),
                dt.format(REMOTE_TIME_FORMAT).to_string(),
            ));
        }
        params
    }
}

/// Full query for one listing page.
pub fn page_params(offset: usize, count: usize, filter: &TimeFilter) -> Params {
    let mut params = vec![
        ("count".to_string(), count.to_string()),
        ("offset".to_string(), offset.to_string()),
        ("sort".to_string(), "+id".to_string()),
    ];
    params.extend(filter.query_params());
    params
}

// ═══════════════════════════════════════════════════════════════════════
// Transforms and dispatch
// ═══════════════════════════════════════════════════════════════════════

/// What a transform may use while converting one raw record.
#[derive(Clone)]
pub struct TransformContext {
    api: Arc<dyn JsonApi>,
    detail_limiter: Arc<dyn RateLimiter>,
}

impl TransformContext {
    pub fn new(api: Arc<dyn JsonApi>, detail_limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            api,
            detail_limiter,
        }
    }

    /// Secondary per-item fetch, paced by the detail limiter.
    pub async fn fetch_detail(&self, endpoint: &str) -> std::result::Result<Value, ApiError> {
        self.detail_limiter.acquire().await;
        self.api.get(endpoint, &[]).await
    }

    pub fn app_url(&self, path: &str) -> String {
        self.api.build_app_url(path)
    }
}

/// Converts one raw listing record into an output item.
#[async_trait]
pub trait EntityTransformer<T>: Send + Sync {
    async fn transform(&self, ctx: &TransformContext, raw: &Value) -> Result<T>;

    /// Identifier recorded when `transform` fails for `raw`.
    fn failure_id(&self, raw: &Value) -> String;
}

/// One row of a dispatch table: an entity tag, its listing endpoint, and
/// the transform for its records.
pub struct EndpointSpec<T> {
    pub tag: &'static str,
    pub endpoint: &'static str,
    pub transformer: Arc<dyn EntityTransformer<T>>,
}

impl<T> Clone for EndpointSpec<T> {
    fn clone(&self) -> Self {
        Self {
            tag: self.tag,
            endpoint: self.endpoint,
            transformer: Arc::clone(&self.transformer),
        }
    }
}

/// Ordered, immutable dispatch table shared by every sync of a connector.
pub type DispatchTable<T> = Arc<[EndpointSpec<T>]>;

/// Position inside a dispatch table: which endpoint, and how far into it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub entity_index: usize,
    pub offset: usize,
}

impl PageCursor {
    pub fn is_exhausted(&self, table_len: usize) -> bool {
        self.entity_index >= table_len
    }

    /// Cursor after a page of `returned` records out of `batch_size` requested.
    pub fn advance(self, returned: usize, batch_size: usize) -> Self {
        if returned < batch_size {
            PageCursor {
                entity_index: self.entity_index + 1,
                offset: 0,
            }
        } else {
            PageCursor {
                entity_index: self.entity_index,
                offset: self.offset + returned,
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Pager
// ═══════════════════════════════════════════════════════════════════════

/// Pagination settings and collaborators for one sync call.
#[derive(Clone)]
pub struct Pager {
    api: Arc<dyn JsonApi>,
    batch_size: usize,
    filter: TimeFilter,
    page_limiter: Arc<dyn RateLimiter>,
    detail_limiter: Arc<dyn RateLimiter>,
}

impl Pager {
    /// Fails with [`ConnectorError::Unsupported`] when a bound of `filter`
    /// cannot be sent to the remote API.
    pub fn new(
        api: Arc<dyn JsonApi>,
        batch_size: usize,
        filter: TimeFilter,
        page_limiter: Arc<dyn RateLimiter>,
        detail_limiter: Arc<dyn RateLimiter>,
    ) -> Result<Self> {
        filter.validate()?;
        Ok(Self {
            api,
            batch_size: batch_size.max(1),
            filter,
            page_limiter,
            detail_limiter,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn transform_context(&self) -> TransformContext {
        TransformContext::new(Arc::clone(&self.api), Arc::clone(&self.detail_limiter))
    }

    /// Fetch the raw records of one listing page.
    ///
    /// A body without a `data` field is an empty page; a `data` field that is
    /// not an array is a malformed response.
    pub async fn fetch_page(&self, endpoint: &str, offset: usize) -> Result<Vec<Value>> {
        self.page_limiter.acquire().await;
        let params = page_params(offset, self.batch_size, &self.filter);
        let body = self.api.get(endpoint, &params).await?;
        match body.get("data") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => Err(ApiError::malformed(endpoint, "`data` is not an array").into()),
        }
    }

    /// Lazy, non-empty batches across every endpoint of `table`, in table order.
    ///
    /// Records that fail to transform are logged and left out. A listing
    /// error is yielded and ends the stream.
    pub fn batches<'a, T: Send + 'a>(
        &self,
        table: DispatchTable<T>,
    ) -> stream::BoxStream<'a, Result<Vec<T>>> {
        self.tagged_batches(table)
            .map(|batch| batch.map(|(_, items)| items))
            .boxed()
    }

    /// Like [`batches`](Self::batches), with each batch labelled by the
    /// `tag` of the endpoint it came from.
    pub fn tagged_batches<'a, T: Send + 'a>(
        &self,
        table: DispatchTable<T>,
    ) -> stream::BoxStream<'a, Result<(&'static str, Vec<T>)>> {
        if self.filter.is_empty_window() {
            debug!("empty window, nothing to poll");
            return stream::empty().boxed();
        }

        let state = BatchState {
            pager: self.clone(),
            ctx: self.transform_context(),
            table,
            cursor: PageCursor::default(),
            failed: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if state.failed || state.cursor.is_exhausted(state.table.len()) {
                    return None;
                }
                let spec = state.table[state.cursor.entity_index].clone();
                match state.next_batch(&spec).await {
                    Ok(batch) if batch.is_empty() => continue,
                    Ok(batch) => return Some((Ok((spec.tag, batch)), state)),
                    Err(e) => {
                        state.failed = true;
                        return Some((Err(e), state));
                    }
                }
            }
        })
        .boxed()
    }

    /// One page of documents at `cursor`, item by item, finishing with the
    /// cursor for the next call.
    ///
    /// A failed listing request yields a batch failure and finishes with the
    /// unchanged cursor so the page is retried next time. A failed transform
    /// yields a document failure and the page continues.
    pub fn checkpointed_items<'a>(
        &self,
        table: DispatchTable<Document>,
        cursor: PageCursor,
    ) -> CheckpointOutput<'a, PageCursor> {
        if self.filter.is_empty_window() || cursor.is_exhausted(table.len()) {
            let done = PageCursor {
                entity_index: table.len(),
                offset: 0,
            };
            return CheckpointOutput::new(stream::iter([CheckpointEvent::Finished(done)]));
        }

        let state = ItemState {
            pager: self.clone(),
            ctx: self.transform_context(),
            spec: table[cursor.entity_index].clone(),
            cursor,
            phase: ItemPhase::Fetch,
        };

        CheckpointOutput::new(stream::unfold(state, |mut state| async move {
            let event = state.next_event().await?;
            Some((event, state))
        }))
    }
}

struct BatchState<T> {
    pager: Pager,
    ctx: TransformContext,
    table: DispatchTable<T>,
    cursor: PageCursor,
    failed: bool,
}

impl<T> BatchState<T> {
    async fn next_batch(&mut self, spec: &EndpointSpec<T>) -> Result<Vec<T>> {
        let raw = self.pager.fetch_page(spec.endpoint, self.cursor.offset).await?;
        let returned = raw.len();
        debug!(
            endpoint = spec.endpoint,
            offset = self.cursor.offset,
            returned,
            "fetched listing page"
        );

        let mut batch = Vec::with_capacity(returned);
        for record in &raw {
            match spec.transformer.transform(&self.ctx, record).await {
                Ok(item) => batch.push(item),
                Err(e) => {
                    let id = spec.transformer.failure_id(record);
                    warn!(document_id = %id, error_kind = %e.kind(), error = %e, "skipping record");
                }
            }
        }

        self.cursor = self.cursor.advance(returned, self.pager.batch_size);
        Ok(batch)
    }
}

enum ItemPhase {
    Fetch,
    Items {
        records: VecDeque<Value>,
        next: PageCursor,
    },
    Done,
}

struct ItemState {
    pager: Pager,
    ctx: TransformContext,
    spec: EndpointSpec<Document>,
    cursor: PageCursor,
    phase: ItemPhase,
}

impl ItemState {
    async fn next_event(&mut self) -> Option<CheckpointEvent<PageCursor>> {
        loop {
            match &mut self.phase {
                ItemPhase::Done => return None,
                ItemPhase::Fetch => {
                    match self.pager.fetch_page(self.spec.endpoint, self.cursor.offset).await {
                        Ok(records) => {
                            let next = self.cursor.advance(records.len(), self.pager.batch_size);
                            self.phase = ItemPhase::Items {
                                records: records.into(),
                                next,
                            };
                        }
                        Err(e) => {
                            warn!(endpoint = self.spec.endpoint, offset = self.cursor.offset, error = %e, "listing page failed");
                            let failure = ConnectorFailure::batch(
                                format!("{} offset={}", self.spec.endpoint, self.cursor.offset),
                                e.kind(),
                                e.to_string(),
                            );
                            self.phase = ItemPhase::Items {
                                records: VecDeque::new(),
                                next: self.cursor,
                            };
                            return Some(CheckpointEvent::Item(DocumentOrFailure::Failure(failure)));
                        }
                    }
                }
                ItemPhase::Items { records, next } => match records.pop_front() {
                    Some(record) => {
                        let item = match self.spec.transformer.transform(&self.ctx, &record).await {
                            Ok(doc) => DocumentOrFailure::Document(doc),
                            Err(e) => {
                                let id = self.spec.transformer.failure_id(&record);
                                warn!(document_id = %id, error = %e, "failed to convert record");
                                DocumentOrFailure::Failure(e.to_failure(id))
                            }
                        };
                        return Some(CheckpointEvent::Item(item));
                    }
                    None => {
                        let next = *next;
                        self.phase = ItemPhase::Done;
                        return Some(CheckpointEvent::Finished(next));
                    }
                },
            }
        }
    }
}
