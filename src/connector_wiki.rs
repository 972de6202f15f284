//! Wiki connector for BookStack-style knowledge bases.
//!
//! Reads four entity kinds from the wiki REST API, in this order:
//!
//! | Kind | Endpoint | Document id | Redaction field |
//! |------|----------|-------------|-----------------|
//! | book | `/books` | `book__<id>` | `slug` |
//! | chapter | `/chapters` | `chapter__<id>` | `book_slug` |
//! | shelf | `/shelves` | `shelf:<id>` | `slug` |
//! | page | `/pages` | `page:<id>` | `book_slug` |
//!
//! Pages need a second request (`/pages/<id>`) for their HTML body; that
//! request is paced by the detail limiter and skipped for redacted records.
//!
//! # Configuration
//!
//! ```toml
//! [connectors.wiki.handbook]
//! base_url = "https://wiki.example.com"
//! batch_size = 100
//! page_delay_ms = 200
//! detail_delay_ms = 100
//! ```
//!
//! # Credentials
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `wiki_base_url` | Root URL of the wiki |
//! | `wiki_api_token_id` | API token id |
//! | `wiki_api_token_secret` | API token secret |
//!
//! # Redaction
//!
//! Records whose identifying slug contains a deny-listed fragment are
//! replaced by a per-kind placeholder document (`book__0`, `chapter__0`,
//! `shelf:0`, `page:0`) titled `REDACTED` with no content and no timestamp.
//! They are never dropped, so deletion reconciliation still sees them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::checkpoint::{CheckpointOutput, ConnectorCheckpoint};
use crate::client::{JsonApi, WikiApiClient};
use crate::error::{classify_validation_error, ApiError, ConnectorError, Result};
use crate::html::{escape, html_to_text};
use crate::models::{
    time_str_to_utc, Document, DocumentSource, Metadata, SecondsSinceUnixEpoch, Section,
    SlimDocument,
};
use crate::paginate::{
    DispatchTable, EndpointSpec, EntityTransformer, PageCursor, Pager, TimeFilter,
    TransformContext,
};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::rate_limit::{IntervalLimiter, RateLimiter};
use crate::traits::{
    BaseConnector, CheckpointConnector, Credentials, DocumentBatchStream, DynCheckpointConnector,
    EventConnector, LoadConnector, PollConnector, SlimBatchStream, SlimConnector,
};

/// Title and semantic-identifier marker for redacted documents.
pub const REDACTION_MARKER: &str = "REDACTED";

/// Slug fragments denoting restricted or archival areas.
pub const DEFAULT_REDACTED_FRAGMENTS: &[&str] = &[
    "policies-editor",
    "procedures-editor",
    "processes-editor",
    "isms-editor",
    "policies-archive",
    "procedures-archive",
    "processes-archive",
    "isms-archive",
    "app-drafts",
    "app-to-be-validated",
    "sap-drafts",
    "sap-to-be-validated",
];

pub const CREDENTIAL_BASE_URL: &str = "wiki_base_url";
pub const CREDENTIAL_TOKEN_ID: &str = "wiki_api_token_id";
pub const CREDENTIAL_TOKEN_SECRET: &str = "wiki_api_token_secret";

// ═══════════════════════════════════════════════════════════════════════
// Entity kinds
// ═══════════════════════════════════════════════════════════════════════

/// A kind of wiki entity with its own listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Book,
    Chapter,
    Shelf,
    Page,
}

impl EntityKind {
    /// Listing order used by every sync mode.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Book,
        EntityKind::Chapter,
        EntityKind::Shelf,
        EntityKind::Page,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            EntityKind::Book => "book",
            EntityKind::Chapter => "chapter",
            EntityKind::Shelf => "shelf",
            EntityKind::Page => "page",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            EntityKind::Book => "/books",
            EntityKind::Chapter => "/chapters",
            EntityKind::Shelf => "/shelves",
            EntityKind::Page => "/pages",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            EntityKind::Book => "Book",
            EntityKind::Chapter => "Chapter",
            EntityKind::Shelf => "Shelf",
            EntityKind::Page => "Page",
        }
    }

    // Books and chapters use `__`, shelves and pages use `:`.
    fn id_prefix(&self) -> &'static str {
        match self {
            EntityKind::Book => "book__",
            EntityKind::Chapter => "chapter__",
            EntityKind::Shelf => "shelf:",
            EntityKind::Page => "page:",
        }
    }

    pub fn document_id(&self, remote_id: &str) -> String {
        format!("{}{}", self.id_prefix(), remote_id)
    }

    /// Fixed id shared by every redacted record of this kind.
    pub fn redacted_id(&self) -> String {
        self.document_id("0")
    }

    /// Field holding the slug checked against the deny-list.
    fn redaction_field(&self) -> &'static str {
        match self {
            EntityKind::Book | EntityKind::Shelf => "slug",
            EntityKind::Chapter | EntityKind::Page => "book_slug",
        }
    }

    /// Entity named in a webhook event, e.g. `bookshelf` in `bookshelf_update`.
    pub fn from_event_entity(entity: &str) -> Option<Self> {
        match entity {
            "book" => Some(EntityKind::Book),
            "chapter" => Some(EntityKind::Chapter),
            "bookshelf" | "shelf" => Some(EntityKind::Shelf),
            "page" => Some(EntityKind::Page),
            _ => None,
        }
    }
}

/// String form of a JSON field; missing and null become empty.
fn field_str(raw: &Value, key: &str) -> String {
    match raw.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn remote_id(raw: &Value, kind: EntityKind) -> Result<String> {
    let id = field_str(raw, "id");
    if id.is_empty() {
        return Err(ApiError::malformed(kind.endpoint(), "record has no id").into());
    }
    Ok(id)
}

// ═══════════════════════════════════════════════════════════════════════
// Redaction
// ═══════════════════════════════════════════════════════════════════════

/// Immutable deny-list of slug fragments, shared by every transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionPolicy {
    fragments: Vec<String>,
}

impl RedactionPolicy {
    pub fn new(fragments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// Whether the record's identifying slug contains a deny-listed fragment.
    pub fn is_redacted(&self, kind: EntityKind, raw: &Value) -> bool {
        let slug = field_str(raw, kind.redaction_field());
        self.fragments
            .iter()
            .any(|fragment| slug.contains(fragment.as_str()))
    }
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REDACTED_FRAGMENTS.iter().copied())
    }
}

fn type_metadata(kind: EntityKind) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("type".to_string(), kind.tag().into());
    metadata
}

/// Placeholder emitted in place of a redacted record.
pub fn redacted_document(kind: EntityKind) -> Document {
    Document {
        id: kind.redacted_id(),
        sections: vec![Section::new("#", "")],
        source: DocumentSource::Wiki,
        semantic_identifier: format!("{}: {}", kind.label(), REDACTION_MARKER),
        title: Some(REDACTION_MARKER.to_string()),
        doc_updated_at: None,
        metadata: type_metadata(kind),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Transforms
// ═══════════════════════════════════════════════════════════════════════

/// Raw listing record → [`Document`] for one entity kind.
pub struct WikiTransformer {
    kind: EntityKind,
    redaction: Arc<RedactionPolicy>,
}

impl WikiTransformer {
    pub fn new(kind: EntityKind, redaction: Arc<RedactionPolicy>) -> Self {
        Self { kind, redaction }
    }

    /// Convert `raw`, reusing `detail` as the page body response when the
    /// caller already has it. Pages without one fetch `/pages/<id>`.
    pub async fn convert(
        &self,
        ctx: &TransformContext,
        raw: &Value,
        detail: Option<Value>,
    ) -> Result<Document> {
        let kind = self.kind;
        if self.redaction.is_redacted(kind, raw) {
            debug!(kind = kind.tag(), "redacted record");
            return Ok(redacted_document(kind));
        }

        let id = remote_id(raw, kind)?;
        let title = field_str(raw, "name");
        let (link, text, updated_at) = match kind {
            EntityKind::Page => {
                let detail = match detail {
                    Some(detail) => detail,
                    None => ctx.fetch_detail(&format!("/pages/{}", id)).await?,
                };
                let link = ctx.app_url(&format!(
                    "/books/{}/page/{}",
                    field_str(raw, "book_slug"),
                    field_str(&detail, "slug")
                ));
                let body = format!("<h1>{}</h1>{}", escape(&title), field_str(&detail, "html"));
                (link, html_to_text(&body), field_str(&detail, "updated_at"))
            }
            _ => {
                let path = match kind {
                    EntityKind::Chapter => format!(
                        "/books/{}/chapter/{}",
                        field_str(raw, "book_slug"),
                        field_str(raw, "slug")
                    ),
                    EntityKind::Shelf => format!("/shelves/{}", field_str(raw, "slug")),
                    _ => format!("/books/{}", field_str(raw, "slug")),
                };
                let text = format!("{}\n{}", title, field_str(raw, "description"));
                (ctx.app_url(&path), text, field_str(raw, "updated_at"))
            }
        };

        Ok(Document {
            id: kind.document_id(&id),
            sections: vec![Section::new(link, text)],
            source: DocumentSource::Wiki,
            semantic_identifier: format!("{}: {}", kind.label(), title),
            title: Some(title),
            doc_updated_at: time_str_to_utc(&updated_at),
            metadata: type_metadata(kind),
        })
    }
}

#[async_trait]
impl EntityTransformer<Document> for WikiTransformer {
    async fn transform(&self, ctx: &TransformContext, raw: &Value) -> Result<Document> {
        self.convert(ctx, raw, None).await
    }

    fn failure_id(&self, raw: &Value) -> String {
        self.kind.document_id(&field_str(raw, "id"))
    }
}

/// Raw listing record → [`SlimDocument`]. Never fetches details.
pub struct SlimTransformer {
    kind: EntityKind,
    redaction: Arc<RedactionPolicy>,
}

#[async_trait]
impl EntityTransformer<SlimDocument> for SlimTransformer {
    async fn transform(&self, _ctx: &TransformContext, raw: &Value) -> Result<SlimDocument> {
        if self.redaction.is_redacted(self.kind, raw) {
            return Ok(SlimDocument::new(self.kind.redacted_id()));
        }
        let id = remote_id(raw, self.kind)?;
        Ok(SlimDocument::new(self.kind.document_id(&id)))
    }

    fn failure_id(&self, raw: &Value) -> String {
        self.kind.document_id(&field_str(raw, "id"))
    }
}

fn document_table(redaction: &Arc<RedactionPolicy>) -> DispatchTable<Document> {
    EntityKind::ALL
        .iter()
        .map(|&kind| EndpointSpec {
            tag: kind.tag(),
            endpoint: kind.endpoint(),
            transformer: Arc::new(WikiTransformer::new(kind, Arc::clone(redaction)))
                as Arc<dyn EntityTransformer<Document>>,
        })
        .collect::<Vec<_>>()
        .into()
}

fn slim_table(redaction: &Arc<RedactionPolicy>) -> DispatchTable<SlimDocument> {
    EntityKind::ALL
        .iter()
        .map(|&kind| EndpointSpec {
            tag: kind.tag(),
            endpoint: kind.endpoint(),
            transformer: Arc::new(SlimTransformer {
                kind,
                redaction: Arc::clone(redaction),
            }) as Arc<dyn EntityTransformer<SlimDocument>>,
        })
        .collect::<Vec<_>>()
        .into()
}

// ═══════════════════════════════════════════════════════════════════════
// Connector
// ═══════════════════════════════════════════════════════════════════════

/// Per-instance settings, usually built from the config file.
#[derive(Debug, Clone)]
pub struct WikiSettings {
    pub batch_size: usize,
    /// Minimum interval between listing requests.
    pub page_delay: Duration,
    /// Minimum interval between page detail requests.
    pub detail_delay: Duration,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub redacted_fragments: Vec<String>,
}

impl Default for WikiSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            page_delay: Duration::from_millis(200),
            detail_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
            redacted_fragments: DEFAULT_REDACTED_FRAGMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Resume state for checkpointed wiki syncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiCheckpoint {
    pub has_more: bool,
    #[serde(flatten)]
    pub cursor: PageCursor,
}

impl ConnectorCheckpoint for WikiCheckpoint {
    const KIND: &'static str = "wiki";
    const VERSION: u32 = 1;

    fn has_more(&self) -> bool {
        self.has_more
    }
}

/// A configured wiki instance.
pub struct WikiConnector {
    name: String,
    settings: WikiSettings,
    redaction: Arc<RedactionPolicy>,
    api: Option<Arc<dyn JsonApi>>,
    page_limiter: Arc<dyn RateLimiter>,
    detail_limiter: Arc<dyn RateLimiter>,
    documents: DispatchTable<Document>,
    slims: DispatchTable<SlimDocument>,
}

impl WikiConnector {
    pub fn new(name: impl Into<String>, settings: WikiSettings) -> Self {
        let redaction = Arc::new(RedactionPolicy::new(settings.redacted_fragments.clone()));
        Self {
            name: name.into(),
            page_limiter: IntervalLimiter::from_millis(settings.page_delay.as_millis() as u64),
            detail_limiter: IntervalLimiter::from_millis(settings.detail_delay.as_millis() as u64),
            documents: document_table(&redaction),
            slims: slim_table(&redaction),
            redaction,
            settings,
            api: None,
        }
    }

    /// Use an already-built API client instead of loading credentials.
    pub fn with_client(mut self, api: Arc<dyn JsonApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_rate_limiters(
        mut self,
        page_limiter: Arc<dyn RateLimiter>,
        detail_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        self.page_limiter = page_limiter;
        self.detail_limiter = detail_limiter;
        self
    }

    pub fn settings(&self) -> &WikiSettings {
        &self.settings
    }

    pub fn redaction(&self) -> &RedactionPolicy {
        &self.redaction
    }

    fn api(&self) -> Result<Arc<dyn JsonApi>> {
        self.api.clone().ok_or_else(|| {
            ConnectorError::MissingCredential(format!(
                "wiki connector '{}' (credentials have not been loaded)",
                self.name
            ))
        })
    }

    fn pager(&self, filter: TimeFilter) -> Result<Pager> {
        Pager::new(
            self.api()?,
            self.settings.batch_size,
            filter,
            Arc::clone(&self.page_limiter),
            Arc::clone(&self.detail_limiter),
        )
    }

    fn documents_in(&self, filter: TimeFilter) -> Result<DocumentBatchStream<'_>> {
        Ok(self.pager(filter)?.batches(Arc::clone(&self.documents)))
    }
}

fn required<'c>(credentials: &'c Credentials, key: &str) -> Result<&'c str> {
    credentials
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConnectorError::MissingCredential(format!("wiki ({})", key)))
}

#[async_trait]
impl BaseConnector for WikiConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> DocumentSource {
        DocumentSource::Wiki
    }

    fn load_credentials(&mut self, credentials: &Credentials) -> Result<Option<Credentials>> {
        let base_url = required(credentials, CREDENTIAL_BASE_URL)?;
        let token_id = required(credentials, CREDENTIAL_TOKEN_ID)?;
        let token_secret = required(credentials, CREDENTIAL_TOKEN_SECRET)?;

        url::Url::parse(base_url).map_err(|e| {
            ConnectorError::validation_with(format!("invalid wiki base url '{}'", base_url), e)
        })?;

        let client = WikiApiClient::new(base_url, token_id, token_secret, self.settings.timeout)
            .map_err(|e| ConnectorError::validation_with("failed to build HTTP client", e))?;
        self.api = Some(Arc::new(client));
        Ok(None)
    }

    #[instrument(skip(self), fields(connector = %self.name))]
    async fn validate_connector_settings(&self) -> Result<()> {
        let api = self.api()?;
        let params = vec![
            ("count".to_string(), "1".to_string()),
            ("offset".to_string(), "0".to_string()),
        ];
        api.get(EntityKind::Book.endpoint(), &params)
            .await
            .map_err(|e| classify_validation_error("wiki", e))?;
        info!("wiki settings validated");
        Ok(())
    }

    fn as_load(&self) -> Option<&dyn LoadConnector> {
        Some(self)
    }

    fn as_poll(&self) -> Option<&dyn PollConnector> {
        Some(self)
    }

    fn as_slim(&self) -> Option<&dyn SlimConnector> {
        Some(self)
    }

    fn as_event(&self) -> Option<&dyn EventConnector> {
        Some(self)
    }

    fn as_checkpoint(&self) -> Option<&dyn DynCheckpointConnector> {
        Some(self)
    }
}

impl LoadConnector for WikiConnector {
    fn load_from_state(&self) -> Result<DocumentBatchStream<'_>> {
        self.documents_in(TimeFilter::unbounded())
    }
}

impl PollConnector for WikiConnector {
    fn poll_source(
        &self,
        start: SecondsSinceUnixEpoch,
        end: SecondsSinceUnixEpoch,
    ) -> Result<DocumentBatchStream<'_>> {
        self.documents_in(TimeFilter::new(Some(start), Some(end)))
    }
}

struct SlimListing<'a> {
    batches: BoxStream<'a, Result<(&'static str, Vec<SlimDocument>)>>,
    callback: Option<Arc<dyn SyncProgressReporter>>,
    connector: String,
    entity: &'static str,
    listed: u64,
}

impl SlimConnector for WikiConnector {
    fn retrieve_all_slim_documents(
        &self,
        start: Option<SecondsSinceUnixEpoch>,
        end: Option<SecondsSinceUnixEpoch>,
        callback: Option<Arc<dyn SyncProgressReporter>>,
    ) -> Result<SlimBatchStream<'_>> {
        let pager = self.pager(TimeFilter::new(start, end))?;
        let state = SlimListing {
            batches: pager.tagged_batches(Arc::clone(&self.slims)),
            callback,
            connector: self.source_label(),
            entity: "",
            listed: 0,
        };

        Ok(stream::unfold(state, |mut state| async move {
            if state.callback.as_ref().is_some_and(|cb| cb.should_stop()) {
                debug!(connector = %state.connector, "slim listing stopped by caller");
                return None;
            }
            match state.batches.next().await? {
                Ok((entity, batch)) => {
                    if entity != state.entity {
                        state.entity = entity;
                        state.listed = 0;
                    }
                    state.listed += batch.len() as u64;
                    if let Some(cb) = &state.callback {
                        cb.report(SyncProgressEvent::Listing {
                            connector: state.connector.clone(),
                            entity: entity.to_string(),
                            n: state.listed,
                        });
                    }
                    Some((Ok(batch), state))
                }
                Err(e) => Some((Err(e), state)),
            }
        })
        .boxed())
    }
}

impl EventConnector for WikiConnector {
    fn handle_event(&self, event: Value) -> Result<DocumentBatchStream<'_>> {
        let api = self.api()?;
        let name = event
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectorError::Unsupported("wiki event without a name".to_string()))?;

        let Some((entity, action)) = name.rsplit_once('_') else {
            debug!(event = name, "ignoring event");
            return Ok(stream::empty().boxed());
        };
        let Some(kind) = EntityKind::from_event_entity(entity) else {
            debug!(event = name, "ignoring event");
            return Ok(stream::empty().boxed());
        };
        if action == "delete" {
            debug!(event = name, "deletions are reconciled by slim listing");
            return Ok(stream::empty().boxed());
        }

        let related = event.get("related_item").cloned().unwrap_or(Value::Null);
        let id = field_str(&related, "id");
        if id.is_empty() {
            return Err(ConnectorError::Unsupported(format!(
                "{} event without related_item.id",
                name
            )));
        }

        let transformer = WikiTransformer::new(kind, Arc::clone(&self.redaction));
        let ctx = TransformContext::new(api, Arc::clone(&self.detail_limiter));
        let redacted = self.redaction.is_redacted(kind, &related);

        Ok(stream::once(async move {
            let doc = if redacted {
                transformer.convert(&ctx, &related, None).await?
            } else {
                // Pages reuse this response as their body instead of fetching again.
                let detail = ctx
                    .fetch_detail(&format!("{}/{}", kind.endpoint(), id))
                    .await?;
                let raw = merge_fields(related, detail.clone());
                let body = (kind == EntityKind::Page).then_some(detail);
                transformer.convert(&ctx, &raw, body).await?
            };
            Ok::<_, ConnectorError>(vec![doc])
        })
        .boxed())
    }
}

/// Overlay `detail` on top of `base`; fields only in `base` are kept.
fn merge_fields(base: Value, detail: Value) -> Value {
    match (base, detail) {
        (Value::Object(mut base), Value::Object(detail)) => {
            base.extend(detail);
            Value::Object(base)
        }
        (_, detail) => detail,
    }
}

impl CheckpointConnector for WikiConnector {
    type Checkpoint = WikiCheckpoint;

    fn build_dummy_checkpoint(&self) -> WikiCheckpoint {
        WikiCheckpoint {
            has_more: true,
            cursor: PageCursor::default(),
        }
    }

    fn load_from_checkpoint(
        &self,
        start: SecondsSinceUnixEpoch,
        end: SecondsSinceUnixEpoch,
        checkpoint: WikiCheckpoint,
    ) -> Result<CheckpointOutput<'_, WikiCheckpoint>> {
        let pager = self.pager(TimeFilter::new(Some(start), Some(end)))?;
        let kinds = self.documents.len();
        // A finished checkpoint starts the next window from the beginning.
        let cursor = if checkpoint.has_more {
            checkpoint.cursor
        } else {
            PageCursor::default()
        };
        let output = pager.checkpointed_items(Arc::clone(&self.documents), cursor);
        Ok(output.map_checkpoint(move |cursor| {
            if cursor.is_exhausted(kinds) {
                WikiCheckpoint {
                    has_more: false,
                    cursor: PageCursor::default(),
                }
            } else {
                WikiCheckpoint {
                    has_more: true,
                    cursor,
                }
            }
        }))
    }
}
