//! End-to-end tests of the wiki connector against a mock wiki API.
//!
//! Every test starts a `wiremock` server that speaks the wiki's listing
//! protocol (`count`/`offset`/`sort` query parameters, `{"data": [...]}`
//! bodies) and points a real [`WikiConnector`] at it with pacing disabled.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingProgress;

use docsync::checkpoint::encode_checkpoint;
use docsync::connector_wiki::{
    WikiCheckpoint, WikiConnector, WikiSettings, CREDENTIAL_BASE_URL, CREDENTIAL_TOKEN_ID,
    CREDENTIAL_TOKEN_SECRET, DEFAULT_REDACTED_FRAGMENTS,
};
use docsync::error::ConnectorError;
use docsync::models::{Document, DocumentOrFailure, FailedEntity};
use docsync::paginate::PageCursor;
use docsync::progress::{SyncProgressEvent, SyncProgressReporter};
use docsync::traits::{
    BaseConnector, CheckpointConnector, Credentials, DynCheckpointConnector, EventConnector,
    LoadConnector, PollConnector, SlimConnector,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ─── Fixtures ───────────────────────────────────────────────────────

fn settings(batch_size: usize) -> WikiSettings {
    WikiSettings {
        batch_size,
        page_delay: Duration::ZERO,
        detail_delay: Duration::ZERO,
        timeout: Duration::from_secs(5),
        redacted_fragments: DEFAULT_REDACTED_FRAGMENTS
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

fn credentials(base_url: &str) -> Credentials {
    [
        (CREDENTIAL_BASE_URL, base_url),
        (CREDENTIAL_TOKEN_ID, "token-id"),
        (CREDENTIAL_TOKEN_SECRET, "token-secret"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn connector(server: &MockServer, batch_size: usize) -> WikiConnector {
    let mut connector = WikiConnector::new("handbook", settings(batch_size));
    connector
        .load_credentials(&credentials(&server.uri()))
        .unwrap();
    connector
}

fn book(id: u64) -> Value {
    json!({
        "id": id,
        "name": format!("Book {}", id),
        "slug": format!("book-{}", id),
        "description": "About things",
        "updated_at": "2024-03-01T10:00:00.000000Z"
    })
}

fn page(id: u64, book_slug: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Page {}", id),
        "slug": format!("page-{}", id),
        "book_slug": book_slug,
        "updated_at": "2024-03-02 08:30:00"
    })
}

/// Mount one mock per listing page of `records`, each expected `times` times.
async fn mount_listing(
    server: &MockServer,
    endpoint: &str,
    records: &[Value],
    batch_size: usize,
    times: u64,
) {
    let mut offset = 0;
    loop {
        let end = (offset + batch_size).min(records.len());
        Mock::given(method("GET"))
            .and(path(format!("/api{}", endpoint)))
            .and(query_param("offset", offset.to_string()))
            .and(query_param("count", batch_size.to_string()))
            .and(query_param("sort", "+id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": &records[offset..end],
                "total": records.len()
            })))
            .expect(times)
            .mount(server)
            .await;
        if end - offset < batch_size {
            break;
        }
        offset = end;
    }
}

async fn mount_empty(server: &MockServer, endpoint: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api{}", endpoint)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(server)
        .await;
}

async fn mount_page_detail(server: &MockServer, id: u64, html: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/pages/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "slug": format!("page-{}", id),
            "html": html,
            "updated_at": "2024-03-05T12:00:00.000000Z"
        })))
        .mount(server)
        .await;
}

async fn drain(connector: &WikiConnector) -> Vec<Vec<Document>> {
    let mut batches = connector.load_from_state().unwrap();
    let mut out = Vec::new();
    while let Some(batch) = batches.next().await {
        out.push(batch.unwrap());
    }
    out
}

// ─── Validation ─────────────────────────────────────────────────────

#[tokio::test]
async fn validate_without_credentials_is_missing_credential() {
    let connector = WikiConnector::new("handbook", settings(10));
    let err = connector.validate_connector_settings().await.unwrap_err();
    assert!(matches!(err, ConnectorError::MissingCredential(_)));
}

#[tokio::test]
async fn sync_without_credentials_is_missing_credential() {
    let connector = WikiConnector::new("handbook", settings(10));
    assert!(matches!(
        connector.load_from_state().err(),
        Some(ConnectorError::MissingCredential(_))
    ));
}

async fn validate_with_status(status: u16) -> Result<(), ConnectorError> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .and(query_param("count", "1"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({
            "error": { "code": status, "message": "rejected" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    connector(&server, 10).validate_connector_settings().await
}

#[tokio::test]
async fn validate_classifies_remote_failures() {
    assert!(matches!(
        validate_with_status(401).await,
        Err(ConnectorError::CredentialExpired(_))
    ));
    assert!(matches!(
        validate_with_status(403).await,
        Err(ConnectorError::InsufficientPermissions(_))
    ));

    let err = validate_with_status(500).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Validation { .. }));
    let cause = std::error::Error::source(&err).expect("original error kept");
    assert!(cause.to_string().contains("500"));
}

#[tokio::test]
async fn validate_succeeds_on_ok_response() {
    let server = MockServer::start().await;
    mount_empty(&server, "/books").await;
    connector(&server, 10)
        .validate_connector_settings()
        .await
        .unwrap();
}

#[tokio::test]
async fn unreachable_server_is_generic_validation_error() {
    let mut connector = WikiConnector::new("handbook", settings(10));
    connector
        .load_credentials(&credentials("http://127.0.0.1:9"))
        .unwrap();
    let err = connector.validate_connector_settings().await.unwrap_err();
    assert!(matches!(err, ConnectorError::Validation { .. }));
    assert!(!err.is_credential_problem());
}

// ─── Load and poll ──────────────────────────────────────────────────

#[tokio::test]
async fn three_pages_yield_three_batches_and_no_fourth_request() {
    let server = MockServer::start().await;
    let books: Vec<Value> = (1..=242).map(book).collect();
    mount_listing(&server, "/books", &books, 100, 1).await;
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .and(query_param("offset", "300"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(0)
        .mount(&server)
        .await;
    for endpoint in ["/chapters", "/shelves", "/pages"] {
        mount_empty(&server, endpoint).await;
    }

    let batches = drain(&connector(&server, 100)).await;
    let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![100, 100, 42]);
    assert_eq!(batches[0][0].id, "book__1");
    assert_eq!(batches[2][41].id, "book__242");
}

#[tokio::test]
async fn entity_kinds_are_listed_in_order() {
    let server = MockServer::start().await;
    mount_listing(&server, "/books", &[book(1)], 10, 1).await;
    mount_listing(
        &server,
        "/chapters",
        &[json!({"id": 2, "name": "Setup", "slug": "setup", "book_slug": "book-1", "description": ""})],
        10,
        1,
    )
    .await;
    mount_listing(
        &server,
        "/shelves",
        &[json!({"id": 3, "name": "Ops", "slug": "ops", "description": "Runbooks"})],
        10,
        1,
    )
    .await;
    mount_listing(&server, "/pages", &[page(4, "book-1")], 10, 1).await;
    mount_page_detail(&server, 4, "<p>Restart the service.</p>").await;

    let batches = drain(&connector(&server, 10)).await;
    let docs: Vec<&Document> = batches.iter().flatten().collect();
    let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["book__1", "chapter__2", "shelf:3", "page:4"]);

    let base = server.uri();
    assert_eq!(docs[0].sections[0].link.as_deref(), Some(format!("{}/books/book-1", base).as_str()));
    assert_eq!(docs[0].text(), "Book 1\nAbout things");
    assert_eq!(docs[0].semantic_identifier, "Book: Book 1");
    assert_eq!(
        docs[1].sections[0].link.as_deref(),
        Some(format!("{}/books/book-1/chapter/setup", base).as_str())
    );
    assert_eq!(docs[2].semantic_identifier, "Shelf: Ops");

    let page = docs[3];
    assert_eq!(
        page.sections[0].link.as_deref(),
        Some(format!("{}/books/book-1/page/page-4", base).as_str())
    );
    assert_eq!(page.text(), "Page 4\nRestart the service.");
    assert_eq!(page.title.as_deref(), Some("Page 4"));
    assert_eq!(
        page.doc_updated_at.map(|t| t.to_rfc3339()),
        Some("2024-03-05T12:00:00+00:00".to_string())
    );
    assert!(matches!(
        page.metadata.get("type"),
        Some(docsync::models::MetadataValue::Text(t)) if t == "page"
    ));
}

#[tokio::test]
async fn poll_sends_window_and_is_idempotent() {
    let server = MockServer::start().await;
    let books: Vec<Value> = (1..=3).map(book).collect();
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .and(query_param("filter[updated_at:gte]", "2024-01-01 00:00:00"))
        .and(query_param("filter[updated_at:lte]", "2024-01-02 00:00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": books })))
        .expect(2)
        .mount(&server)
        .await;
    for endpoint in ["/chapters", "/shelves", "/pages"] {
        mount_empty(&server, endpoint).await;
    }

    let connector = connector(&server, 10);
    let start = 1_704_067_200.0;
    let end = start + 86_400.0;

    let mut runs = Vec::new();
    for _ in 0..2 {
        let mut docs = Vec::new();
        let mut batches = connector.poll_source(start, end).unwrap();
        while let Some(batch) = batches.next().await {
            docs.extend(batch.unwrap());
        }
        runs.push(docs);
    }
    assert_eq!(runs[0].len(), 3);
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn empty_window_makes_no_requests() {
    let server = MockServer::start().await;
    let connector = connector(&server, 10);

    let mut batches = connector.poll_source(1_000.0, 1_000.0).unwrap();
    assert!(batches.next().await.is_none());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn listing_error_ends_batch_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let conn = connector(&server, 10);
    let mut batches = conn.load_from_state().unwrap();
    let first = batches.next().await.unwrap();
    assert!(matches!(first, Err(ConnectorError::Api(_))));
    assert!(batches.next().await.is_none());
}

#[tokio::test]
async fn failing_page_detail_is_skipped_in_full_load() {
    let server = MockServer::start().await;
    mount_empty(&server, "/books").await;
    mount_empty(&server, "/chapters").await;
    mount_empty(&server, "/shelves").await;
    let pages: Vec<Value> = (1..=5).map(|id| page(id, "ops")).collect();
    mount_listing(&server, "/pages", &pages, 10, 1).await;
    for id in [1, 2, 4, 5] {
        mount_page_detail(&server, id, "<p>ok</p>").await;
    }
    Mock::given(method("GET"))
        .and(path("/api/pages/3"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let batches = drain(&connector(&server, 10)).await;
    let ids: Vec<&str> = batches.iter().flatten().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["page:1", "page:2", "page:4", "page:5"]);
}

// ─── Redaction ──────────────────────────────────────────────────────

#[tokio::test]
async fn redacted_records_become_placeholders_without_detail_fetch() {
    let server = MockServer::start().await;
    let mut archived = book(2);
    archived["slug"] = json!("isms-archive-2021");
    mount_listing(&server, "/books", &[book(1), archived], 10, 1).await;
    mount_empty(&server, "/chapters").await;
    mount_empty(&server, "/shelves").await;
    mount_listing(
        &server,
        "/pages",
        &[page(7, "book-1"), page(8, "app-drafts")],
        10,
        1,
    )
    .await;
    mount_page_detail(&server, 7, "<p>Visible</p>").await;
    Mock::given(method("GET"))
        .and(path("/api/pages/8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"html": "<p>secret</p>"})))
        .expect(0)
        .mount(&server)
        .await;

    let docs: Vec<Document> = drain(&connector(&server, 10)).await.into_iter().flatten().collect();
    let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["book__1", "book__0", "page:7", "page:0"]);

    for redacted in [&docs[1], &docs[3]] {
        assert_eq!(redacted.title.as_deref(), Some("REDACTED"));
        assert!(redacted.semantic_identifier.ends_with(": REDACTED"));
        assert_eq!(redacted.text(), "");
        assert!(redacted.doc_updated_at.is_none());
    }
    assert_eq!(docs[3].semantic_identifier, "Page: REDACTED");
}

// ─── Slim listing ───────────────────────────────────────────────────

#[tokio::test]
async fn slim_listing_reports_progress_and_honours_stop() {
    let server = MockServer::start().await;
    let books: Vec<Value> = (1..=4).map(book).collect();
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": &books[..2] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": &books[2..] })))
        .expect(0)
        .mount(&server)
        .await;

    let connector = connector(&server, 2);
    let progress = Arc::new(RecordingProgress::stopping_after(1));
    let reporter: Arc<dyn SyncProgressReporter> = progress.clone();
    let mut batches = connector
        .retrieve_all_slim_documents(None, None, Some(reporter))
        .unwrap();

    let first = batches.next().await.unwrap().unwrap();
    let ids: Vec<&str> = first.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["book__1", "book__2"]);
    assert!(batches.next().await.is_none());

    assert_eq!(
        progress.events(),
        vec![SyncProgressEvent::Listing {
            connector: "wiki:handbook".to_string(),
            entity: "book".to_string(),
            n: 2,
        }]
    );
}

#[tokio::test]
async fn slim_listing_never_fetches_page_details() {
    let server = MockServer::start().await;
    mount_empty(&server, "/books").await;
    mount_empty(&server, "/chapters").await;
    mount_empty(&server, "/shelves").await;
    mount_listing(&server, "/pages", &[page(1, "ops"), page(2, "sap-drafts")], 10, 1).await;

    let connector = connector(&server, 10);
    let mut batches = connector.retrieve_all_slim_documents(None, None, None).unwrap();
    let batch = batches.next().await.unwrap().unwrap();
    let ids: Vec<&str> = batch.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["page:1", "page:0"]);

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.iter().all(|r| !r.url.path().starts_with("/api/pages/")));
}

// ─── Checkpointed sync ──────────────────────────────────────────────

/// Call `load_from_checkpoint` over one window until it reports no more work.
async fn run_window(
    connector: &WikiConnector,
    start: f64,
    end: f64,
    mut cp: WikiCheckpoint,
) -> (Vec<DocumentOrFailure>, WikiCheckpoint) {
    let mut items = Vec::new();
    for _ in 0..20 {
        let output = connector.load_from_checkpoint(start, end, cp).unwrap();
        let (batch, next) = output.collect_all().await.unwrap();
        items.extend(batch);
        cp = next;
        if !cp.has_more {
            return (items, cp);
        }
    }
    panic!("checkpointed sync did not terminate");
}

async fn run_to_completion(connector: &WikiConnector, cp: WikiCheckpoint) -> Vec<DocumentOrFailure> {
    run_window(connector, 0.0, 2_000_000_000.0, cp).await.0
}

fn document_ids(items: &[DocumentOrFailure]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            DocumentOrFailure::Document(d) => Some(d.id.clone()),
            DocumentOrFailure::Failure(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn failing_item_becomes_failure_record_in_order() {
    let server = MockServer::start().await;
    mount_empty(&server, "/books").await;
    mount_empty(&server, "/chapters").await;
    mount_empty(&server, "/shelves").await;
    let pages: Vec<Value> = (1..=5).map(|id| page(id, "ops")).collect();
    mount_listing(&server, "/pages", &pages, 10, 1).await;
    for id in [1, 2, 4, 5] {
        mount_page_detail(&server, id, "<p>ok</p>").await;
    }
    Mock::given(method("GET"))
        .and(path("/api/pages/3"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let connector = connector(&server, 10);
    let items = run_to_completion(&connector, connector.build_dummy_checkpoint()).await;

    assert_eq!(items.len(), 5);
    let summary: Vec<String> = items
        .iter()
        .map(|item| match item {
            DocumentOrFailure::Document(d) => d.id.clone(),
            DocumentOrFailure::Failure(f) => match &f.failed_entity {
                FailedEntity::Document { document_id, .. } => format!("failed {}", document_id),
                FailedEntity::Batch { description } => format!("batch {}", description),
            },
        })
        .collect();
    assert_eq!(summary, vec!["page:1", "page:2", "failed page:3", "page:4", "page:5"]);
}

#[tokio::test]
async fn checkpoint_resumes_after_last_page() {
    let server = MockServer::start().await;
    let books: Vec<Value> = (1..=5).map(book).collect();
    mount_listing(&server, "/books", &books, 2, 1).await;
    mount_empty(&server, "/chapters").await;
    mount_empty(&server, "/shelves").await;
    mount_empty(&server, "/pages").await;

    let connector = connector(&server, 2);

    let (first, cp) = connector
        .load_from_checkpoint(0.0, 2_000_000_000.0, connector.build_dummy_checkpoint())
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(
        cp,
        WikiCheckpoint {
            has_more: true,
            cursor: PageCursor {
                entity_index: 0,
                offset: 2
            }
        }
    );

    let rest = run_to_completion(&connector, cp).await;
    assert_eq!(document_ids(&rest), vec!["book__3", "book__4", "book__5"]);
}

#[tokio::test]
async fn finished_checkpoint_starts_the_next_window() {
    let server = MockServer::start().await;
    for (gte, lte, id) in [
        ("1970-01-01 00:00:00", "1970-01-01 00:16:40", 1),
        ("1970-01-01 00:16:40", "1970-01-01 00:33:20", 2),
    ] {
        Mock::given(method("GET"))
            .and(path("/api/books"))
            .and(query_param("filter[updated_at:gte]", gte))
            .and(query_param("filter[updated_at:lte]", lte))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [book(id)] })))
            .expect(1)
            .mount(&server)
            .await;
    }
    for endpoint in ["/chapters", "/shelves", "/pages"] {
        mount_empty(&server, endpoint).await;
    }

    let connector = connector(&server, 10);
    let (first, cp) = run_window(&connector, 0.0, 1_000.0, connector.build_dummy_checkpoint()).await;
    assert_eq!(document_ids(&first), vec!["book__1"]);
    assert_eq!(
        cp,
        WikiCheckpoint {
            has_more: false,
            cursor: PageCursor::default()
        }
    );

    let (second, cp) = run_window(&connector, 1_000.0, 2_000.0, cp).await;
    assert_eq!(document_ids(&second), vec!["book__2"]);
    assert!(!cp.has_more);
}

#[tokio::test]
async fn checkpoint_is_not_available_before_drain() {
    let server = MockServer::start().await;
    mount_listing(&server, "/books", &[book(1), book(2)], 10, 1).await;

    let connector = connector(&server, 10);
    let mut output = connector
        .load_from_checkpoint(0.0, 2_000_000_000.0, connector.build_dummy_checkpoint())
        .unwrap();
    assert!(output.next().await.is_some());
    assert!(matches!(
        output.into_checkpoint(),
        Err(ConnectorError::CheckpointNotReady)
    ));
}

#[tokio::test]
async fn blob_api_round_trips_and_rejects_foreign_checkpoints() {
    let server = MockServer::start().await;
    mount_empty(&server, "/shelves").await;
    let connector = connector(&server, 10);
    let resumable: &dyn DynCheckpointConnector = connector.as_checkpoint().unwrap();

    let fresh = resumable.fresh_checkpoint().unwrap();
    assert!(fresh.has_more);

    let at_shelves = encode_checkpoint(&WikiCheckpoint {
        has_more: true,
        cursor: PageCursor {
            entity_index: 2,
            offset: 0,
        },
    })
    .unwrap();
    let (items, next) = resumable
        .load_from_checkpoint_blob(0.0, 2_000_000_000.0, &at_shelves)
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert!(items.is_empty());
    let next = next.unwrap();
    assert!(next.has_more);
    assert!(next.blob.contains("\"entity_index\":3"));

    let foreign = r#"{"kind":"jira","version":1,"state":{}}"#;
    assert!(matches!(
        resumable.load_from_checkpoint_blob(0.0, 1.0, foreign).err(),
        Some(ConnectorError::IncompatibleCheckpoint(_))
    ));
    let future = r#"{"kind":"wiki","version":7,"state":{"has_more":true,"entity_index":0,"offset":0}}"#;
    assert!(matches!(
        resumable.load_from_checkpoint_blob(0.0, 1.0, future).err(),
        Some(ConnectorError::IncompatibleCheckpoint(_))
    ));
}

#[tokio::test]
async fn empty_window_checkpoint_finishes_immediately() {
    let server = MockServer::start().await;
    let connector = connector(&server, 10);
    let (items, cp) = connector
        .load_from_checkpoint(500.0, 500.0, connector.build_dummy_checkpoint())
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert!(items.is_empty());
    assert!(!cp.has_more);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

// ─── Events ─────────────────────────────────────────────────────────

#[tokio::test]
async fn page_update_event_refetches_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pages/12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 12,
            "name": "Deploy",
            "slug": "deploy",
            "book_slug": "ops",
            "html": "<p>Ship it.</p>",
            "updated_at": "2024-04-01T00:00:00.000000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let connector = connector(&server, 10);
    let event = json!({
        "event": "page_update",
        "text": "Jo updated page \"Deploy\"",
        "related_item": { "id": 12, "name": "Deploy", "book_id": 1 }
    });
    let batches: Vec<_> = connector.handle_event(event).unwrap().collect().await;
    assert_eq!(batches.len(), 1);
    let docs = batches.into_iter().next().unwrap().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "page:12");
    assert_eq!(docs[0].text(), "Deploy\nShip it.");
    assert_eq!(
        docs[0].sections[0].link.as_deref(),
        Some(format!("{}/books/ops/page/deploy", server.uri()).as_str())
    );
}

#[tokio::test]
async fn bookshelf_event_maps_to_shelf() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/shelves/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 3, "name": "Ops", "slug": "ops", "description": "Runbooks"
        })))
        .mount(&server)
        .await;

    let connector = connector(&server, 10);
    let event = json!({ "event": "bookshelf_create", "related_item": { "id": 3 } });
    let mut stream = connector.handle_event(event).unwrap();
    let docs = stream.next().await.unwrap().unwrap();
    assert_eq!(docs[0].id, "shelf:3");
}

#[tokio::test]
async fn delete_and_unknown_events_yield_nothing() {
    let server = MockServer::start().await;
    let connector = connector(&server, 10);

    for name in ["page_delete", "auth_login", "webhook"] {
        let event = json!({ "event": name, "related_item": { "id": 1 } });
        let mut stream = connector.handle_event(event).unwrap();
        assert!(stream.next().await.is_none(), "{} produced documents", name);
    }
    assert!(server.received_requests().await.unwrap_or_default().is_empty());

    let err = connector
        .handle_event(json!({ "event": "page_update", "related_item": {} }))
        .err();
    assert!(matches!(err, Some(ConnectorError::Unsupported(_))));
}

#[tokio::test]
async fn redacted_event_skips_fetch() {
    let server = MockServer::start().await;
    let connector = connector(&server, 10);
    let event = json!({
        "event": "chapter_update",
        "related_item": { "id": 9, "book_slug": "policies-editor" }
    });
    let docs = connector.handle_event(event).unwrap().next().await.unwrap().unwrap();
    assert_eq!(docs[0].id, "chapter__0");
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
