use std::time::Duration;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::test_support::{
    ScriptedEmbedder, TEST_DIMENSION, TEST_MODEL, WrongDimensionEmbedder, temp_database,
};

const CHUNKING: ChunkingConfig = ChunkingConfig {
    chunk_size: 120,
    chunk_overlap: 20,
};

struct Harness {
    _temp_dir: TempDir,
    database: Database,
    index: Arc<VectorIndex>,
    pipeline: IngestionPipeline,
}

async fn harness(embedder: Arc<dyn Embedder>, settings: IngestionConfig) -> Harness {
    let (temp_dir, database) = temp_database().await;
    let index = Arc::new(VectorIndex::new(TEST_MODEL, TEST_DIMENSION));
    let pipeline = IngestionPipeline::new(
        database.clone(),
        Arc::clone(&index),
        embedder,
        CHUNKING,
        settings,
    );
    Harness {
        _temp_dir: temp_dir,
        database,
        index,
        pipeline,
    }
}

async fn default_harness() -> Harness {
    harness(Arc::new(ScriptedEmbedder::new()), IngestionConfig::default()).await
}

fn document_text(topic: &str, sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("Sentence {} explains part {} of {}. ", i, i, topic))
        .collect::<Vec<_>>()
        .join("")
}

fn request(external_id: &str, content: &str) -> IngestRequest {
    IngestRequest {
        external_id: external_id.to_string(),
        title: format!("Document {}", external_id),
        description: None,
        content: content.to_string(),
        callback_url: None,
    }
}

async fn chunk_count(database: &Database, external_id: &str) -> i64 {
    let document = database
        .get_document(external_id)
        .await
        .expect("lookup")
        .expect("document exists");
    database.count_chunks(document.id).await.expect("count")
}

#[tokio::test]
async fn ingest_processes_all_chunks() {
    let h = default_harness().await;
    let content = document_text("ownership", 20);
    let expected = CHUNKING.split(&content).expect("split").len();
    assert!(expected > 3);

    let response = h
        .pipeline
        .ingest(request("doc-1", &content))
        .await
        .expect("ingest accepted");
    assert_eq!(response.status, IngestionStatus::Pending);
    assert_eq!(response.external_id, "doc-1");

    let record = h.pipeline.wait("doc-1").await.expect("status");
    assert_eq!(record.status, IngestionStatus::Completed);
    assert_eq!(record.total_chunks, expected as i64);
    assert_eq!(record.chunks_processed, expected as i64);
    assert!(record.completed_at.is_some());

    assert_eq!(chunk_count(&h.database, "doc-1").await, expected as i64);
    assert_eq!(h.index.len(), expected);
    assert!(!h.pipeline.is_running("doc-1"));
}

#[tokio::test]
async fn chunks_are_stored_in_order() {
    let h = default_harness().await;
    let content = document_text("borrowing", 12);

    h.pipeline
        .ingest(request("doc-1", &content))
        .await
        .expect("ingest accepted");
    h.pipeline.wait("doc-1").await.expect("status");

    let document = h
        .database
        .get_document("doc-1")
        .await
        .expect("lookup")
        .expect("exists");
    let chunks = h.database.list_chunks(document.id).await.expect("chunks");
    let expected = CHUNKING.split(&content).expect("split");

    let positions: Vec<i64> = chunks.iter().map(|c| c.position).collect();
    let texts: Vec<String> = chunks.into_iter().map(|c| c.content).collect();
    assert_eq!(positions, (0..expected.len() as i64).collect::<Vec<_>>());
    assert_eq!(texts, expected);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let h = default_harness().await;

    let mut empty_id = request("doc-1", "content");
    empty_id.external_id = "  ".to_string();
    let mut empty_title = request("doc-1", "content");
    empty_title.title = String::new();
    let empty_content = request("doc-1", "   \n");
    let mut bad_callback = request("doc-1", "content");
    bad_callback.callback_url = Some("not a url".to_string());

    for invalid in [empty_id, empty_title, empty_content, bad_callback] {
        let error = h
            .pipeline
            .ingest(invalid)
            .await
            .expect_err("request is invalid");
        assert!(matches!(error, RagError::InvalidInput(_)), "got {:?}", error);
    }

    assert!(h.database.get_document("doc-1").await.expect("lookup").is_none());
}

#[tokio::test]
async fn reingest_replaces_previous_chunks() {
    let h = default_harness().await;

    h.pipeline
        .ingest(request("doc-1", &document_text("lifetimes", 30)))
        .await
        .expect("first ingest");
    h.pipeline.wait("doc-1").await.expect("status");

    let second = document_text("traits", 6);
    let expected = CHUNKING.split(&second).expect("split").len();
    let mut replacement = request("doc-1", &second);
    replacement.title = "Renamed".to_string();

    h.pipeline.ingest(replacement).await.expect("second ingest");
    let record = h.pipeline.wait("doc-1").await.expect("status");

    assert_eq!(record.status, IngestionStatus::Completed);
    assert_eq!(chunk_count(&h.database, "doc-1").await, expected as i64);
    assert_eq!(h.index.len(), expected);

    let document = h
        .database
        .get_document("doc-1")
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(document.title, "Renamed");
}

#[tokio::test]
async fn concurrent_ingest_is_rejected_by_default() {
    let embedder = Arc::new(ScriptedEmbedder::new().with_delay(Duration::from_millis(20)));
    let h = harness(embedder, IngestionConfig::default()).await;
    let content = document_text("generics", 20);

    h.pipeline
        .ingest(request("doc-1", &content))
        .await
        .expect("first ingest");
    let error = h
        .pipeline
        .ingest(request("doc-1", &content))
        .await
        .expect_err("run already active");

    assert!(matches!(error, RagError::ConcurrentIngestionConflict(id) if id == "doc-1"));

    let record = h.pipeline.wait("doc-1").await.expect("status");
    assert_eq!(record.status, IngestionStatus::Completed);
}

#[tokio::test]
async fn other_documents_ingest_in_parallel() {
    let embedder = Arc::new(ScriptedEmbedder::new().with_delay(Duration::from_millis(5)));
    let h = harness(embedder, IngestionConfig::default()).await;

    h.pipeline
        .ingest(request("doc-1", &document_text("one", 10)))
        .await
        .expect("first document");
    h.pipeline
        .ingest(request("doc-2", &document_text("two", 10)))
        .await
        .expect("second document");

    assert_eq!(
        h.pipeline.wait("doc-1").await.expect("status").status,
        IngestionStatus::Completed
    );
    assert_eq!(
        h.pipeline.wait("doc-2").await.expect("status").status,
        IngestionStatus::Completed
    );
    assert_eq!(h.index.document_count(), 2);
}

#[tokio::test]
async fn supersede_replaces_active_run() {
    let embedder = Arc::new(ScriptedEmbedder::new().with_delay(Duration::from_millis(20)));
    let settings = IngestionConfig {
        on_conflict: ConflictPolicy::Supersede,
        ..IngestionConfig::default()
    };
    let h = harness(embedder, settings).await;

    h.pipeline
        .ingest(request("doc-1", &document_text("first version", 40)))
        .await
        .expect("first ingest");

    let second = document_text("second version", 5);
    let expected = CHUNKING.split(&second).expect("split");
    h.pipeline
        .ingest(request("doc-1", &second))
        .await
        .expect("superseding ingest");

    let record = h.pipeline.wait("doc-1").await.expect("status");
    assert_eq!(record.status, IngestionStatus::Completed);
    assert_eq!(record.total_chunks, expected.len() as i64);

    let document = h
        .database
        .get_document("doc-1")
        .await
        .expect("lookup")
        .expect("exists");
    let stored: Vec<String> = h
        .database
        .list_chunks(document.id)
        .await
        .expect("chunks")
        .into_iter()
        .map(|c| c.content)
        .collect();
    assert_eq!(stored, expected);
    assert_eq!(h.index.len(), expected.len());
}

#[tokio::test]
async fn backend_failure_keeps_committed_prefix() {
    let embedder = Arc::new(ScriptedEmbedder::new().failing_after(3));
    let h = harness(embedder, IngestionConfig::default()).await;

    h.pipeline
        .ingest(request("doc-1", &document_text("closures", 20)))
        .await
        .expect("ingest accepted");
    let record = h.pipeline.wait("doc-1").await.expect("status");

    assert_eq!(record.status, IngestionStatus::Failed);
    assert!(
        record
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("offline")),
        "reason retained: {:?}",
        record.error_message
    );
    assert_eq!(record.chunks_processed, 3);
    assert_eq!(chunk_count(&h.database, "doc-1").await, 3);
    assert_eq!(h.index.len(), 3);
}

#[tokio::test]
async fn wrong_dimension_fails_run() {
    let h = harness(Arc::new(WrongDimensionEmbedder), IngestionConfig::default()).await;

    h.pipeline
        .ingest(request("doc-1", &document_text("macros", 5)))
        .await
        .expect("ingest accepted");
    let record = h.pipeline.wait("doc-1").await.expect("status");

    assert_eq!(record.status, IngestionStatus::Failed);
    assert!(
        record
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("dimension"))
    );
    assert_eq!(chunk_count(&h.database, "doc-1").await, 0);
}

#[tokio::test]
async fn cancel_discards_partial_work() {
    let embedder = Arc::new(ScriptedEmbedder::new().with_delay(Duration::from_millis(50)));
    let h = harness(Arc::clone(&embedder) as Arc<dyn Embedder>, IngestionConfig::default()).await;

    h.pipeline
        .ingest(request("doc-1", &document_text("iterators", 40)))
        .await
        .expect("ingest accepted");
    tokio::time::sleep(Duration::from_millis(180)).await;

    let record = h.pipeline.cancel("doc-1").await.expect("cancel");
    assert_eq!(record.status, IngestionStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some(CANCELLED_REASON));
    assert_eq!(record.chunks_processed, 0);
    assert_eq!(record.total_chunks, 0);
    assert_eq!(chunk_count(&h.database, "doc-1").await, 0);
    assert!(h.index.is_empty());
    assert!(!h.pipeline.is_running("doc-1"));

    let calls_after_cancel = embedder.calls();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(embedder.calls(), calls_after_cancel);

    let record = h.pipeline.status("doc-1").await.expect("status");
    assert_eq!(record.status, IngestionStatus::Failed);
    assert_eq!(chunk_count(&h.database, "doc-1").await, 0);
}

#[tokio::test]
async fn cancel_aborts_run_after_grace_period() {
    let embedder = Arc::new(ScriptedEmbedder::new().with_delay(Duration::from_secs(30)));
    let settings = IngestionConfig {
        cancel_grace_ms: 50,
        ..IngestionConfig::default()
    };
    let h = harness(embedder, settings).await;

    h.pipeline
        .ingest(request("doc-1", &document_text("async", 10)))
        .await
        .expect("ingest accepted");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = tokio::time::timeout(Duration::from_secs(5), h.pipeline.cancel("doc-1"))
        .await
        .expect("cancel finishes after the grace period")
        .expect("cancel");

    assert_eq!(record.error_message.as_deref(), Some(CANCELLED_REASON));
    assert!(!h.pipeline.is_running("doc-1"));
}

#[tokio::test]
async fn cancel_requires_active_run() {
    let h = default_harness().await;

    let error = h.pipeline.cancel("missing").await.expect_err("unknown id");
    assert!(matches!(error, RagError::NotFound(_)));

    h.pipeline
        .ingest(request("doc-1", &document_text("modules", 3)))
        .await
        .expect("ingest accepted");
    h.pipeline.wait("doc-1").await.expect("status");

    let error = h.pipeline.cancel("doc-1").await.expect_err("already done");
    assert!(matches!(error, RagError::InvalidInput(_)));
}

#[tokio::test]
async fn status_of_unknown_document_is_not_found() {
    let h = default_harness().await;
    let error = h.pipeline.status("nope").await.expect_err("unknown");
    assert!(matches!(error, RagError::NotFound(_)));
}

#[tokio::test]
async fn callbacks_follow_progress_cadence() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = default_harness().await;
    let content = document_text("pattern matching", 30);
    let total = CHUNKING.split(&content).expect("split").len();

    let mut with_callback = request("doc-1", &content);
    with_callback.callback_url = Some(format!("{}/status", server.uri()));
    h.pipeline.ingest(with_callback).await.expect("ingest accepted");
    h.pipeline.wait("doc-1").await.expect("status");

    let received: Vec<StatusNotification> = server
        .received_requests()
        .await
        .expect("recording enabled")
        .iter()
        .map(|r| serde_json::from_slice(&r.body).expect("json body"))
        .collect();

    let mut expected = vec![StatusNotification::processing("doc-1", 0, total as i64)];
    for index in 0..total {
        if callback::should_report_progress(index, total, 5) {
            expected.push(StatusNotification::processing(
                "doc-1",
                index as i64 + 1,
                total as i64,
            ));
        }
    }
    expected.push(StatusNotification::completed("doc-1", total as i64));

    assert_eq!(received, expected);
}

#[tokio::test]
async fn failed_run_reports_reason_by_callback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let embedder = Arc::new(ScriptedEmbedder::new().failing_after(0));
    let h = harness(embedder, IngestionConfig::default()).await;

    let mut with_callback = request("doc-1", &document_text("errors", 4));
    with_callback.callback_url = Some(server.uri());
    h.pipeline.ingest(with_callback).await.expect("ingest accepted");
    h.pipeline.wait("doc-1").await.expect("status");

    let requests = server.received_requests().await.expect("recording enabled");
    let last: StatusNotification =
        serde_json::from_slice(&requests.last().expect("some callbacks").body)
            .expect("json body");

    assert_eq!(last.status, IngestionStatus::Failed);
    assert!(last.error_message.is_some_and(|m| m.contains("offline")));
}

#[tokio::test]
async fn unreachable_callback_does_not_fail_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let h = default_harness().await;
    let mut with_callback = request("doc-1", &document_text("resilience", 8));
    with_callback.callback_url = Some(server.uri());

    h.pipeline.ingest(with_callback).await.expect("ingest accepted");
    let record = h.pipeline.wait("doc-1").await.expect("status");

    assert_eq!(record.status, IngestionStatus::Completed);
}

async fn record_foreign_run(database: &Database, external_id: &str) {
    database
        .reset_ingestion_status(external_id)
        .await
        .expect("reset");
    database
        .mark_ingestion_processing(external_id, 10)
        .await
        .expect("processing");
}

#[tokio::test]
async fn stale_runs_are_recovered() {
    let settings = IngestionConfig {
        stale_after_seconds: 0,
        ..IngestionConfig::default()
    };
    let h = harness(Arc::new(ScriptedEmbedder::new()), settings).await;
    record_foreign_run(&h.database, "ghost").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let recovered = h.pipeline.recover_interrupted().await.expect("recover");
    assert_eq!(recovered, 1);

    let record = h.pipeline.status("ghost").await.expect("status");
    assert_eq!(record.status, IngestionStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some(INTERRUPTED_REASON));
}

#[tokio::test]
async fn recently_active_runs_survive_recovery() {
    let h = default_harness().await;
    record_foreign_run(&h.database, "busy").await;

    let recovered = h.pipeline.recover_interrupted().await.expect("recover");

    assert_eq!(recovered, 0);
    assert_eq!(
        h.pipeline.status("busy").await.expect("status").status,
        IngestionStatus::Processing
    );
}

#[tokio::test]
async fn run_owned_by_another_process_blocks_ingest() {
    let settings = IngestionConfig {
        on_conflict: ConflictPolicy::Supersede,
        ..IngestionConfig::default()
    };
    let h = harness(Arc::new(ScriptedEmbedder::new()), settings).await;
    record_foreign_run(&h.database, "doc-1").await;

    let error = h
        .pipeline
        .ingest(request("doc-1", &document_text("foreign", 3)))
        .await
        .expect_err("foreign run is active");

    assert!(matches!(error, RagError::ConcurrentIngestionConflict(_)));
}

#[tokio::test]
async fn run_stops_when_cancelled_elsewhere() {
    let embedder = Arc::new(ScriptedEmbedder::new().with_delay(Duration::from_millis(30)));
    let h = harness(embedder, IngestionConfig::default()).await;

    h.pipeline
        .ingest(request("doc-1", &document_text("shared state", 40)))
        .await
        .expect("ingest accepted");
    tokio::time::sleep(Duration::from_millis(120)).await;

    // What a `cancel` issued from a second process leaves behind
    let document = h
        .database
        .get_document("doc-1")
        .await
        .expect("lookup")
        .expect("exists");
    h.database
        .delete_document_chunks(document.id)
        .await
        .expect("delete");
    h.database
        .mark_ingestion_cancelled("doc-1", CANCELLED_REASON)
        .await
        .expect("cancelled");

    let record = h.pipeline.wait("doc-1").await.expect("status");

    assert_eq!(record.status, IngestionStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some(CANCELLED_REASON));
    assert_eq!(record.chunks_processed, 0);
    assert_eq!(chunk_count(&h.database, "doc-1").await, 0);
    assert!(h.index.is_empty());
}

#[tokio::test]
async fn run_stops_when_cancelled_elsewhere_before_first_chunk() {
    let embedder = Arc::new(ScriptedEmbedder::new().with_delay(Duration::from_millis(200)));
    let h = harness(embedder, IngestionConfig::default()).await;

    h.pipeline
        .ingest(request("doc-1", &document_text("early exit", 10)))
        .await
        .expect("ingest accepted");
    h.database
        .mark_ingestion_cancelled("doc-1", CANCELLED_REASON)
        .await
        .expect("cancelled");

    let record = h.pipeline.wait("doc-1").await.expect("status");

    assert_eq!(record.status, IngestionStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some(CANCELLED_REASON));
    assert_eq!(record.total_chunks, 0);
    assert_eq!(chunk_count(&h.database, "doc-1").await, 0);
    assert!(h.index.is_empty());
}

#[tokio::test]
async fn status_shows_chunk_total_right_after_ingest() {
    let (_temp_dir, database) = temp_database().await;
    let embedder = Arc::new(ScriptedEmbedder::new().with_delay(Duration::from_millis(20)));
    let pipeline = IngestionPipeline::new(
        database,
        Arc::new(VectorIndex::new(TEST_MODEL, TEST_DIMENSION)),
        embedder,
        ChunkingConfig {
            chunk_size: 500,
            chunk_overlap: 50,
        },
        IngestionConfig::default(),
    );
    let content: String = "The quick brown fox jumps over the lazy dog. "
        .repeat(30)
        .chars()
        .take(1200)
        .collect();

    let response = pipeline
        .ingest(request("doc1", &content))
        .await
        .expect("ingest accepted");
    let record = pipeline.status("doc1").await.expect("status");

    assert_eq!(response.status, IngestionStatus::Pending);
    assert!(matches!(
        record.status,
        IngestionStatus::Processing | IngestionStatus::Completed
    ));
    assert_eq!(record.total_chunks, 3);
    assert!(record.chunks_processed <= record.total_chunks);

    let record = pipeline.wait("doc1").await.expect("status");
    assert_eq!(record.status, IngestionStatus::Completed);
    assert_eq!(record.chunks_processed, 3);
}
