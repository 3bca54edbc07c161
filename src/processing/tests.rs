use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use super::*;
use crate::config::{Config, EmbeddingConfig};
use crate::database::models::{DocumentStatus, NewDocument, NewExpert};
use crate::extraction::{ExtractedText, FileType};

const TEST_DIMENSION: usize = 8;

/// Deterministic bag-of-words embedding so similarity follows word overlap.
fn embed_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; TEST_DIMENSION];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '$')
        .filter(|w| !w.is_empty())
    {
        let bucket = word
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
            % TEST_DIMENSION;
        vector[bucket] += 1.0;
    }
    if vector.iter().all(|v| *v == 0.0) {
        vector[0] = 1.0;
    }
    vector
}

/// Embedding stub computing a vector per input text.
pub(crate) struct EmbeddingStub;

impl Respond for EmbeddingStub {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("request body is JSON");
        let inputs = body["input"].as_array().cloned().unwrap_or_default();

        let data: Vec<serde_json::Value> = inputs
            .iter()
            .enumerate()
            .map(|(index, text)| {
                json!({
                    "embedding": embed_words(text.as_str().unwrap_or_default()),
                    "index": index,
                })
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
    }
}

struct StaticExtractor {
    text: String,
    page_count: u32,
}

impl TextExtractor for StaticExtractor {
    fn extract(&self, _path: &Path, _file_type: FileType) -> crate::Result<ExtractedText> {
        Ok(ExtractedText {
            text: self.text.clone(),
            page_count: self.page_count,
        })
    }
}

struct FailingExtractor;

impl TextExtractor for FailingExtractor {
    fn extract(&self, path: &Path, _file_type: FileType) -> crate::Result<ExtractedText> {
        Err(KbError::Extraction(format!(
            "Failed to read PDF {}: not a PDF",
            path.display()
        )))
    }
}

/// Fails the first call, succeeds afterwards.
struct FlakyExtractor {
    calls: AtomicUsize,
    text: String,
}

impl TextExtractor for FlakyExtractor {
    fn extract(&self, _path: &Path, _file_type: FileType) -> crate::Result<ExtractedText> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(KbError::Extraction("Zeitüberschreitung beim Lesen".to_string()));
        }
        Ok(ExtractedText {
            text: self.text.clone(),
            page_count: 1,
        })
    }
}

struct Fixture {
    processor: DocumentProcessor,
    database: Database,
    vector_store: Arc<VectorStoreClient>,
    expert_id: i64,
    document_id: i64,
    _dir: TempDir,
}

async fn setup(server: &MockServer, extractor: Arc<dyn TextExtractor>) -> Fixture {
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(EmbeddingStub)
        .mount(server)
        .await;

    let dir = TempDir::new().expect("can create temp dir");
    let config = Config {
        embedding: EmbeddingConfig {
            base_url: format!("{}/v1", server.uri()),
            api_key: "test-key".to_string(),
            dimension: TEST_DIMENSION as u32,
            ..EmbeddingConfig::default()
        },
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    };

    let database = Database::new(config.database_path())
        .await
        .expect("can create database");
    let vector_store = Arc::new(
        VectorStoreClient::open(&config)
            .await
            .expect("can open vector store"),
    );
    let embedder = EmbeddingClient::new(&config.embedding).expect("can create client");

    let expert = ExpertQueries::create(
        database.pool(),
        NewExpert {
            owner_id: 1,
            name: "Technik".to_string(),
            description: String::new(),
            system_prompt: None,
        },
    )
    .await
    .expect("can create expert");

    let document = DocumentQueries::create(
        database.pool(),
        NewDocument {
            expert_id: expert.id,
            name: "handbuch.txt".to_string(),
            file_path: "/uploads/handbuch.txt".to_string(),
            file_type: None,
            file_size: 256,
        },
        FileType::Txt,
    )
    .await
    .expect("can create document");

    let processor = DocumentProcessor::new(
        database.clone(),
        Arc::clone(&vector_store),
        embedder,
        extractor,
        ChunkingLimits::default(),
    );

    Fixture {
        processor,
        database,
        vector_store,
        expert_id: expert.id,
        document_id: document.id,
        _dir: dir,
    }
}

fn two_page_text() -> String {
    "[Seite 1]\nWidgets sind vielseitige Bauteile und werden in vielen Anlagen verbaut.\n\n\n[Seite 2]\nDie Preisliste nennt zehn Euro pro Widget ohne Mengenrabatt.\n".to_string()
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_processing_completes_the_document() {
    let server = MockServer::start().await;
    let fixture = setup(
        &server,
        Arc::new(StaticExtractor {
            text: two_page_text(),
            page_count: 2,
        }),
    )
    .await;

    fixture
        .processor
        .process_document(fixture.document_id)
        .await
        .expect("processing succeeds");

    let document = DocumentQueries::get_by_id(fixture.database.pool(), fixture.document_id)
        .await
        .expect("query succeeds")
        .expect("document exists");
    assert_eq!(document.status, DocumentStatus::Completed);
    assert_eq!(document.page_count, 2);
    assert!(document.chunk_count >= 1);
    assert_eq!(document.error_message, None);

    let chunks = ChunkQueries::list_for_document(fixture.database.pool(), fixture.document_id)
        .await
        .expect("list succeeds");
    assert_eq!(chunks.len() as i64, document.chunk_count);
    assert!(chunks.iter().enumerate().all(|(i, c)| c.chunk_index == i as i64));
    assert!(chunks.iter().all(|c| !c.vector_id.is_empty()));

    let vector_count = fixture
        .vector_store
        .count_entries(fixture.expert_id)
        .await
        .expect("count succeeds");
    assert_eq!(vector_count as i64, document.chunk_count);

    let expert = ExpertQueries::get_by_id(fixture.database.pool(), fixture.expert_id)
        .await
        .expect("query succeeds")
        .expect("expert exists");
    assert_eq!(expert.document_count, 1);
    assert_eq!(expert.chunk_count, document.chunk_count);
    assert!(expert.is_indexed);
}

#[tokio::test(flavor = "multi_thread")]
async fn extraction_failure_marks_the_document_failed() {
    let server = MockServer::start().await;
    let fixture = setup(&server, Arc::new(FailingExtractor)).await;

    fixture
        .processor
        .process_document(fixture.document_id)
        .await
        .expect("processing returns Ok, failure is recorded on the document");

    let document = DocumentQueries::get_by_id(fixture.database.pool(), fixture.document_id)
        .await
        .expect("query succeeds")
        .expect("document exists");
    assert_eq!(document.status, DocumentStatus::Failed);
    assert!(
        document
            .error_message
            .as_deref()
            .is_some_and(|m| !m.is_empty())
    );
    assert_eq!(document.chunk_count, 0);

    // The expert's aggregates are untouched by the failed attempt
    let expert = ExpertQueries::get_by_id(fixture.database.pool(), fixture.expert_id)
        .await
        .expect("query succeeds")
        .expect("expert exists");
    assert_eq!(expert.document_count, 0);
    assert_eq!(expert.chunk_count, 0);
    assert!(!expert.is_indexed);
}

#[tokio::test(flavor = "multi_thread")]
async fn blank_extraction_fails_with_the_sentinel_message() {
    let server = MockServer::start().await;
    let fixture = setup(
        &server,
        Arc::new(StaticExtractor {
            text: "   \n\n ".to_string(),
            page_count: 1,
        }),
    )
    .await;

    fixture
        .processor
        .process_document(fixture.document_id)
        .await
        .expect("processing returns Ok");

    let document = DocumentQueries::get_by_id(fixture.database.pool(), fixture.document_id)
        .await
        .expect("query succeeds")
        .expect("document exists");
    assert_eq!(document.status, DocumentStatus::Failed);
    assert_eq!(
        document.error_message.as_deref(),
        Some("Keine Textinhalte im Dokument gefunden")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn documents_that_are_not_pending_are_skipped() {
    let server = MockServer::start().await;
    let fixture = setup(
        &server,
        Arc::new(StaticExtractor {
            text: two_page_text(),
            page_count: 2,
        }),
    )
    .await;

    DocumentQueries::mark_completed(fixture.database.pool(), fixture.document_id, 3)
        .await
        .expect("mark_completed succeeds");

    fixture
        .processor
        .process_document(fixture.document_id)
        .await
        .expect("skipping is not an error");

    let document = DocumentQueries::get_by_id(fixture.database.pool(), fixture.document_id)
        .await
        .expect("query succeeds")
        .expect("document exists");
    // Untouched: the claim was lost, no pipeline ran
    assert_eq!(document.status, DocumentStatus::Completed);
    assert_eq!(document.chunk_count, 3);

    let chunks = ChunkQueries::list_for_document(fixture.database.pool(), fixture.document_id)
        .await
        .expect("list succeeds");
    assert!(chunks.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_document_is_an_error() {
    let server = MockServer::start().await;
    let fixture = setup(&server, Arc::new(FailingExtractor)).await;

    let result = fixture.processor.process_document(9999).await;
    assert!(matches!(result, Err(KbError::Database(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn reprocessing_replaces_chunks_and_vectors() {
    let server = MockServer::start().await;
    let fixture = setup(
        &server,
        Arc::new(StaticExtractor {
            text: two_page_text(),
            page_count: 2,
        }),
    )
    .await;

    fixture
        .processor
        .process_document(fixture.document_id)
        .await
        .expect("processing succeeds");

    let old_chunks = ChunkQueries::list_for_document(fixture.database.pool(), fixture.document_id)
        .await
        .expect("list succeeds");
    let old_vector_ids: Vec<String> = old_chunks.iter().map(|c| c.vector_id.clone()).collect();
    assert!(!old_vector_ids.is_empty());

    fixture
        .processor
        .reprocess_document(fixture.document_id)
        .await
        .expect("reprocessing succeeds");

    let document = DocumentQueries::get_by_id(fixture.database.pool(), fixture.document_id)
        .await
        .expect("query succeeds")
        .expect("document exists");
    assert_eq!(document.status, DocumentStatus::Completed);
    assert!(document.chunk_count >= 1);

    // Fresh ids everywhere; the old vector entries are gone
    let new_chunks = ChunkQueries::list_for_document(fixture.database.pool(), fixture.document_id)
        .await
        .expect("list succeeds");
    assert!(new_chunks.iter().all(|c| !old_vector_ids.contains(&c.vector_id)));

    let vector_count = fixture
        .vector_store
        .count_entries(fixture.expert_id)
        .await
        .expect("count succeeds");
    assert_eq!(vector_count as i64, document.chunk_count);

    let query_vector = embed_words("Preisliste zehn Euro Widget");
    let hits = fixture
        .vector_store
        .query(fixture.expert_id, &query_vector, 10, 2.0, 1)
        .await
        .expect("query succeeds");
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| !old_vector_ids.contains(&h.vector_id)));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_document_recovers_via_reprocess() {
    let server = MockServer::start().await;
    let fixture = setup(
        &server,
        Arc::new(FlakyExtractor {
            calls: AtomicUsize::new(0),
            text: two_page_text(),
        }),
    )
    .await;

    fixture
        .processor
        .process_document(fixture.document_id)
        .await
        .expect("processing returns Ok");
    let failed = DocumentQueries::get_by_id(fixture.database.pool(), fixture.document_id)
        .await
        .expect("query succeeds")
        .expect("document exists");
    assert_eq!(failed.status, DocumentStatus::Failed);

    // A failed document is terminal; only reprocess runs the pipeline again
    fixture
        .processor
        .process_document(fixture.document_id)
        .await
        .expect("skipping is not an error");
    fixture
        .processor
        .reprocess_document(fixture.document_id)
        .await
        .expect("reprocessing succeeds");

    let recovered = DocumentQueries::get_by_id(fixture.database.pool(), fixture.document_id)
        .await
        .expect("query succeeds")
        .expect("document exists");
    assert_eq!(recovered.status, DocumentStatus::Completed);
    assert!(recovered.chunk_count >= 1);
    assert_eq!(recovered.error_message, None);
}
