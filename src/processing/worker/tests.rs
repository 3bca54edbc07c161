use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

use super::*;
use crate::chunking::ChunkingLimits;
use crate::config::{Config, EmbeddingConfig};
use crate::database::Database;
use crate::database::models::{DocumentStatus, NewDocument, NewExpert};
use crate::database::queries::{DocumentQueries, ExpertQueries};
use crate::embeddings::EmbeddingClient;
use crate::extraction::{ExtractedText, FileType, TextExtractor};
use crate::processing::tests::EmbeddingStub;
use crate::vector_store::VectorStoreClient;

struct StaticExtractor;

impl TextExtractor for StaticExtractor {
    fn extract(&self, _path: &Path, _file_type: FileType) -> crate::Result<ExtractedText> {
        Ok(ExtractedText {
            text: "Dieser Absatz enthält ausreichend Inhalt für einen einzelnen Chunk."
                .to_string(),
            page_count: 1,
        })
    }
}

async fn setup(server: &MockServer) -> (Arc<DocumentProcessor>, Database, i64, TempDir) {
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
            dimension: 8,
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

    let processor = Arc::new(DocumentProcessor::new(
        database.clone(),
        vector_store,
        embedder,
        Arc::new(StaticExtractor),
        ChunkingLimits::default(),
    ));

    (processor, database, expert.id, dir)
}

async fn create_document(database: &Database, expert_id: i64, name: &str) -> i64 {
    DocumentQueries::create(
        database.pool(),
        NewDocument {
            expert_id,
            name: name.to_string(),
            file_path: format!("/uploads/{name}"),
            file_type: None,
            file_size: 128,
        },
        FileType::Txt,
    )
    .await
    .expect("can create document")
    .id
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_drains_the_queue_before_stopping() {
    let server = MockServer::start().await;
    let (processor, database, expert_id, _dir) = setup(&server).await;

    let first = create_document(&database, expert_id, "a.txt").await;
    let second = create_document(&database, expert_id, "b.txt").await;

    let worker = ProcessingWorker::spawn(processor);
    worker.enqueue(first).expect("enqueue succeeds");
    worker.enqueue(second).expect("enqueue succeeds");
    worker.shutdown().await;

    for id in [first, second] {
        let document = DocumentQueries::get_by_id(database.pool(), id)
            .await
            .expect("query succeeds")
            .expect("document exists");
        assert_eq!(document.status, DocumentStatus::Completed);
        assert!(document.chunk_count >= 1);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_handles_reprocess_jobs() {
    let server = MockServer::start().await;
    let (processor, database, expert_id, _dir) = setup(&server).await;

    let document_id = create_document(&database, expert_id, "a.txt").await;

    let worker = ProcessingWorker::spawn(processor);
    worker.enqueue(document_id).expect("enqueue succeeds");
    worker
        .enqueue_reprocess(document_id)
        .expect("enqueue succeeds");
    worker.shutdown().await;

    let document = DocumentQueries::get_by_id(database.pool(), document_id)
        .await
        .expect("query succeeds")
        .expect("document exists");
    assert_eq!(document.status, DocumentStatus::Completed);
}
