use super::*;
use crate::database::Database;
use crate::database::models::DocumentStatus;
use tempfile::TempDir;

async fn create_test_database() -> (Database, TempDir) {
    let dir = TempDir::new().expect("can create temp dir");
    let database = Database::new(dir.path().join("metadata.db"))
        .await
        .expect("can create database");
    (database, dir)
}

fn new_expert(name: &str) -> NewExpert {
    NewExpert {
        owner_id: 1,
        name: name.to_string(),
        description: String::new(),
        system_prompt: None,
    }
}

fn new_document(expert_id: i64, name: &str) -> NewDocument {
    NewDocument {
        expert_id,
        name: name.to_string(),
        file_path: format!("/uploads/{name}"),
        file_type: None,
        file_size: 512,
    }
}

async fn create_document(pool: &sqlx::SqlitePool, expert_id: i64, name: &str) -> ExpertDocument {
    DocumentQueries::create(pool, new_document(expert_id, name), FileType::Txt)
        .await
        .expect("can create document")
}

#[tokio::test]
async fn expert_creation_applies_defaults() {
    let (database, _dir) = create_test_database().await;
    let expert = ExpertQueries::create(database.pool(), new_expert("Technik"))
        .await
        .expect("can create expert");

    assert_eq!(expert.name, "Technik");
    assert_eq!(expert.system_prompt, DEFAULT_SYSTEM_PROMPT);
    assert!(!expert.is_indexed);
    assert_eq!(expert.document_count, 0);
    assert_eq!(expert.chunk_count, 0);
}

#[tokio::test]
async fn experts_are_listed_by_name() {
    let (database, _dir) = create_test_database().await;
    ExpertQueries::create(database.pool(), new_expert("Zoll"))
        .await
        .expect("can create expert");
    ExpertQueries::create(database.pool(), new_expert("Anlagenbau"))
        .await
        .expect("can create expert");

    let experts = ExpertQueries::list_for_owner(database.pool(), 1)
        .await
        .expect("can list experts");
    let names: Vec<&str> = experts.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Anlagenbau", "Zoll"]);
}

#[tokio::test]
async fn new_documents_start_pending() {
    let (database, _dir) = create_test_database().await;
    let expert = ExpertQueries::create(database.pool(), new_expert("Technik"))
        .await
        .expect("can create expert");
    let document = create_document(database.pool(), expert.id, "notes.txt").await;

    assert_eq!(document.status, DocumentStatus::Pending);
    assert_eq!(document.error_message, None);
    assert_eq!(document.chunk_count, 0);
    assert_eq!(document.file_type, FileType::Txt);
}

#[tokio::test]
async fn processing_claim_is_exactly_once() {
    let (database, _dir) = create_test_database().await;
    let expert = ExpertQueries::create(database.pool(), new_expert("Technik"))
        .await
        .expect("can create expert");
    let document = create_document(database.pool(), expert.id, "notes.txt").await;

    assert!(
        DocumentQueries::claim_processing(database.pool(), document.id)
            .await
            .expect("claim succeeds")
    );
    // A second claim must lose: the document is no longer pending
    assert!(
        !DocumentQueries::claim_processing(database.pool(), document.id)
            .await
            .expect("second claim executes")
    );

    let reloaded = DocumentQueries::get_by_id(database.pool(), document.id)
        .await
        .expect("query succeeds")
        .expect("document exists");
    assert_eq!(reloaded.status, DocumentStatus::Processing);
}

#[tokio::test]
async fn completion_clears_the_error_message() {
    let (database, _dir) = create_test_database().await;
    let expert = ExpertQueries::create(database.pool(), new_expert("Technik"))
        .await
        .expect("can create expert");
    let document = create_document(database.pool(), expert.id, "notes.txt").await;

    DocumentQueries::mark_failed(database.pool(), document.id, "Zeitüberschreitung")
        .await
        .expect("mark_failed succeeds");
    let failed = DocumentQueries::get_by_id(database.pool(), document.id)
        .await
        .expect("query succeeds")
        .expect("document exists");
    assert_eq!(failed.status, DocumentStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("Zeitüberschreitung"));

    DocumentQueries::mark_completed(database.pool(), document.id, 7)
        .await
        .expect("mark_completed succeeds");
    let completed = DocumentQueries::get_by_id(database.pool(), document.id)
        .await
        .expect("query succeeds")
        .expect("document exists");
    assert_eq!(completed.status, DocumentStatus::Completed);
    assert_eq!(completed.chunk_count, 7);
    assert_eq!(completed.error_message, None);
}

#[tokio::test]
async fn recompute_counts_only_counts_completed_documents() {
    let (database, _dir) = create_test_database().await;
    let expert = ExpertQueries::create(database.pool(), new_expert("Technik"))
        .await
        .expect("can create expert");

    let completed = create_document(database.pool(), expert.id, "a.txt").await;
    DocumentQueries::mark_completed(database.pool(), completed.id, 5)
        .await
        .expect("mark_completed succeeds");

    let failed = create_document(database.pool(), expert.id, "b.txt").await;
    DocumentQueries::mark_failed(database.pool(), failed.id, "kaputt")
        .await
        .expect("mark_failed succeeds");

    // still pending
    create_document(database.pool(), expert.id, "c.txt").await;

    ExpertQueries::recompute_counts(database.pool(), expert.id)
        .await
        .expect("recompute succeeds");

    let reloaded = ExpertQueries::get_by_id(database.pool(), expert.id)
        .await
        .expect("query succeeds")
        .expect("expert exists");
    assert_eq!(reloaded.document_count, 1);
    assert_eq!(reloaded.chunk_count, 5);
    assert!(reloaded.is_indexed);
}

#[tokio::test]
async fn recompute_counts_clears_is_indexed_when_empty() {
    let (database, _dir) = create_test_database().await;
    let expert = ExpertQueries::create(database.pool(), new_expert("Technik"))
        .await
        .expect("can create expert");

    sqlx::query("UPDATE experts SET is_indexed = 1, chunk_count = 99 WHERE id = ?")
        .bind(expert.id)
        .execute(database.pool())
        .await
        .expect("update succeeds");

    ExpertQueries::recompute_counts(database.pool(), expert.id)
        .await
        .expect("recompute succeeds");

    let reloaded = ExpertQueries::get_by_id(database.pool(), expert.id)
        .await
        .expect("query succeeds")
        .expect("expert exists");
    assert_eq!(reloaded.chunk_count, 0);
    assert!(!reloaded.is_indexed);
}

#[tokio::test]
async fn chunk_batch_round_trip_preserves_order() {
    let (database, _dir) = create_test_database().await;
    let expert = ExpertQueries::create(database.pool(), new_expert("Technik"))
        .await
        .expect("can create expert");
    let document = create_document(database.pool(), expert.id, "notes.txt").await;

    let chunks: Vec<NewChunk> = (0..3)
        .map(|i| NewChunk {
            document_id: document.id,
            chunk_index: i,
            content: format!("Inhalt {i}"),
            page_number: if i == 2 { Some(2) } else { Some(1) },
            vector_id: format!("doc_{}_chunk_{}_abcd1234", document.id, i),
        })
        .collect();
    ChunkQueries::insert_batch(database.pool(), &chunks)
        .await
        .expect("insert succeeds");

    let stored = ChunkQueries::list_for_document(database.pool(), document.id)
        .await
        .expect("list succeeds");
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().enumerate().all(|(i, c)| c.chunk_index == i as i64));
    assert_eq!(stored[2].page_number, Some(2));

    let by_vector = ChunkQueries::get_by_vector_id(database.pool(), &chunks[1].vector_id)
        .await
        .expect("query succeeds")
        .expect("chunk exists");
    assert_eq!(by_vector.content, "Inhalt 1");
}

#[tokio::test]
async fn deleting_a_document_cascades_to_chunks() {
    let (database, _dir) = create_test_database().await;
    let expert = ExpertQueries::create(database.pool(), new_expert("Technik"))
        .await
        .expect("can create expert");
    let document = create_document(database.pool(), expert.id, "notes.txt").await;

    ChunkQueries::insert_batch(
        database.pool(),
        &[NewChunk {
            document_id: document.id,
            chunk_index: 0,
            content: "Inhalt".to_string(),
            page_number: None,
            vector_id: "doc_1_chunk_0_abcd1234".to_string(),
        }],
    )
    .await
    .expect("insert succeeds");

    assert!(
        DocumentQueries::delete(database.pool(), document.id)
            .await
            .expect("delete succeeds")
    );

    let remaining = ChunkQueries::list_for_document(database.pool(), document.id)
        .await
        .expect("list succeeds");
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn duplicate_vector_ids_are_rejected() {
    let (database, _dir) = create_test_database().await;
    let expert = ExpertQueries::create(database.pool(), new_expert("Technik"))
        .await
        .expect("can create expert");
    let document = create_document(database.pool(), expert.id, "notes.txt").await;

    let chunk = NewChunk {
        document_id: document.id,
        chunk_index: 0,
        content: "Inhalt".to_string(),
        page_number: None,
        vector_id: "doc_1_chunk_0_abcd1234".to_string(),
    };
    ChunkQueries::insert_batch(database.pool(), std::slice::from_ref(&chunk))
        .await
        .expect("first insert succeeds");

    let duplicate = NewChunk {
        chunk_index: 1,
        ..chunk
    };
    assert!(
        ChunkQueries::insert_batch(database.pool(), &[duplicate])
            .await
            .is_err()
    );
}
