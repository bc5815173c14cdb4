//! End-to-end exercise of the ingestion and retrieval pipeline across crate
//! boundaries: submit a document through the orchestrator, poll it to a
//! terminal state, then answer a question against what got indexed.
//!
//! The LLM client is disabled throughout, so extraction degrades to the
//! deterministic seed graph ([`qsr_core::seed_graph`]) and rule-based
//! summary - this is the path every installation without an LLM key takes.

use std::sync::Arc;
use std::time::Duration;

use qsr_core::blob_store::FsBlobStore;
use qsr_core::chunk_index::SqliteChunkIndex;
use qsr_core::citation::VisualCitationStore;
use qsr_core::config::Config;
use qsr_core::degradation::DegradationState;
use qsr_core::graph_store::SqliteGraphStore;
use qsr_core::llm::DisabledLlmClient;
use qsr_core::migrate::run_migrations_on;
use qsr_core::models::Stage;
use qsr_core::orchestrator::Orchestrator;
use qsr_core::progress_store::InMemoryProgressStore;
use qsr_core::retrieval;
use qsr_core::storage::{BlobStore, ChunkIndex, GraphStore, LlmClient, ProgressStore};
use tempfile::tempdir;

async fn wait_for_terminal(orchestrator: &Orchestrator, process_id: &str) -> qsr_core::models::ProgressRecord {
    for _ in 0..100 {
        let record = orchestrator.status(process_id).await.unwrap();
        if record.terminal {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("ingestion never reached a terminal state");
}

#[tokio::test]
async fn upload_then_query_surfaces_seeded_fryer_procedure() {
    let blob_dir = tempdir().unwrap();
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations_on(&pool).await.unwrap();

    let config: Config = toml::from_str("db = { path = \"ignored.db\" }").unwrap();
    let config = Arc::new(config);

    let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(pool.clone()));
    let chunks: Arc<dyn ChunkIndex> = Arc::new(SqliteChunkIndex::new(pool.clone()));
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(blob_dir.path().to_path_buf()));
    let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::default());
    let llm: Arc<dyn LlmClient> = Arc::new(DisabledLlmClient);
    let citations = Arc::new(VisualCitationStore::new(pool));
    let degradation = Arc::new(DegradationState::default());

    let orchestrator = Orchestrator::new(
        config.clone(),
        graph.clone(),
        chunks.clone(),
        blobs,
        progress,
        llm,
        citations.clone(),
        degradation,
    );

    let text = "Daily Fryer Cleaning Procedure\n\n\
        Step 1. Power down the fryer and let the oil cool below 100F.\n\
        Step 2. Drain the oil into an approved container.\n\
        Step 3. Wipe down the heating element and basin.\n\n\
        WARNING: hot oil can cause severe burns. Wear heat-resistant gloves.";

    let result = orchestrator
        .submit(text.as_bytes().to_vec(), "fryer-cleaning.txt".to_string())
        .await
        .unwrap();
    assert!(result.ok, "submission should be accepted: {}", result.message);

    let record = wait_for_terminal(&orchestrator, &result.process_id).await;
    assert_eq!(record.stage, Stage::Verified);

    let query = "how do I clean the fryer";
    let class = retrieval::classify_query(query);
    assert_eq!(class, retrieval::QueryClass::CleaningProcedure);

    let terms = retrieval::extract_key_terms(query);
    let scored_entities = retrieval::retrieve_entities(graph.as_ref(), &terms, 10).await.unwrap();
    assert!(!scored_entities.is_empty(), "seed graph should surface a fryer-related entity");

    let keyword_query = terms.join(" ");
    let keyword_chunks = chunks.as_ref().keyword_search(&keyword_query, 10).await.unwrap();
    assert!(!keyword_chunks.is_empty(), "the indexed chunk should be keyword-retrievable");

    let merged = retrieval::merge_entity_and_vector_chunks(keyword_chunks, Vec::new(), 0.5, 5);
    let citation_hits = citations.list_for_document(&result.document_id).await.unwrap();

    let degraded_documents = retrieval::collect_degraded_documents(graph.as_ref(), &scored_entities, &merged).await.unwrap();
    let response = retrieval::compose_response(query, &scored_entities, &merged, &citation_hits, class, &degraded_documents);
    assert!(response.confidence > 0.0);
    assert!(
        response.steps.iter().any(|s| s.to_lowercase().contains("oil")),
        "composed steps should mention the cleaning procedure: {:?}",
        response.steps
    );
    assert!(
        !response.safety_warnings.is_empty(),
        "the burn hazard line should have been mined as a safety warning"
    );
}

#[tokio::test]
async fn empty_query_against_populated_index_returns_structured_empty_response() {
    let blob_dir = tempdir().unwrap();
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations_on(&pool).await.unwrap();

    let config: Config = toml::from_str("db = { path = \"ignored.db\" }").unwrap();
    let config = Arc::new(config);

    let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(pool.clone()));
    let chunks: Arc<dyn ChunkIndex> = Arc::new(SqliteChunkIndex::new(pool.clone()));
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(blob_dir.path().to_path_buf()));
    let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::default());
    let llm: Arc<dyn LlmClient> = Arc::new(DisabledLlmClient);
    let citations = Arc::new(VisualCitationStore::new(pool));
    let degradation = Arc::new(DegradationState::default());

    let orchestrator = Orchestrator::new(
        config, graph.clone(), chunks.clone(), blobs, progress, llm, citations.clone(), degradation,
    );

    let result = orchestrator
        .submit(
            b"Daily Fryer Cleaning Procedure\n\nStep 1. Power down the fryer.".to_vec(),
            "fryer-cleaning.txt".to_string(),
        )
        .await
        .unwrap();
    wait_for_terminal(&orchestrator, &result.process_id).await;

    // An empty (or whitespace-only) query carries no key terms to retrieve
    // against, so it must fall through to the structured empty response
    // rather than being rejected outright - even though the index is
    // populated with a matching document.
    for query in ["", "   "] {
        let class = retrieval::classify_query(query);
        let terms = retrieval::extract_key_terms(query);
        let scored_entities = retrieval::retrieve_entities(graph.as_ref(), &terms, 10).await.unwrap();
        let keyword_chunks = chunks.as_ref().keyword_search(query, 10).await.unwrap();
        let merged = retrieval::merge_entity_and_vector_chunks(keyword_chunks, Vec::new(), 0.5, 5);
        let citation_hits = citations.list_for_document(&result.document_id).await.unwrap();
        let degraded_documents = retrieval::collect_degraded_documents(graph.as_ref(), &scored_entities, &merged).await.unwrap();

        let response = retrieval::compose_response(query, &scored_entities, &merged, &citation_hits, class, &degraded_documents);
        assert_eq!(response.confidence, 0.0, "query {query:?} should yield zero confidence");
        assert_eq!(response.task_title, "No matching information found");
        assert!(response.source_documents.is_empty());
    }
}

#[tokio::test]
async fn degraded_document_caps_confidence_and_sets_a_note() {
    let blob_dir = tempdir().unwrap();
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations_on(&pool).await.unwrap();

    let config: Config = toml::from_str("db = { path = \"ignored.db\" }").unwrap();
    let config = Arc::new(config);

    let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(pool.clone()));
    let chunks: Arc<dyn ChunkIndex> = Arc::new(SqliteChunkIndex::new(pool.clone()));
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(blob_dir.path().to_path_buf()));
    let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::default());
    let llm: Arc<dyn LlmClient> = Arc::new(DisabledLlmClient);
    let citations = Arc::new(VisualCitationStore::new(pool));
    let degradation = Arc::new(DegradationState::default());

    let orchestrator = Orchestrator::new(
        config, graph.clone(), chunks.clone(), blobs, progress, llm, citations.clone(), degradation,
    );

    // No LLM client is configured (`DisabledLlmClient`), so every ingestion
    // through this orchestrator falls back to the deterministic seed graph
    // and is marked degraded - exercising the base "degraded extraction is
    // still visible, but capped and annotated" requirement end to end.
    let result = orchestrator
        .submit(
            b"Daily Fryer Cleaning Procedure\n\nStep 1. Power down the fryer.".to_vec(),
            "fryer-cleaning.txt".to_string(),
        )
        .await
        .unwrap();
    wait_for_terminal(&orchestrator, &result.process_id).await;
    let document = graph.as_ref().get_document(&result.document_id).await.unwrap().unwrap();
    assert!(document.degraded, "ingestion without an LLM client should be marked degraded");

    let query = "how do I clean the fryer";
    let class = retrieval::classify_query(query);
    let terms = retrieval::extract_key_terms(query);
    let scored_entities = retrieval::retrieve_entities(graph.as_ref(), &terms, 10).await.unwrap();
    let keyword_chunks = chunks.as_ref().keyword_search(&terms.join(" "), 10).await.unwrap();
    let merged = retrieval::merge_entity_and_vector_chunks(keyword_chunks, Vec::new(), 0.5, 5);
    let citation_hits = citations.list_for_document(&result.document_id).await.unwrap();
    let degraded_documents = retrieval::collect_degraded_documents(graph.as_ref(), &scored_entities, &merged).await.unwrap();
    assert!(degraded_documents.contains(&result.document_id));

    let response = retrieval::compose_response(query, &scored_entities, &merged, &citation_hits, class, &degraded_documents);
    assert!(response.confidence < 0.5, "confidence should be capped: {}", response.confidence);
    assert!(response.note.is_some(), "a limited-data note should be attached");
}

#[tokio::test]
async fn deleted_document_is_no_longer_retrievable() {
    let blob_dir = tempdir().unwrap();
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations_on(&pool).await.unwrap();

    let config: Config = toml::from_str("db = { path = \"ignored.db\" }").unwrap();
    let config = Arc::new(config);

    let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(pool.clone()));
    let chunks: Arc<dyn ChunkIndex> = Arc::new(SqliteChunkIndex::new(pool.clone()));
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(blob_dir.path().to_path_buf()));
    let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::default());
    let llm: Arc<dyn LlmClient> = Arc::new(DisabledLlmClient);
    let citations = Arc::new(VisualCitationStore::new(pool));
    let degradation = Arc::new(DegradationState::default());

    let orchestrator = Orchestrator::new(
        config, graph.clone(), chunks.clone(), blobs, progress, llm, citations, degradation,
    );

    let result = orchestrator
        .submit(b"Ice cream machine boil-out instructions.".to_vec(), "ice-cream.txt".to_string())
        .await
        .unwrap();
    wait_for_terminal(&orchestrator, &result.process_id).await;
    assert!(graph.as_ref().get_document(&result.document_id).await.unwrap().is_some());

    orchestrator.delete(&result.document_id).await.unwrap();

    assert!(graph.as_ref().get_document(&result.document_id).await.unwrap().is_none());
    assert_eq!(chunks.as_ref().chunk_count(&result.document_id).await.unwrap(), 0);
}
