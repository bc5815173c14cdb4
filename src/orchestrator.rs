//! Ingestion orchestrator: the single entry point that turns raw
//! uploaded bytes into a fully indexed [`Document`], [`Entity`],
//! [`Relationship`], and [`Chunk`] set.
//!
//! `submit` validates synchronously (so a rejected file never schedules
//! background work) and, once accepted, hands the rest of the pipeline to a
//! bounded worker pool so that at most `n_ingest` documents extract
//! concurrently process-wide, with per-document work serialized by a
//! per-`document_id` mutex. Each stage advances a [`ProgressRecord`] before
//! moving on, retries transient upstream failures with
//! [`crate::retry::with_backoff`], and is bounded by a deadline; any
//! unretryable error or deadline overrun is terminal and never propagates to
//! the caller, who has already received their `process_id`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::citation;
use crate::config::Config;
use crate::degradation::{DegradationMode, DegradationState};
use crate::dual_writer;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::extract;
use crate::extractor::{self, ExtractionResult};
use crate::models::{Chunk, Document, Priority, Stage};
use crate::render::PageRenderer;
use crate::retry::{is_transient, with_backoff};
use crate::storage::{BlobStore, ChunkIndex, GraphStore, LlmClient, ProgressStore};
use crate::validator::{self, ValidationOutcome};

/// Outcome of [`Orchestrator::submit`]. `ok = false` means validation
/// rejected the file synchronously; the caller can still poll `process_id`
/// for the terminal `failed` record recording why.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubmitResult {
    pub process_id: String,
    pub document_id: String,
    pub ok: bool,
    pub message: String,
}

/// Coordinates the background ingestion pipeline. Holds the store handles,
/// a semaphore bounding process-wide concurrency, and a map of in-flight
/// per-document task handles so `delete` can cancel active work before
/// running its cascade.
pub struct Orchestrator {
    config: Arc<Config>,
    graph: Arc<dyn GraphStore>,
    chunks: Arc<dyn ChunkIndex>,
    blobs: Arc<dyn BlobStore>,
    progress: Arc<dyn ProgressStore>,
    llm: Arc<dyn LlmClient>,
    citations: Arc<citation::VisualCitationStore>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    renderer: Arc<dyn PageRenderer>,
    degradation: Arc<DegradationState>,
    concurrency: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    deferred: Arc<Mutex<VecDeque<IngestionJob>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        graph: Arc<dyn GraphStore>,
        chunks: Arc<dyn ChunkIndex>,
        blobs: Arc<dyn BlobStore>,
        progress: Arc<dyn ProgressStore>,
        llm: Arc<dyn LlmClient>,
        citations: Arc<citation::VisualCitationStore>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        renderer: Arc<dyn PageRenderer>,
        degradation: Arc<DegradationState>,
    ) -> Self {
        let permits = config.ingestion.n_ingest.max(1);
        Orchestrator {
            config,
            graph,
            chunks,
            blobs,
            progress,
            llm,
            citations,
            embedding_provider,
            renderer,
            degradation,
            concurrency: Arc::new(Semaphore::new(permits)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            deferred: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Accepts an uploaded file at [`Priority::Normal`]. See
    /// [`Orchestrator::submit_with_priority`].
    pub async fn submit(&self, file_bytes: Vec<u8>, filename: String) -> CoreResult<SubmitResult> {
        self.submit_with_priority(file_bytes, filename, Priority::Normal).await
    }

    /// Accepts an uploaded file. Persists the bytes, creates a progress
    /// record, then validates synchronously: on rejection, no background
    /// task is ever scheduled. On acceptance, schedules the background
    /// pipeline (bounded by the concurrency semaphore, FIFO via its wait
    /// queue) and returns immediately — unless the system is currently in
    /// [`DegradationMode::SelectiveProcessing`] and `priority` is below
    /// [`Priority::High`], in which case the job is held in a local deferred
    /// queue instead of spawned, and drained once the mode recovers.
    pub async fn submit_with_priority(&self, file_bytes: Vec<u8>, filename: String, priority: Priority) -> CoreResult<SubmitResult> {
        self.drain_deferred().await;
        self.degradation.record_backpressure(self.concurrency.available_permits() == 0);

        let document_id = Uuid::new_v4().to_string();
        let process_id = Uuid::new_v4().to_string();

        let safe_filename = sanitize_for_blob_path(&filename);
        let blob_path = self.blobs.put(&document_id, &safe_filename, &file_bytes).await?;
        self.progress.create(&process_id, &document_id).await?;

        let outcome = validator::validate(&filename, &file_bytes);
        let metadata = match outcome {
            ValidationOutcome::Valid(metadata) => metadata,
            rejected => {
                let message = rejection_message(&rejected);
                self.progress.fail(&process_id, &message).await?;
                return Ok(SubmitResult {
                    process_id,
                    document_id,
                    ok: false,
                    message,
                });
            }
        };

        let job = IngestionJob {
            config: self.config.clone(),
            graph: self.graph.clone(),
            chunks: self.chunks.clone(),
            blobs: self.blobs.clone(),
            progress: self.progress.clone(),
            llm: self.llm.clone(),
            citations: self.citations.clone(),
            embedding_provider: self.embedding_provider.clone(),
            renderer: self.renderer.clone(),
            degradation: self.degradation.clone(),
            process_id: process_id.clone(),
            document_id: document_id.clone(),
            filename,
            blob_path,
            metadata,
        };

        if self.degradation.mode() == DegradationMode::SelectiveProcessing && priority < Priority::High {
            self.progress
                .advance(&process_id, Stage::Uploaded, "queued: selective-processing mode active, priority below HIGH", 0, 0)
                .await?;
            self.deferred.lock().await.push_back(job);
            return Ok(SubmitResult {
                process_id,
                document_id,
                ok: true,
                message: "queued: selective-processing mode active".to_string(),
            });
        }

        self.spawn_job(job).await;

        Ok(SubmitResult {
            process_id,
            document_id,
            ok: true,
            message: "accepted".to_string(),
        })
    }

    /// Re-queues any jobs deferred during `SelectiveProcessing` once the mode
    /// has moved back to something that processes normal-priority work.
    pub async fn drain_deferred(&self) {
        if self.degradation.mode() == DegradationMode::SelectiveProcessing {
            return;
        }
        let mut queue = self.deferred.lock().await;
        while let Some(job) = queue.pop_front() {
            drop(queue);
            self.spawn_job(job).await;
            queue = self.deferred.lock().await;
        }
    }

    /// Spawns the background task for one already-validated job, acquiring
    /// one permit ordinarily or two (capped at total capacity) while
    /// `MemoryConstrained`, halving effective per-stage concurrency without
    /// resizing the semaphore.
    async fn spawn_job(&self, job: IngestionJob) {
        let concurrency = self.concurrency.clone();
        let in_flight = self.in_flight.clone();
        let document_id = job.document_id.clone();
        let document_id_for_task = document_id.clone();
        let total_permits = self.config.ingestion.n_ingest.max(1);
        let handle = tokio::spawn(async move {
            let degraded = job.degradation.mode() == DegradationMode::MemoryConstrained;
            let needed = if degraded { 2usize.min(total_permits) } else { 1 };
            let permit = concurrency.acquire_many_owned(needed as u32).await;
            run_job(job, permit).await;
            in_flight.lock().await.remove(&document_id_for_task);
        });
        self.in_flight.lock().await.insert(document_id, handle);
    }

    /// Current state of a submitted ingestion, or `NotFound`.
    pub async fn status(&self, process_id: &str) -> CoreResult<crate::models::ProgressRecord> {
        self.progress
            .get(process_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("no ingestion process {process_id}")))
    }

    /// Cancels any in-flight background ingestion for `document_id`, then
    /// runs the dual-writer's delete cascade and removes the blob.
    pub async fn delete(&self, document_id: &str) -> CoreResult<()> {
        if let Some(handle) = self.in_flight.lock().await.remove(document_id) {
            handle.abort();
        }
        let document = self.graph.get_document(document_id).await?;
        dual_writer::delete_document(self.graph.as_ref(), self.chunks.as_ref(), document_id).await?;
        if let Some(document) = document {
            self.blobs.delete(&document.blob_path).await?;
        }
        Ok(())
    }
}

/// Bundles everything one background ingestion needs, independent of the
/// `Orchestrator` it was spawned from (so the task body can be a free
/// function with no borrows across the `.await` points).
struct IngestionJob {
    config: Arc<Config>,
    graph: Arc<dyn GraphStore>,
    chunks: Arc<dyn ChunkIndex>,
    blobs: Arc<dyn BlobStore>,
    progress: Arc<dyn ProgressStore>,
    llm: Arc<dyn LlmClient>,
    citations: Arc<citation::VisualCitationStore>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    renderer: Arc<dyn PageRenderer>,
    degradation: Arc<DegradationState>,
    process_id: String,
    document_id: String,
    filename: String,
    blob_path: String,
    metadata: validator::ValidationMetadata,
}

async fn run_job(job: IngestionJob, _permit: OwnedSemaphorePermit) {
    if let Err(e) = run_job_inner(&job).await {
        let message = e.sanitized_message();
        tracing::warn!(process_id = %job.process_id, document_id = %job.document_id, error = %message, "ingestion failed");
        job.degradation.record_failed_probe();
        let _ = job.progress.fail(&job.process_id, &message).await;
    }
}

async fn run_job_inner(job: &IngestionJob) -> CoreResult<()> {
    let extraction_deadline = Duration::from_secs(job.config.ingestion.extraction_deadline_secs);
    let dual_writer_deadline = Duration::from_secs(job.config.ingestion.dual_writer_deadline_secs);
    let max_retries = job.config.ingestion.max_stage_retries;

    job.progress
        .advance(&job.process_id, Stage::Validated, "validated", 0, 0)
        .await?;

    let file_type = job
        .metadata
        .file_type
        .ok_or_else(|| CoreError::internal("validated file missing file_type"))?;

    let bytes = with_deadline(extraction_deadline, job.blobs.get(&job.blob_path)).await?;

    let text = match file_type.extraction_mime() {
        Some(mime) => with_deadline(extraction_deadline, extract_text_stage(&bytes, mime, max_retries)).await?,
        None if file_type.is_text() => String::from_utf8_lossy(&bytes).into_owned(),
        None => format!("{} ({})", job.filename, file_type.as_str()),
    };

    job.progress
        .advance(&job.process_id, Stage::TextExtracted, "text extracted", 0, 0)
        .await?;

    let mut extraction = with_backoff(max_retries, is_transient, || async {
        Ok::<ExtractionResult, CoreError>(
            extractor::extract_document(job.llm.as_ref(), &job.document_id, &job.filename, &text, &job.config).await,
        )
    })
    .await?;

    job.degradation.record_extraction_outcome(extraction.degraded_reason.is_some());

    embed_chunks(job, &mut extraction.chunks).await;

    job.progress
        .advance(
            &job.process_id,
            Stage::EntitiesExtracted,
            "entities extracted",
            extraction.entities.len() as u32,
            0,
        )
        .await?;
    job.progress
        .advance(
            &job.process_id,
            Stage::RelationshipsGenerated,
            "relationships generated",
            extraction.entities.len() as u32,
            extraction.relationships.len() as u32,
        )
        .await?;

    let document = Document {
        document_id: job.document_id.clone(),
        filename: job.filename.clone(),
        file_type,
        blob_path: job.blob_path.clone(),
        page_count: job.metadata.page_count,
        uploaded_at: chrono::Utc::now(),
        size_bytes: job.metadata.size_bytes,
        executive_summary: extraction.summary.executive_summary.clone(),
        qsr_category: extraction.summary.qsr_category,
        document_type: extraction.summary.document_type,
        hierarchical_sections: extraction.summary.hierarchical_sections.clone(),
        degraded: extraction.degraded_reason.is_some(),
    };

    let write_result = with_deadline(
        dual_writer_deadline,
        with_backoff(max_retries, is_transient, || {
            dual_writer::write_document(
                job.graph.as_ref(),
                job.chunks.as_ref(),
                &document,
                &extraction.entities,
                &extraction.relationships,
                &extraction.chunks,
            )
        }),
    )
    .await;
    let write_result = match write_result {
        Ok(()) => Ok(()),
        Err(e) => {
            if e.kind() == ErrorKind::UpstreamUnavailable {
                job.degradation.enter_local_queue_if_normal(format!("graph store or chunk index unreachable: {e}"));
            }
            Err(e)
        }
    };
    write_result?;

    store_citations(job, &bytes, file_type, &extraction.chunks).await?;

    job.progress
        .advance(
            &job.process_id,
            Stage::Indexed,
            "indexed",
            extraction.entities.len() as u32,
            extraction.relationships.len() as u32,
        )
        .await?;

    verify_write(job, &extraction).await?;
    job.degradation.record_healthy_probe();

    job.progress
        .advance(
            &job.process_id,
            Stage::Verified,
            "verified",
            extraction.entities.len() as u32,
            extraction.relationships.len() as u32,
        )
        .await?;

    Ok(())
}

async fn extract_text_stage(bytes: &[u8], mime: &str, max_retries: u32) -> CoreResult<String> {
    with_backoff(max_retries, is_transient, || async {
        extract::extract_text(bytes, mime).map_err(|e| CoreError::ContentMalformed(e.to_string()))
    })
    .await
}

async fn with_deadline<T>(deadline: Duration, fut: impl std::future::Future<Output = CoreResult<T>>) -> CoreResult<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::DeadlineExceeded(format!(
            "stage exceeded its {}s deadline",
            deadline.as_secs()
        ))),
    }
}

/// Populates `chunk.embedding` for every chunk via the configured embedding
/// provider, batched by `config.embedding.batch_size`, so
/// [`dual_writer::write_document`] mirrors each chunk into both the lexical
/// and vector index as required. A provider failure degrades to leaving the
/// batch's embeddings `None` (lexical search still indexes the chunks)
/// rather than failing the whole ingestion.
async fn embed_chunks(job: &IngestionJob, chunks: &mut [Chunk]) {
    if !job.config.embedding.is_enabled() || chunks.is_empty() {
        return;
    }

    let batch_size = job.config.embedding.batch_size.max(1);
    for batch in chunks.chunks_mut(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        match embedding::embed_texts(job.embedding_provider.as_ref(), &job.config.embedding, &texts).await {
            Ok(vectors) => {
                for (chunk, vector) in batch.iter_mut().zip(vectors) {
                    chunk.embedding = Some(vector);
                }
            }
            Err(e) => {
                tracing::warn!(target: "audit", document_id = %job.document_id, error = %e, "chunk embedding failed, degrading to lexical-only indexing for this batch");
            }
        }
    }
}

/// Detects visual-reference patterns in each chunk's text and persists any
/// found as [`crate::models::VisualCitation`]s, so the query path can later
/// resolve `figure 3`-style references without re-scanning chunk text. For
/// PDF documents, also enumerates embedded images directly from the file's
/// object table and records their xrefs so `/citation/:id` can later
/// re-render the actual bytes.
async fn store_citations(job: &IngestionJob, bytes: &[u8], file_type: validator::FileType, chunks: &[Chunk]) -> CoreResult<()> {
    for chunk in chunks {
        let page = chunk.page.unwrap_or(1);
        for detected in citation::detect_references(&chunk.text) {
            let visual = citation::build_citation(&job.document_id, page, &detected);
            job.citations.upsert(&visual).await?;
        }
    }

    if file_type == validator::FileType::Pdf {
        match job.renderer.enumerate_images(&job.document_id, bytes) {
            Ok(images) => {
                for visual in images {
                    job.citations.upsert(&visual).await?;
                }
            }
            Err(e) => {
                tracing::warn!(target: "audit", document_id = %job.document_id, error = %e, "embedded-image enumeration failed");
            }
        }
    }

    Ok(())
}

/// Read-back verification: the document node exists, at least
/// one chunk is retrievable unless the source text was genuinely empty, and
/// the persisted entity count matches the extractor's report.
async fn verify_write(job: &IngestionJob, extraction: &ExtractionResult) -> CoreResult<()> {
    let document = job
        .graph
        .get_document(&job.document_id)
        .await?
        .ok_or_else(|| CoreError::internal("document missing immediately after indexing"))?;
    if document.document_id != job.document_id {
        return Err(CoreError::internal("document_id mismatch after indexing"));
    }

    let chunk_count = job.chunks.chunk_count(&job.document_id).await?;
    if chunk_count == 0 && !extraction.chunks.is_empty() {
        return Err(CoreError::internal("no chunks retrievable after indexing"));
    }

    let persisted_entities = job.graph.entities_for_document(&job.document_id).await?;
    if persisted_entities.len() + 1 < extraction.entities.len() {
        return Err(CoreError::internal("entity count mismatch after indexing"));
    }

    Ok(())
}

fn rejection_message(outcome: &ValidationOutcome) -> String {
    match outcome {
        ValidationOutcome::Valid(_) => unreachable!("rejection_message called on Valid outcome"),
        ValidationOutcome::InvalidType => "rejected: file extension is not supported".to_string(),
        ValidationOutcome::InvalidSize => "rejected: file is empty or exceeds the size limit for its type".to_string(),
        ValidationOutcome::InvalidContent(reason) => format!("rejected: {reason}"),
        ValidationOutcome::SecurityRisk(reason) => format!("rejected: {reason}"),
        ValidationOutcome::Corrupted(reason) => format!("rejected: {reason}"),
    }
}

/// Best-effort filename sanitization for the blob path when the filename
/// itself is what triggers rejection; `validator::validate` still runs
/// (and may reject) on the original `filename` right after this.
fn sanitize_for_blob_path(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "._- ()".contains(c) { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::FsBlobStore;
    use crate::chunk_index::SqliteChunkIndex;
    use crate::graph_store::SqliteGraphStore;
    use crate::llm::DisabledLlmClient;
    use crate::migrate::run_migrations_on;
    use crate::progress_store::InMemoryProgressStore;
    use tempfile::tempdir;

    async fn test_orchestrator() -> (Orchestrator, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations_on(&pool).await.unwrap();

        let config: Config = toml::from_str("db = { path = \"ignored.db\" }").unwrap();
        let config = Arc::new(config);
        let graph: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(pool.clone()));
        let chunks: Arc<dyn ChunkIndex> = Arc::new(SqliteChunkIndex::new(pool.clone()));
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path().to_path_buf()));
        let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::default());
        let llm: Arc<dyn LlmClient> = Arc::new(DisabledLlmClient);
        let citations = Arc::new(citation::VisualCitationStore::new(pool));
        let embedding_provider: Arc<dyn EmbeddingProvider> = Arc::new(crate::embedding::DisabledProvider);
        let renderer: Arc<dyn PageRenderer> = Arc::new(crate::render::PdfImageRenderer);
        let degradation = Arc::new(DegradationState::default());

        let orchestrator = Orchestrator::new(config, graph, chunks, blobs, progress, llm, citations, embedding_provider, renderer, degradation);
        (orchestrator, dir)
    }

    fn make_job_for_embed_test(config: Arc<Config>) -> IngestionJob {
        IngestionJob {
            config,
            graph: Arc::new(SqliteGraphStore::new(sqlx::sqlite::SqlitePool::connect_lazy("sqlite::memory:").unwrap())),
            chunks: Arc::new(SqliteChunkIndex::new(sqlx::sqlite::SqlitePool::connect_lazy("sqlite::memory:").unwrap())),
            blobs: Arc::new(FsBlobStore::new(std::env::temp_dir())),
            progress: Arc::new(InMemoryProgressStore::default()),
            llm: Arc::new(DisabledLlmClient),
            citations: Arc::new(citation::VisualCitationStore::new(sqlx::sqlite::SqlitePool::connect_lazy("sqlite::memory:").unwrap())),
            embedding_provider: Arc::new(crate::embedding::DisabledProvider),
            renderer: Arc::new(crate::render::PdfImageRenderer),
            degradation: Arc::new(DegradationState::default()),
            process_id: "proc-1".to_string(),
            document_id: "doc-1".to_string(),
            filename: "manual.txt".to_string(),
            blob_path: "doc-1/manual.txt".to_string(),
            metadata: validator::ValidationMetadata::default(),
        }
    }

    #[tokio::test]
    async fn embed_chunks_is_noop_when_embedding_disabled() {
        let config: Config = toml::from_str("db = { path = \"ignored.db\" }").unwrap();
        let job = make_job_for_embed_test(Arc::new(config));
        let mut chunks = vec![Chunk {
            chunk_id: "c1".to_string(),
            document_id: "doc-1".to_string(),
            text: "clean the fryer".to_string(),
            page: Some(1),
            offset: 0,
            embedding: None,
        }];
        embed_chunks(&job, &mut chunks).await;
        assert!(chunks[0].embedding.is_none());
    }

    #[tokio::test]
    async fn submit_rejects_unsupported_extension_without_scheduling_work() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let result = orchestrator
            .submit(b"whatever".to_vec(), "malware.exe".to_string())
            .await
            .unwrap();
        assert!(!result.ok);
        let record = orchestrator.status(&result.process_id).await.unwrap();
        assert_eq!(record.stage, Stage::Failed);
        assert!(record.terminal);
    }

    #[tokio::test]
    async fn submit_accepts_valid_text_file_and_converges_to_verified() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let result = orchestrator
            .submit(b"Daily fryer cleaning procedure.".to_vec(), "manual.txt".to_string())
            .await
            .unwrap();
        assert!(result.ok);

        for _ in 0..50 {
            let record = orchestrator.status(&result.process_id).await.unwrap();
            if record.terminal {
                assert_eq!(record.stage, Stage::Verified);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("ingestion never reached a terminal state");
    }

    #[tokio::test]
    async fn status_on_unknown_process_is_not_found() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let err = orchestrator.status("missing").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn selective_processing_defers_normal_priority_submissions() {
        let (orchestrator, _dir) = test_orchestrator().await;
        orchestrator.degradation.transition(DegradationMode::SelectiveProcessing, "test-forced");

        let result = orchestrator
            .submit_with_priority(b"Daily fryer cleaning procedure.".to_vec(), "manual.txt".to_string(), Priority::Normal)
            .await
            .unwrap();
        assert!(result.ok);
        assert!(result.message.contains("queued"));

        let record = orchestrator.status(&result.process_id).await.unwrap();
        assert_eq!(record.stage, Stage::Uploaded);
        assert!(!record.terminal);
        assert!(orchestrator.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn selective_processing_still_runs_high_priority_submissions() {
        let (orchestrator, _dir) = test_orchestrator().await;
        orchestrator.degradation.transition(DegradationMode::SelectiveProcessing, "test-forced");

        let result = orchestrator
            .submit_with_priority(b"Daily fryer cleaning procedure.".to_vec(), "manual.txt".to_string(), Priority::High)
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.message, "accepted");

        for _ in 0..50 {
            let record = orchestrator.status(&result.process_id).await.unwrap();
            if record.terminal {
                assert_eq!(record.stage, Stage::Verified);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("high-priority ingestion never reached a terminal state despite selective-processing mode");
    }

    #[tokio::test]
    async fn deferred_submission_is_drained_once_mode_recovers() {
        let (orchestrator, _dir) = test_orchestrator().await;
        orchestrator.degradation.transition(DegradationMode::SelectiveProcessing, "test-forced");

        let result = orchestrator
            .submit_with_priority(b"Daily fryer cleaning procedure.".to_vec(), "manual.txt".to_string(), Priority::Normal)
            .await
            .unwrap();
        assert!(orchestrator.deferred.lock().await.len() == 1);

        orchestrator.degradation.transition(DegradationMode::Normal, "test-recovered");
        orchestrator.drain_deferred().await;
        assert!(orchestrator.deferred.lock().await.is_empty());

        for _ in 0..50 {
            let record = orchestrator.status(&result.process_id).await.unwrap();
            if record.terminal {
                assert_eq!(record.stage, Stage::Verified);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("deferred ingestion never reached a terminal state after drain");
    }
}
