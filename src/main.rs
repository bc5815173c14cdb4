//! # QSR Knowledge Core CLI
//!
//! Command-line front end for the QSR knowledge assistant backend: database
//! initialization, document upload/listing/deletion, ingestion progress
//! polling, natural-language querying, and the HTTP server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use qsr_core::blob_store::FsBlobStore;
use qsr_core::chunk_index::SqliteChunkIndex;
use qsr_core::citation::VisualCitationStore;
use qsr_core::config::{self, Config};
use qsr_core::degradation::DegradationState;
use qsr_core::embedding;
use qsr_core::graph_store::SqliteGraphStore;
use qsr_core::llm;
use qsr_core::migrate;
use qsr_core::models::Priority;
use qsr_core::orchestrator::Orchestrator;
use qsr_core::progress_store::InMemoryProgressStore;
use qsr_core::render::PdfImageRenderer;
use qsr_core::retrieval;
use qsr_core::server;
use qsr_core::storage::{ChunkIndex, GraphStore};
use qsr_core::{db, models::EntityType};

#[derive(Parser)]
#[command(
    name = "qsr",
    about = "QSR knowledge assistant backend — document ingestion, entity/procedure extraction, and hybrid retrieval",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/qsr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Upload a document for ingestion
    Upload {
        /// Path to the file to upload
        path: PathBuf,

        /// Submission priority; only consulted while the system is in
        /// selective-processing degradation mode
        #[arg(long, value_enum, default_value = "normal")]
        priority: Priority,
    },

    /// Poll the progress of an ingestion by process ID
    Progress {
        /// Process ID returned by `upload`
        process_id: String,
    },

    /// List indexed documents
    Documents,

    /// Show a single document's detail
    Document {
        /// Document ID
        id: String,
    },

    /// Delete a document and its derived state
    Delete {
        /// Document ID
        id: String,
    },

    /// Ask a natural-language question
    Query {
        /// Question text
        text: String,

        /// Maximum number of results to fold into the answer
        #[arg(long)]
        max_results: Option<usize>,

        /// Shape the answer for text-to-speech playback
        #[arg(long)]
        speech: bool,
    },

    /// Start the HTTP API server
    Serve,
}

async fn build_stores(cfg: &Arc<Config>) -> anyhow::Result<(
    Arc<SqliteGraphStore>,
    Arc<SqliteChunkIndex>,
    Arc<FsBlobStore>,
    Arc<VisualCitationStore>,
)> {
    let pool = db::connect(cfg).await?;
    let graph = Arc::new(SqliteGraphStore::new(pool.clone()));
    let chunks = Arc::new(SqliteChunkIndex::new(pool.clone()));
    let blobs = Arc::new(FsBlobStore::new(cfg.blobs.dir.clone()));
    let citations = Arc::new(VisualCitationStore::new(pool));
    Ok((graph, chunks, blobs, citations))
}

fn build_orchestrator(
    cfg: Arc<Config>,
    graph: Arc<SqliteGraphStore>,
    chunks: Arc<SqliteChunkIndex>,
    blobs: Arc<FsBlobStore>,
    citations: Arc<VisualCitationStore>,
    embedding_provider: Arc<dyn qsr_core::embedding::EmbeddingProvider>,
) -> anyhow::Result<(Orchestrator, Arc<DegradationState>)> {
    let llm_client: Arc<dyn qsr_core::storage::LlmClient> = Arc::from(llm::create_llm_client(&cfg.llm)?);
    let progress = Arc::new(InMemoryProgressStore::default());
    let renderer: Arc<dyn qsr_core::render::PageRenderer> = Arc::new(PdfImageRenderer);
    let degradation = Arc::new(DegradationState::default());
    let orchestrator = Orchestrator::new(
        cfg,
        graph,
        chunks,
        blobs,
        progress,
        llm_client,
        citations,
        embedding_provider,
        renderer,
        degradation.clone(),
    );
    Ok((orchestrator, degradation))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Arc::new(config::load_config(&cli.config)?);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Upload { path, priority } => {
            let (graph, chunks, blobs, citations) = build_stores(&cfg).await?;
            let embedding_provider: Arc<dyn qsr_core::embedding::EmbeddingProvider> = Arc::from(embedding::create_provider(&cfg.embedding)?);
            let (orchestrator, _degradation) = build_orchestrator(cfg, graph, chunks, blobs, citations, embedding_provider)?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            let bytes = tokio::fs::read(&path).await?;
            let result = orchestrator.submit_with_priority(bytes, filename, priority).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Progress { process_id } => {
            let (graph, chunks, blobs, citations) = build_stores(&cfg).await?;
            let embedding_provider: Arc<dyn qsr_core::embedding::EmbeddingProvider> = Arc::from(embedding::create_provider(&cfg.embedding)?);
            let (orchestrator, _degradation) = build_orchestrator(cfg, graph, chunks, blobs, citations, embedding_provider)?;
            let record = orchestrator.status(&process_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Documents => {
            let (graph, ..) = build_stores(&cfg).await?;
            let documents = graph.as_ref().list_documents().await?;
            for document in &documents {
                println!(
                    "{}\t{}\t{:?}\t{:?}",
                    document.document_id, document.filename, document.qsr_category, document.document_type
                );
            }
            if documents.is_empty() {
                println!("No documents indexed yet.");
            }
        }
        Commands::Document { id } => {
            let (graph, ..) = build_stores(&cfg).await?;
            match graph.as_ref().get_document(&id).await? {
                Some(document) => println!("{}", serde_json::to_string_pretty(&document)?),
                None => {
                    eprintln!("not found: no document {id}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Delete { id } => {
            let (graph, chunks, blobs, citations) = build_stores(&cfg).await?;
            let embedding_provider: Arc<dyn qsr_core::embedding::EmbeddingProvider> = Arc::from(embedding::create_provider(&cfg.embedding)?);
            let (orchestrator, _degradation) = build_orchestrator(cfg, graph, chunks, blobs, citations, embedding_provider)?;
            orchestrator.delete(&id).await?;
            println!("document {id} deleted");
        }
        Commands::Query { text, max_results, speech } => {
            let (graph, chunks, blobs, citations) = build_stores(&cfg).await?;
            let embedding_provider: Arc<dyn qsr_core::embedding::EmbeddingProvider> = Arc::from(embedding::create_provider(&cfg.embedding)?);
            let (_orchestrator, degradation) =
                build_orchestrator(cfg.clone(), graph.clone(), chunks.clone(), blobs, citations.clone(), embedding_provider.clone())?;
            let mode = degradation.mode();

            let limit = max_results.unwrap_or(cfg.retrieval.final_limit).max(1);
            let class = retrieval::classify_query(&text);
            let terms = retrieval::extract_key_terms(&text);

            let max_entity_results = retrieval::effective_max_entity_results(&cfg, mode);
            let hierarchy_depth = retrieval::effective_hierarchy_depth(&cfg, mode);
            let candidate_k_vector = retrieval::effective_candidate_k(&cfg, mode);

            let mut scored_entities = retrieval::retrieve_entities(graph.as_ref(), &terms, max_entity_results).await?;
            if let Some((top_entity, _)) = scored_entities.first().cloned() {
                let ancestors =
                    retrieval::hierarchical_ancestors(graph.as_ref(), &top_entity, hierarchy_depth).await?;
                for name in ancestors {
                    if let Some(ancestor) = graph.as_ref().find_entity(&name, EntityType::Equipment).await? {
                        let present = scored_entities
                            .iter()
                            .any(|(e, _)| e.canonical_name == ancestor.canonical_name && e.entity_type == ancestor.entity_type);
                        if !present {
                            scored_entities.push((ancestor, 0.3));
                        }
                    }
                }
            }

            let keyword_query = if terms.is_empty() { text.clone() } else { terms.join(" ") };
            let keyword_chunks = chunks.as_ref().keyword_search(&keyword_query, candidate_k_vector).await?;
            let vector_chunks = if candidate_k_vector == 0 {
                Vec::new()
            } else {
                retrieval::vector_retrieve(chunks.as_ref(), embedding_provider.as_ref(), &cfg, &text).await?
            };
            let merged_chunks = retrieval::merge_entity_and_vector_chunks(keyword_chunks, vector_chunks, cfg.retrieval.hybrid_alpha, limit);

            let document_ids: std::collections::BTreeSet<String> = merged_chunks.iter().map(|c| c.document_id.clone()).collect();
            let mut citation_hits = Vec::new();
            for document_id in &document_ids {
                citation_hits.extend(citations.as_ref().list_for_document(document_id).await?);
            }

            let degraded_documents = retrieval::collect_degraded_documents(graph.as_ref(), &scored_entities, &merged_chunks).await?;
            let mut response = retrieval::compose_response(&text, &scored_entities, &merged_chunks, &citation_hits, class, &degraded_documents);
            if speech {
                let shaped = retrieval::shape_for_speech(&response.steps.join("\n"));
                response.steps = vec![shaped];
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Serve => {
            let (graph, chunks, blobs, citations) = build_stores(&cfg).await?;
            let provider: Arc<dyn qsr_core::embedding::EmbeddingProvider> = Arc::from(embedding::create_provider(&cfg.embedding)?);
            let (orchestrator, degradation) =
                build_orchestrator(cfg.clone(), graph.clone(), chunks.clone(), blobs.clone(), citations.clone(), provider.clone())?;
            let orchestrator = Arc::new(orchestrator);
            let renderer: Arc<dyn qsr_core::render::PageRenderer> = Arc::new(PdfImageRenderer);
            server::run_server(cfg, graph, chunks, blobs, citations, provider, renderer, orchestrator, degradation).await?;
        }
    }

    Ok(())
}
