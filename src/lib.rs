//! # QSR Knowledge Core
//!
//! **A local-first knowledge assistant backend for quick-service-restaurant
//! equipment documentation.**
//!
//! Staff upload service manuals, cleaning guides, and safety protocols as
//! PDFs or Office documents; the system extracts a navigable equipment
//! hierarchy and procedure graph from them and answers natural-language
//! questions ("how do I clean the fryer?") with step-by-step guidance,
//! safety warnings, and citations back to the source page.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────┐
//! │ Upload │──▶│  Orchestrator │──▶│  Extractor  │──▶│  SQLite   │
//! │  (API) │   │ (stage runner)│   │ (LLM/seed)  │   │ graph+FTS │
//! └────────┘   └──────┬───────┘   └────────────┘   └────┬─────┘
//!                     │ progress                         │
//!                     ▼                                  ▼
//!               ┌──────────┐                       ┌──────────┐
//!               │ Progress │                       │  Query   │
//!               │  Store   │                       │ (hybrid) │
//!               └──────────┘                       └──────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. A document is submitted ([`orchestrator::Orchestrator::submit`]),
//!    validated synchronously ([`validator`]), and persisted as a blob
//!    ([`blob_store`]).
//! 2. A background task extracts plain text ([`extract`]), then an
//!    executive summary, equipment/procedure entities, and relationships
//!    ([`extractor`]) — via an LLM when configured, falling back to a
//!    deterministic seed graph ([`seed_graph`]) otherwise.
//! 3. The document is chunked ([`chunk`]) and the derived state (document,
//!    entities, relationships, chunks) is written atomically and
//!    idempotently across the graph store and chunk index
//!    ([`dual_writer`]).
//! 4. Visual citations (figures, tables, safety callouts referenced in the
//!    text) are detected and indexed ([`citation`]).
//! 5. Ingestion progress is tracked throughout and is independently
//!    queryable ([`progress_store`]).
//! 6. Natural-language queries are classified, expanded into key terms, and
//!    answered by merging entity-graph traversal with hybrid keyword/vector
//!    chunk retrieval ([`retrieval`], [`search`]), citing visual references
//!    found along the way.
//! 7. Everything above is exposed over HTTP ([`server`]) and a CLI
//!    ([`main`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`error`] | Closed error taxonomy shared across the crate |
//! | [`models`] | Core data types: `Document`, `Entity`, `Relationship`, `Chunk`, `VisualCitation` |
//! | [`storage`] | Capability-interface traits: `GraphStore`, `ChunkIndex`, `BlobStore`, `ProgressStore`, `LlmClient` |
//! | [`config`] | TOML configuration parsing and validation |
//! | [`validator`] | File type/size/content/security validation |
//! | [`extract`] | Plain-text extraction from PDF and OOXML documents |
//! | [`chunk`] | Paragraph-boundary text chunker |
//! | [`embedding`] | Embedding provider trait, OpenAI implementation, vector utilities |
//! | [`llm`] | LLM client trait and OpenAI chat-completions implementation |
//! | [`extractor`] | Summary, entity, and relationship extraction (LLM-driven with rule-based/seed fallback) |
//! | [`seed_graph`] | Deterministic fallback entity/relationship set |
//! | [`dual_writer`] | Idempotent write/delete across the graph store and chunk index |
//! | [`citation`] | Visual-citation detection, storage, and resolution |
//! | [`render`] | Page rendering: embedded-image enumeration and on-demand PNG materialization |
//! | [`progress_store`] | In-memory ingestion progress tracking with eviction |
//! | [`degradation`] | Backpressure/failure degradation-mode state machine |
//! | [`orchestrator`] | Submission intake and the background ingestion stage runner |
//! | [`retrieval`] | Query classification, entity scoring, and answer composition |
//! | [`search`] | Hybrid keyword/vector chunk score normalization and merging |
//! | [`graph_store`] | SQLite-backed `GraphStore` |
//! | [`chunk_index`] | SQLite-backed `ChunkIndex` (FTS5 + vector) |
//! | [`blob_store`] | Filesystem-backed `BlobStore` |
//! | [`sanitize`] | Redaction of client-facing error and log messages |
//! | [`retry`] | Bounded exponential backoff for upstream calls |
//! | [`server`] | HTTP API (Axum) with CORS |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//!
//! ## Configuration
//!
//! Configured via a TOML file (default: `config/qsr.toml`). See [`config`]
//! for all available options and [`config::load_config`] for validation
//! rules.

pub mod blob_store;
pub mod chunk;
pub mod chunk_index;
pub mod citation;
pub mod config;
pub mod db;
pub mod degradation;
pub mod dual_writer;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod extractor;
pub mod graph_store;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod progress_store;
pub mod render;
pub mod retrieval;
pub mod retry;
pub mod sanitize;
pub mod search;
pub mod seed_graph;
pub mod server;
pub mod storage;
pub mod validator;
