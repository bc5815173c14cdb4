//! Capability interfaces at the storage and client seams: `GraphStore`,
//! `ChunkIndex`, `BlobStore`, and `ProgressStore` on the storage side;
//! `LlmClient`, `EmbeddingProvider` (defined in [`crate::embedding`]), and
//! `PageRenderer` (defined in [`crate::render`]) on the client side.
//!
//! Each trait ships exactly one concrete implementation built on this
//! crate's existing SQLite/filesystem stack - the trait is the contract a
//! caller programs against, the impl is a swappable default, not the only
//! possible backend.

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::models::{Document, Entity, EntityType, ProgressRecord, Relationship, RelationshipType, Stage};

/// Durable, idempotent store for documents, entities, and relationships -
/// the property graph side of the dual-writer.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_document(&self, document: &Document) -> CoreResult<()>;
    async fn get_document(&self, document_id: &str) -> CoreResult<Option<Document>>;
    async fn list_documents(&self) -> CoreResult<Vec<Document>>;
    async fn delete_document(&self, document_id: &str) -> CoreResult<()>;

    /// Idempotent by `(canonical_name, entity_type)`; merges provenance if
    /// the entity already exists.
    async fn upsert_entity(&self, entity: &Entity) -> CoreResult<()>;
    async fn find_entity(&self, canonical_name: &str, entity_type: EntityType) -> CoreResult<Option<Entity>>;
    async fn find_entities_by_terms(&self, terms: &[String]) -> CoreResult<Vec<Entity>>;
    async fn entities_for_document(&self, document_id: &str) -> CoreResult<Vec<Entity>>;
    /// Remove an entity outright (used once it has lost its last provenance).
    async fn remove_entity(&self, canonical_name: &str, entity_type: EntityType) -> CoreResult<()>;

    /// Idempotent by `(src, dst, type)`; merges document-id provenance by
    /// set-union and confidence by max.
    async fn upsert_relationship(&self, relationship: &Relationship) -> CoreResult<()>;
    async fn relationships_for_document(&self, document_id: &str) -> CoreResult<Vec<Relationship>>;
    async fn relationships_from(&self, canonical_name: &str, entity_type: EntityType) -> CoreResult<Vec<Relationship>>;
    async fn relationships_of_type(&self, relationship_type: RelationshipType) -> CoreResult<Vec<Relationship>>;
    async fn remove_relationships_touching(&self, canonical_name: &str, entity_type: EntityType) -> CoreResult<()>;
    async fn remove_relationships_for_document(&self, document_id: &str) -> CoreResult<()>;
}

/// Searchable text-fragment index: lexical (FTS5/BM25) and vector
/// (cosine-similarity) retrieval over the same underlying chunk set.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Replaces the chunk set for `document_id` atomically (delete-then-insert).
    async fn index_chunks(&self, document_id: &str, chunks: &[crate::models::Chunk]) -> CoreResult<()>;
    async fn delete_chunks(&self, document_id: &str) -> CoreResult<()>;
    async fn chunk_count(&self, document_id: &str) -> CoreResult<u64>;

    async fn keyword_search(&self, query: &str, limit: i64) -> CoreResult<Vec<crate::search::ScoredChunk>>;
    async fn vector_search(&self, query_embedding: &[f32], limit: i64) -> CoreResult<Vec<crate::search::ScoredChunk>>;
}

/// Content-addressed byte storage for uploaded files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persists `bytes` under a path derived from `document_id` and the
    /// (already filename-safety-checked) original filename; returns the
    /// stored path.
    async fn put(&self, document_id: &str, safe_filename: &str, bytes: &[u8]) -> CoreResult<String>;
    async fn get(&self, blob_path: &str) -> CoreResult<Vec<u8>>;
    async fn delete(&self, blob_path: &str) -> CoreResult<()>;
}

/// LLM completion client used for document summarization and entity/
/// relationship extraction. A `disabled` configuration yields a client
/// whose calls always fail with `UpstreamUnavailable`, driving every
/// caller down the rule-based fallback path by construction.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> CoreResult<String>;
}

/// Queryable store of background ingestion progress. Deliberately
/// in-memory only - progress is observational, not durable state the system
/// must recover after a restart; a restart simply means in-flight uploads
/// need to be resubmitted.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn create(&self, process_id: &str, document_id: &str) -> CoreResult<()>;
    async fn get(&self, process_id: &str) -> CoreResult<Option<ProgressRecord>>;
    /// Advances `process_id` to `stage`, setting `percent` from
    /// `stage.percent()` and recording `message`. No-op on records that are
    /// already `terminal`.
    async fn advance(
        &self,
        process_id: &str,
        stage: Stage,
        message: &str,
        entities_found: u32,
        relationships_found: u32,
    ) -> CoreResult<()>;
    /// Marks `process_id` as `Stage::Failed` with the given message.
    async fn fail(&self, process_id: &str, message: &str) -> CoreResult<()>;
}
