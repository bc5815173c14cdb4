//! Graph + chunk-index dual-writer. Writes a document → entities →
//! relationships → chunks, in that order, so a query observing chunks also
//! observes their document, and so partial failure followed by retry
//! converges (every step is individually idempotent).

use crate::error::CoreResult;
use crate::models::{Chunk, Document, Entity, Relationship};
use crate::storage::{ChunkIndex, GraphStore};

/// Writes one document's full derived state. Returns as soon as the first
/// step fails; the caller (the orchestrator) retries the whole call, which
/// is safe because every step is idempotent.
pub async fn write_document(
    graph: &dyn GraphStore,
    chunks_index: &dyn ChunkIndex,
    document: &Document,
    entities: &[Entity],
    relationships: &[Relationship],
    chunks: &[Chunk],
) -> CoreResult<()> {
    graph.upsert_document(document).await?;
    for entity in entities {
        graph.upsert_entity(entity).await?;
    }
    for relationship in relationships {
        graph.upsert_relationship(relationship).await?;
    }
    chunks_index.index_chunks(&document.document_id, chunks).await?;
    Ok(())
}

/// Removes a document's node, chunks, visual citations, sole-provenance
/// entities, and relationships whose endpoints were removed.
pub async fn delete_document(graph: &dyn GraphStore, chunks_index: &dyn ChunkIndex, document_id: &str) -> CoreResult<()> {
    let entities = graph.entities_for_document(document_id).await?;
    chunks_index.delete_chunks(document_id).await?;
    graph.remove_relationships_for_document(document_id).await?;

    for entity in entities {
        if entity.source_document_ids.len() <= 1 {
            graph.remove_relationships_touching(&entity.canonical_name, entity.entity_type).await?;
            graph.remove_entity(&entity.canonical_name, entity.entity_type).await?;
        } else {
            let mut remaining = entity.clone();
            remaining.source_document_ids.remove(document_id);
            graph.upsert_entity(&remaining).await?;
        }
    }

    graph.delete_document(document_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_index::SqliteChunkIndex;
    use crate::graph_store::SqliteGraphStore;
    use crate::migrate::run_migrations_on;
    use crate::models::{DocumentType, EntityType, QsrCategory, RelationshipType};
    use crate::validator::FileType;
    use std::collections::BTreeSet;

    async fn test_pools() -> (SqliteGraphStore, SqliteChunkIndex) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations_on(&pool).await.unwrap();
        (SqliteGraphStore::new(pool.clone()), SqliteChunkIndex::new(pool))
    }

    fn sample_document(id: &str) -> Document {
        Document {
            document_id: id.to_string(),
            filename: "manual.pdf".to_string(),
            file_type: FileType::Pdf,
            blob_path: format!("uploads/{id}_manual.pdf"),
            page_count: Some(1),
            uploaded_at: chrono::Utc::now(),
            size_bytes: 10,
            executive_summary: "summary".to_string(),
            qsr_category: QsrCategory::Fryer,
            document_type: DocumentType::ServiceManual,
            hierarchical_sections: vec![],
            degraded: false,
        }
    }

    fn sample_entity(document_id: &str) -> Entity {
        let mut source_document_ids = BTreeSet::new();
        source_document_ids.insert(document_id.to_string());
        Entity {
            canonical_name: "Fryer".to_string(),
            surface_form: "fryer".to_string(),
            entity_type: EntityType::Equipment,
            hierarchy_level: 2,
            parent_entity: None,
            source_document_ids,
            page_references: BTreeSet::new(),
            qsr_context: String::new(),
            confidence: 0.8,
        }
    }

    fn sample_chunk(document_id: &str) -> Chunk {
        Chunk {
            chunk_id: "c1".to_string(),
            document_id: document_id.to_string(),
            text: "fryer text".to_string(),
            page: Some(1),
            offset: 0,
            embedding: None,
        }
    }

    #[tokio::test]
    async fn write_document_persists_all_layers() {
        let (graph, chunks_index) = test_pools().await;
        let document = sample_document("doc-1");
        let entities = vec![sample_entity("doc-1")];
        let chunks = vec![sample_chunk("doc-1")];
        write_document(&graph, &chunks_index, &document, &entities, &[], &chunks).await.unwrap();

        assert!(graph.get_document("doc-1").await.unwrap().is_some());
        assert!(graph.find_entity("Fryer", EntityType::Equipment).await.unwrap().is_some());
        assert_eq!(chunks_index.chunk_count("doc-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn write_document_is_idempotent_on_retry() {
        let (graph, chunks_index) = test_pools().await;
        let document = sample_document("doc-1");
        let entities = vec![sample_entity("doc-1")];
        let chunks = vec![sample_chunk("doc-1")];
        write_document(&graph, &chunks_index, &document, &entities, &[], &chunks).await.unwrap();
        write_document(&graph, &chunks_index, &document, &entities, &[], &chunks).await.unwrap();
        assert_eq!(chunks_index.chunk_count("doc-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_document_removes_sole_provenance_entity() {
        let (graph, chunks_index) = test_pools().await;
        let document = sample_document("doc-1");
        let entities = vec![sample_entity("doc-1")];
        let chunks = vec![sample_chunk("doc-1")];
        write_document(&graph, &chunks_index, &document, &entities, &[], &chunks).await.unwrap();

        delete_document(&graph, &chunks_index, "doc-1").await.unwrap();

        assert!(graph.get_document("doc-1").await.unwrap().is_none());
        assert!(graph.find_entity("Fryer", EntityType::Equipment).await.unwrap().is_none());
        assert_eq!(chunks_index.chunk_count("doc-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_document_keeps_entity_shared_with_other_documents() {
        let (graph, chunks_index) = test_pools().await;
        write_document(&graph, &chunks_index, &sample_document("doc-1"), &[sample_entity("doc-1")], &[], &[sample_chunk("doc-1")])
            .await
            .unwrap();

        let mut shared_entity = sample_entity("doc-2");
        shared_entity.source_document_ids.insert("doc-1".to_string());
        write_document(&graph, &chunks_index, &sample_document("doc-2"), &[shared_entity], &[], &[sample_chunk("doc-2")])
            .await
            .unwrap();

        delete_document(&graph, &chunks_index, "doc-1").await.unwrap();

        let remaining = graph.find_entity("Fryer", EntityType::Equipment).await.unwrap().unwrap();
        assert!(remaining.source_document_ids.contains("doc-2"));
        assert!(!remaining.source_document_ids.contains("doc-1"));
    }

    #[tokio::test]
    async fn delete_document_removes_relationships_for_document() {
        let (graph, chunks_index) = test_pools().await;
        let document = sample_document("doc-1");
        let component = {
            let mut e = sample_entity("doc-1");
            e.canonical_name = "Heating Element".to_string();
            e.entity_type = EntityType::Component;
            e
        };
        let mut doc_ids = BTreeSet::new();
        doc_ids.insert("doc-1".to_string());
        let relationship = Relationship {
            src_canonical: "Heating Element".to_string(),
            src_entity_type: EntityType::Component,
            dst_canonical: "Fryer".to_string(),
            dst_entity_type: EntityType::Equipment,
            relationship_type: RelationshipType::BelongsTo,
            source_document_ids: doc_ids,
            confidence: 0.8,
        };
        write_document(
            &graph,
            &chunks_index,
            &document,
            &[sample_entity("doc-1"), component],
            &[relationship],
            &[sample_chunk("doc-1")],
        )
        .await
        .unwrap();

        delete_document(&graph, &chunks_index, "doc-1").await.unwrap();

        assert!(graph
            .relationships_from("Heating Element", EntityType::Component)
            .await
            .unwrap()
            .is_empty());
    }
}
