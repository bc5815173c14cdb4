//! SQLite-backed [`GraphStore`]. Uses the same `INSERT ... ON CONFLICT DO
//! UPDATE` upsert idiom as the chunk index, generalized to the `entities`
//! and `relationships` tables with merge-by-provenance-union semantics.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::error::{CoreError, CoreResult};
use crate::models::{Document, DocumentType, Entity, EntityType, QsrCategory, Relationship, RelationshipType};
use crate::storage::GraphStore;
use crate::validator::FileType;

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteGraphStore { pool }
    }
}

fn join_set(set: &BTreeSet<String>) -> String {
    serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
}

fn parse_set(raw: &str) -> BTreeSet<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn join_u32_set(set: &BTreeSet<u32>) -> String {
    serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
}

fn parse_u32_set(raw: &str) -> BTreeSet<u32> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Document> {
    let file_type_str: String = row.try_get("file_type").map_err(CoreError::from)?;
    let file_type = FileType::from_extension(&file_type_str)
        .ok_or_else(|| CoreError::internal(format!("unrecognized stored file_type: {file_type_str}")))?;
    let qsr_category_str: String = row.try_get("qsr_category").map_err(CoreError::from)?;
    let document_type_str: String = row.try_get("document_type").map_err(CoreError::from)?;
    let sections_raw: String = row.try_get("hierarchical_sections").map_err(CoreError::from)?;
    let uploaded_at_ts: i64 = row.try_get("uploaded_at").map_err(CoreError::from)?;

    Ok(Document {
        document_id: row.try_get("id").map_err(CoreError::from)?,
        filename: row.try_get("filename").map_err(CoreError::from)?,
        file_type,
        blob_path: row.try_get("blob_path").map_err(CoreError::from)?,
        page_count: row
            .try_get::<Option<i64>, _>("page_count")
            .map_err(CoreError::from)?
            .map(|v| v as u32),
        uploaded_at: chrono::DateTime::from_timestamp(uploaded_at_ts, 0).unwrap_or_else(chrono::Utc::now),
        size_bytes: row.try_get::<i64, _>("size_bytes").map_err(CoreError::from)? as u64,
        executive_summary: row.try_get("executive_summary").map_err(CoreError::from)?,
        qsr_category: parse_qsr_category(&qsr_category_str),
        document_type: parse_document_type(&document_type_str),
        hierarchical_sections: serde_json::from_str(&sections_raw).unwrap_or_default(),
        degraded: row.try_get::<i64, _>("degraded").map_err(CoreError::from)? != 0,
    })
}

fn qsr_category_str(c: QsrCategory) -> &'static str {
    match c {
        QsrCategory::IceCream => "ice-cream",
        QsrCategory::Fryer => "fryer",
        QsrCategory::Grill => "grill",
        QsrCategory::Beverage => "beverage",
        QsrCategory::Refrigeration => "refrigeration",
        QsrCategory::Cleaning => "cleaning",
        QsrCategory::General => "general",
    }
}

fn parse_qsr_category(s: &str) -> QsrCategory {
    match s {
        "ice-cream" => QsrCategory::IceCream,
        "fryer" => QsrCategory::Fryer,
        "grill" => QsrCategory::Grill,
        "beverage" => QsrCategory::Beverage,
        "refrigeration" => QsrCategory::Refrigeration,
        "cleaning" => QsrCategory::Cleaning,
        _ => QsrCategory::General,
    }
}

fn document_type_str(t: DocumentType) -> &'static str {
    match t {
        DocumentType::ServiceManual => "service-manual",
        DocumentType::CleaningGuide => "cleaning-guide",
        DocumentType::SafetyProtocol => "safety-protocol",
        DocumentType::OperationGuide => "operation-guide",
        DocumentType::InstallationManual => "installation-manual",
        DocumentType::TroubleshootingGuide => "troubleshooting-guide",
        DocumentType::Training => "training",
        DocumentType::Reference => "reference",
    }
}

fn parse_document_type(s: &str) -> DocumentType {
    match s {
        "service-manual" => DocumentType::ServiceManual,
        "cleaning-guide" => DocumentType::CleaningGuide,
        "safety-protocol" => DocumentType::SafetyProtocol,
        "operation-guide" => DocumentType::OperationGuide,
        "installation-manual" => DocumentType::InstallationManual,
        "troubleshooting-guide" => DocumentType::TroubleshootingGuide,
        "training" => DocumentType::Training,
        _ => DocumentType::Reference,
    }
}

fn entity_from_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Entity> {
    let entity_type_str: String = row.try_get("entity_type").map_err(CoreError::from)?;
    let entity_type = EntityType::parse(&entity_type_str)
        .ok_or_else(|| CoreError::internal(format!("unrecognized stored entity_type: {entity_type_str}")))?;
    let source_document_ids: String = row.try_get("source_document_ids").map_err(CoreError::from)?;
    let page_references: String = row.try_get("page_references").map_err(CoreError::from)?;

    Ok(Entity {
        canonical_name: row.try_get("canonical_name").map_err(CoreError::from)?,
        surface_form: row.try_get("surface_form").map_err(CoreError::from)?,
        entity_type,
        hierarchy_level: row.try_get::<i64, _>("hierarchy_level").map_err(CoreError::from)? as u8,
        parent_entity: row.try_get("parent_entity").map_err(CoreError::from)?,
        source_document_ids: parse_set(&source_document_ids),
        page_references: parse_u32_set(&page_references),
        qsr_context: row.try_get("qsr_context").map_err(CoreError::from)?,
        confidence: row.try_get::<f64, _>("confidence").map_err(CoreError::from)? as f32,
    })
}

fn relationship_from_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Relationship> {
    let src_entity_type_str: String = row.try_get("src_entity_type").map_err(CoreError::from)?;
    let dst_entity_type_str: String = row.try_get("dst_entity_type").map_err(CoreError::from)?;
    let relationship_type_str: String = row.try_get("relationship_type").map_err(CoreError::from)?;
    let source_document_ids: String = row.try_get("source_document_ids").map_err(CoreError::from)?;

    Ok(Relationship {
        src_canonical: row.try_get("src_canonical").map_err(CoreError::from)?,
        src_entity_type: EntityType::parse(&src_entity_type_str)
            .ok_or_else(|| CoreError::internal("unrecognized stored src_entity_type"))?,
        dst_canonical: row.try_get("dst_canonical").map_err(CoreError::from)?,
        dst_entity_type: EntityType::parse(&dst_entity_type_str)
            .ok_or_else(|| CoreError::internal("unrecognized stored dst_entity_type"))?,
        relationship_type: parse_relationship_type(&relationship_type_str)
            .ok_or_else(|| CoreError::internal("unrecognized stored relationship_type"))?,
        source_document_ids: parse_set(&source_document_ids),
        confidence: row.try_get::<f64, _>("confidence").map_err(CoreError::from)? as f32,
    })
}

fn parse_relationship_type(s: &str) -> Option<RelationshipType> {
    Some(match s {
        "CONTAINS" => RelationshipType::Contains,
        "PART_OF" => RelationshipType::PartOf,
        "REQUIRES" => RelationshipType::Requires,
        "PROCEDURE_FOR" => RelationshipType::ProcedureFor,
        "SAFETY_WARNING_FOR" => RelationshipType::SafetyWarningFor,
        "FOLLOWED_BY" => RelationshipType::FollowedBy,
        "DOCUMENTS" => RelationshipType::Documents,
        "PARAMETER_OF" => RelationshipType::ParameterOf,
        "BELONGS_TO" => RelationshipType::BelongsTo,
        "RELATED_TO" => RelationshipType::RelatedTo,
        _ => return None,
    })
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_document(&self, document: &Document) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (
                id, filename, file_type, blob_path, page_count, uploaded_at, size_bytes,
                executive_summary, qsr_category, document_type, hierarchical_sections, degraded
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                file_type = excluded.file_type,
                blob_path = excluded.blob_path,
                page_count = excluded.page_count,
                size_bytes = excluded.size_bytes,
                executive_summary = excluded.executive_summary,
                qsr_category = excluded.qsr_category,
                document_type = excluded.document_type,
                hierarchical_sections = excluded.hierarchical_sections,
                degraded = excluded.degraded
            "#,
        )
        .bind(&document.document_id)
        .bind(&document.filename)
        .bind(document.file_type.as_str())
        .bind(&document.blob_path)
        .bind(document.page_count.map(|v| v as i64))
        .bind(document.uploaded_at.timestamp())
        .bind(document.size_bytes as i64)
        .bind(&document.executive_summary)
        .bind(qsr_category_str(document.qsr_category))
        .bind(document_type_str(document.document_type))
        .bind(serde_json::to_string(&document.hierarchical_sections).unwrap_or_else(|_| "[]".to_string()))
        .bind(document.degraded as i64)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> CoreResult<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::from)?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self) -> CoreResult<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY uploaded_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;
        rows.iter().map(document_from_row).collect()
    }

    async fn delete_document(&self, document_id: &str) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(CoreError::from)?;
        sqlx::query("DELETE FROM visual_citations WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }

    async fn upsert_entity(&self, entity: &Entity) -> CoreResult<()> {
        let existing = self.find_entity(&entity.canonical_name, entity.entity_type).await?;
        let merged = match existing {
            Some(mut current) => {
                if entity.completeness() > current.completeness() {
                    current.surface_form = entity.surface_form.clone();
                    current.parent_entity = entity.parent_entity.clone();
                    current.qsr_context = entity.qsr_context.clone();
                }
                current.source_document_ids.extend(entity.source_document_ids.iter().cloned());
                current.page_references.extend(entity.page_references.iter().copied());
                current.confidence = current.confidence.max(entity.confidence);
                current
            }
            None => entity.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO entities (
                canonical_name, entity_type, surface_form, hierarchy_level, parent_entity,
                source_document_ids, page_references, qsr_context, confidence
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(canonical_name, entity_type) DO UPDATE SET
                surface_form = excluded.surface_form,
                hierarchy_level = excluded.hierarchy_level,
                parent_entity = excluded.parent_entity,
                source_document_ids = excluded.source_document_ids,
                page_references = excluded.page_references,
                qsr_context = excluded.qsr_context,
                confidence = excluded.confidence
            "#,
        )
        .bind(&merged.canonical_name)
        .bind(merged.entity_type.as_str())
        .bind(&merged.surface_form)
        .bind(merged.hierarchy_level as i64)
        .bind(&merged.parent_entity)
        .bind(join_set(&merged.source_document_ids))
        .bind(join_u32_set(&merged.page_references))
        .bind(&merged.qsr_context)
        .bind(merged.confidence as f64)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    async fn find_entity(&self, canonical_name: &str, entity_type: EntityType) -> CoreResult<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE canonical_name = ? AND entity_type = ?")
            .bind(canonical_name)
            .bind(entity_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::from)?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn find_entities_by_terms(&self, terms: &[String]) -> CoreResult<Vec<Entity>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT * FROM entities")
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;
        let lowered: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        rows.iter()
            .map(entity_from_row)
            .filter_map(|result| match result {
                Ok(entity) => {
                    let haystacks = [
                        entity.canonical_name.to_lowercase(),
                        entity.surface_form.to_lowercase(),
                        entity.qsr_context.to_lowercase(),
                    ];
                    let matches = lowered
                        .iter()
                        .any(|term| haystacks.iter().any(|h| h.contains(term.as_str())));
                    if matches {
                        Some(Ok(entity))
                    } else {
                        None
                    }
                }
                Err(e) => Some(Err(e)),
            })
            .collect()
    }

    async fn entities_for_document(&self, document_id: &str) -> CoreResult<Vec<Entity>> {
        let rows = sqlx::query("SELECT * FROM entities")
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;
        rows.iter()
            .map(entity_from_row)
            .filter(|result| match result {
                Ok(entity) => entity.source_document_ids.contains(document_id),
                Err(_) => true,
            })
            .collect()
    }

    async fn remove_entity(&self, canonical_name: &str, entity_type: EntityType) -> CoreResult<()> {
        sqlx::query("DELETE FROM entities WHERE canonical_name = ? AND entity_type = ?")
            .bind(canonical_name)
            .bind(entity_type.as_str())
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    async fn upsert_relationship(&self, relationship: &Relationship) -> CoreResult<()> {
        let existing = sqlx::query(
            "SELECT * FROM relationships WHERE src_canonical = ? AND src_entity_type = ? AND dst_canonical = ? AND dst_entity_type = ? AND relationship_type = ?",
        )
        .bind(&relationship.src_canonical)
        .bind(relationship.src_entity_type.as_str())
        .bind(&relationship.dst_canonical)
        .bind(relationship.dst_entity_type.as_str())
        .bind(relationship.relationship_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from)?;

        let merged = match existing.as_ref().map(relationship_from_row).transpose()? {
            Some(mut current) => {
                current.source_document_ids.extend(relationship.source_document_ids.iter().cloned());
                current.confidence = current.confidence.max(relationship.confidence);
                current
            }
            None => relationship.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO relationships (
                src_canonical, src_entity_type, dst_canonical, dst_entity_type,
                relationship_type, source_document_ids, confidence
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(src_canonical, src_entity_type, dst_canonical, dst_entity_type, relationship_type) DO UPDATE SET
                source_document_ids = excluded.source_document_ids,
                confidence = excluded.confidence
            "#,
        )
        .bind(&merged.src_canonical)
        .bind(merged.src_entity_type.as_str())
        .bind(&merged.dst_canonical)
        .bind(merged.dst_entity_type.as_str())
        .bind(merged.relationship_type.as_str())
        .bind(join_set(&merged.source_document_ids))
        .bind(merged.confidence as f64)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    async fn relationships_for_document(&self, document_id: &str) -> CoreResult<Vec<Relationship>> {
        let rows = sqlx::query("SELECT * FROM relationships")
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;
        rows.iter()
            .map(relationship_from_row)
            .filter(|result| match result {
                Ok(r) => r.source_document_ids.contains(document_id),
                Err(_) => true,
            })
            .collect()
    }

    async fn relationships_from(&self, canonical_name: &str, entity_type: EntityType) -> CoreResult<Vec<Relationship>> {
        let rows = sqlx::query("SELECT * FROM relationships WHERE src_canonical = ? AND src_entity_type = ?")
            .bind(canonical_name)
            .bind(entity_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;
        rows.iter().map(relationship_from_row).collect()
    }

    async fn relationships_of_type(&self, relationship_type: RelationshipType) -> CoreResult<Vec<Relationship>> {
        let rows = sqlx::query("SELECT * FROM relationships WHERE relationship_type = ?")
            .bind(relationship_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;
        rows.iter().map(relationship_from_row).collect()
    }

    async fn remove_relationships_touching(&self, canonical_name: &str, entity_type: EntityType) -> CoreResult<()> {
        sqlx::query(
            "DELETE FROM relationships WHERE (src_canonical = ? AND src_entity_type = ?) OR (dst_canonical = ? AND dst_entity_type = ?)",
        )
        .bind(canonical_name)
        .bind(entity_type.as_str())
        .bind(canonical_name)
        .bind(entity_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    async fn remove_relationships_for_document(&self, document_id: &str) -> CoreResult<()> {
        let relationships = self.relationships_for_document(document_id).await?;
        for mut relationship in relationships {
            relationship.source_document_ids.remove(document_id);
            if relationship.source_document_ids.is_empty() {
                sqlx::query(
                    "DELETE FROM relationships WHERE src_canonical = ? AND src_entity_type = ? AND dst_canonical = ? AND dst_entity_type = ? AND relationship_type = ?",
                )
                .bind(&relationship.src_canonical)
                .bind(relationship.src_entity_type.as_str())
                .bind(&relationship.dst_canonical)
                .bind(relationship.dst_entity_type.as_str())
                .bind(relationship.relationship_type.as_str())
                .execute(&self.pool)
                .await
                .map_err(CoreError::from)?;
            } else {
                self.upsert_relationship(&relationship).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations_on;

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations_on(&pool).await.unwrap();
        pool
    }

    fn sample_document(id: &str) -> Document {
        Document {
            document_id: id.to_string(),
            filename: "manual.pdf".to_string(),
            file_type: FileType::Pdf,
            blob_path: format!("uploads/{id}_manual.pdf"),
            page_count: Some(10),
            uploaded_at: chrono::Utc::now(),
            size_bytes: 1024,
            executive_summary: "A fryer service manual.".to_string(),
            qsr_category: QsrCategory::Fryer,
            document_type: DocumentType::ServiceManual,
            hierarchical_sections: vec!["Overview".to_string()],
            degraded: false,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_document_roundtrips() {
        let store = SqliteGraphStore::new(test_pool().await);
        let doc = sample_document("doc-1");
        store.upsert_document(&doc).await.unwrap();
        let fetched = store.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(fetched.filename, "manual.pdf");
        assert_eq!(fetched.qsr_category, QsrCategory::Fryer);
    }

    #[tokio::test]
    async fn delete_document_removes_document_and_chunks() {
        let store = SqliteGraphStore::new(test_pool().await);
        store.upsert_document(&sample_document("doc-1")).await.unwrap();
        store.delete_document("doc-1").await.unwrap();
        assert!(store.get_document("doc-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_entity_merges_provenance_by_union() {
        let store = SqliteGraphStore::new(test_pool().await);
        let entity_a = {
            let mut e = seed_entity();
            e.source_document_ids.insert("doc-a".to_string());
            e
        };
        let entity_b = {
            let mut e = seed_entity();
            e.source_document_ids.clear();
            e.source_document_ids.insert("doc-b".to_string());
            e
        };
        store.upsert_entity(&entity_a).await.unwrap();
        store.upsert_entity(&entity_b).await.unwrap();
        let merged = store.find_entity("Fryer", EntityType::Equipment).await.unwrap().unwrap();
        assert!(merged.source_document_ids.contains("doc-a"));
        assert!(merged.source_document_ids.contains("doc-b"));
    }

    #[tokio::test]
    async fn upsert_relationship_merges_confidence_by_max() {
        let store = SqliteGraphStore::new(test_pool().await);
        let mut low = seed_relationship();
        low.confidence = 0.3;
        let mut high = seed_relationship();
        high.confidence = 0.9;
        store.upsert_relationship(&low).await.unwrap();
        store.upsert_relationship(&high).await.unwrap();
        let found = store
            .relationships_from("Daily Cleaning", EntityType::Procedure)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence, 0.9);
    }

    #[tokio::test]
    async fn find_entities_by_terms_matches_context() {
        let store = SqliteGraphStore::new(test_pool().await);
        store.upsert_entity(&seed_entity()).await.unwrap();
        let found = store.find_entities_by_terms(&["fryer".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].canonical_name, "Fryer");
    }

    fn seed_entity() -> Entity {
        crate::seed_graph::seed_entities("doc-1")
            .into_iter()
            .find(|e| e.canonical_name == "Fryer")
            .unwrap()
    }

    fn seed_relationship() -> Relationship {
        crate::seed_graph::seed_relationships("doc-1")
            .into_iter()
            .find(|r| r.relationship_type == RelationshipType::BelongsTo && r.src_canonical == "Daily Cleaning")
            .unwrap()
    }
}
