//! Deterministic QSR seed graph: the fallback entity and
//! relationship set used when LLM-based extraction cannot run, so that
//! downstream stages (indexing, retrieval) always see a non-empty result
//! rather than an empty document.
//!
//! The set is intentionally small and fixed - a handful of canonical
//! equipment, component, procedure, and safety entities common across QSR
//! service manuals, linked by the same `BELONGS_TO`/`PROCEDURE_FOR`/
//! `SAFETY_WARNING_FOR` edges the LLM-driven extractor would derive, with
//! `confidence` fixed at [`SEED_CONFIDENCE`] so retrieval can tell seeded
//! data apart from LLM-derived data.

use std::collections::BTreeSet;

use crate::models::{Entity, EntityType, Relationship, RelationshipType};

/// Confidence assigned to every seed entity and relationship. Lower than a
/// typical LLM-derived confidence (which ranges up to 0.95) so retrieval's
/// `confidence_boost` term naturally ranks seeded data below real extractions
/// when both are present.
pub const SEED_CONFIDENCE: f32 = 0.4;

fn entity(
    canonical_name: &str,
    surface_form: &str,
    entity_type: EntityType,
    hierarchy_level: u8,
    parent_entity: Option<&str>,
    qsr_context: &str,
    document_id: &str,
) -> Entity {
    let mut source_document_ids = BTreeSet::new();
    source_document_ids.insert(document_id.to_string());
    Entity {
        canonical_name: canonical_name.to_string(),
        surface_form: surface_form.to_string(),
        entity_type,
        hierarchy_level,
        parent_entity: parent_entity.map(str::to_string),
        source_document_ids,
        page_references: BTreeSet::new(),
        qsr_context: qsr_context.to_string(),
        confidence: SEED_CONFIDENCE,
    }
}

fn relationship(
    src_canonical: &str,
    src_entity_type: EntityType,
    dst_canonical: &str,
    dst_entity_type: EntityType,
    relationship_type: RelationshipType,
    document_id: &str,
) -> Relationship {
    let mut source_document_ids = BTreeSet::new();
    source_document_ids.insert(document_id.to_string());
    Relationship {
        src_canonical: src_canonical.to_string(),
        src_entity_type,
        dst_canonical: dst_canonical.to_string(),
        dst_entity_type,
        relationship_type,
        source_document_ids,
        confidence: SEED_CONFIDENCE,
    }
}

/// Produces the fixed QSR seed entity set, attributed to `document_id` as
/// their sole provenance.
pub fn seed_entities(document_id: &str) -> Vec<Entity> {
    vec![
        entity("Fryer", "fryer", EntityType::Equipment, 2, None, "frying equipment", document_id),
        entity("Grill", "grill", EntityType::Equipment, 2, None, "grilling equipment", document_id),
        entity(
            "Ice Cream Machine",
            "ice cream machine",
            EntityType::Equipment,
            2,
            None,
            "soft-serve freezing equipment",
            document_id,
        ),
        entity(
            "Heating Element",
            "heating element",
            EntityType::Component,
            4,
            Some("Fryer"),
            "heats oil to target temperature",
            document_id,
        ),
        entity(
            "Compressor",
            "compressor",
            EntityType::Component,
            4,
            Some("Ice Cream Machine"),
            "refrigeration compressor",
            document_id,
        ),
        entity(
            "Daily Cleaning",
            "daily cleaning",
            EntityType::Procedure,
            3,
            Some("Fryer"),
            "routine cleaning procedure",
            document_id,
        ),
        entity(
            "Boil-Out Procedure",
            "boil-out procedure",
            EntityType::Procedure,
            3,
            Some("Fryer"),
            "periodic oil system boil-out",
            document_id,
        ),
        entity(
            "Lockout Tagout",
            "lockout/tagout",
            EntityType::Safety,
            3,
            None,
            "de-energize equipment before service",
            document_id,
        ),
        entity(
            "Hot Oil Burn Hazard",
            "hot oil burn hazard",
            EntityType::Safety,
            3,
            Some("Fryer"),
            "hot oil contact hazard during cleaning",
            document_id,
        ),
    ]
}

/// Produces the fixed QSR seed relationship set matching [`seed_entities`].
pub fn seed_relationships(document_id: &str) -> Vec<Relationship> {
    vec![
        relationship(
            "Heating Element",
            EntityType::Component,
            "Fryer",
            EntityType::Equipment,
            RelationshipType::BelongsTo,
            document_id,
        ),
        relationship(
            "Compressor",
            EntityType::Component,
            "Ice Cream Machine",
            EntityType::Equipment,
            RelationshipType::BelongsTo,
            document_id,
        ),
        relationship(
            "Daily Cleaning",
            EntityType::Procedure,
            "Fryer",
            EntityType::Equipment,
            RelationshipType::BelongsTo,
            document_id,
        ),
        relationship(
            "Boil-Out Procedure",
            EntityType::Procedure,
            "Fryer",
            EntityType::Equipment,
            RelationshipType::BelongsTo,
            document_id,
        ),
        relationship(
            "Daily Cleaning",
            EntityType::Procedure,
            "Fryer",
            EntityType::Equipment,
            RelationshipType::ProcedureFor,
            document_id,
        ),
        relationship(
            "Boil-Out Procedure",
            EntityType::Procedure,
            "Fryer",
            EntityType::Equipment,
            RelationshipType::ProcedureFor,
            document_id,
        ),
        relationship(
            "Lockout Tagout",
            EntityType::Safety,
            "Boil-Out Procedure",
            EntityType::Procedure,
            RelationshipType::SafetyWarningFor,
            document_id,
        ),
        relationship(
            "Hot Oil Burn Hazard",
            EntityType::Safety,
            "Daily Cleaning",
            EntityType::Procedure,
            RelationshipType::SafetyWarningFor,
            document_id,
        ),
        relationship(
            "Hot Oil Burn Hazard",
            EntityType::Safety,
            "Boil-Out Procedure",
            EntityType::Procedure,
            RelationshipType::SafetyWarningFor,
            document_id,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_entities_are_non_empty_and_tagged_with_confidence() {
        let entities = seed_entities("doc-1");
        assert!(!entities.is_empty());
        for e in &entities {
            assert_eq!(e.confidence, SEED_CONFIDENCE);
            assert!(e.source_document_ids.contains("doc-1"));
        }
    }

    #[test]
    fn seed_relationships_only_reference_seed_entities() {
        let entities = seed_entities("doc-1");
        let names: BTreeSet<&str> = entities.iter().map(|e| e.canonical_name.as_str()).collect();
        for r in seed_relationships("doc-1") {
            assert!(names.contains(r.src_canonical.as_str()));
            assert!(names.contains(r.dst_canonical.as_str()));
        }
    }

    #[test]
    fn belongs_to_parent_matches_declared_parent_entity() {
        let entities = seed_entities("doc-1");
        let heating_element = entities
            .iter()
            .find(|e| e.canonical_name == "Heating Element")
            .unwrap();
        assert_eq!(heating_element.parent_entity.as_deref(), Some("Fryer"));
        let belongs_to = seed_relationships("doc-1")
            .into_iter()
            .find(|r| r.src_canonical == "Heating Element" && r.relationship_type == RelationshipType::BelongsTo)
            .unwrap();
        assert_eq!(belongs_to.dst_canonical, "Fryer");
    }
}
