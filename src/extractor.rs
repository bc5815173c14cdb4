//! Document summarization, entity/relationship extraction, and
//! normalization.
//!
//! The LLM-JSON-with-fallback pattern: ask the LLM for structured JSON,
//! strip any Markdown code fence, `serde_json::from_str` into a tagged
//! response type, and on any failure (upstream unavailable, malformed JSON,
//! retries exhausted) fall back to a deterministic path - a rule-based
//! classifier for summarization, the fixed [`crate::seed_graph`] for entity
//! extraction - so a stage never fails outright because of unstructured LLM
//! output.
//!
//! Cross-document entity dedup is not implemented here: it
//! falls out of [`crate::storage::GraphStore::upsert_entity`], which already
//! looks up `(canonical_name, entity_type)` and unions provenance before
//! writing. This module is responsible only for summarizing one document,
//! extracting and normalizing its entities, deduplicating *within* that
//! document, and deriving relationships among them.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::llm::strip_code_fence;
use crate::models::{Chunk, DocumentType, Entity, EntityType, QsrCategory, Relationship, RelationshipType};
use crate::seed_graph;
use crate::storage::LlmClient;

/// Structured document summary. Every field has a serde
/// default so a partial LLM response still deserializes instead of failing
/// outright.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentSummary {
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub equipment_focus: Vec<String>,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default)]
    pub document_type: DocumentType,
    #[serde(default)]
    pub qsr_category: QsrCategory,
    #[serde(default)]
    pub key_procedures: Vec<String>,
    #[serde(default)]
    pub safety_protocols: Vec<String>,
    #[serde(default)]
    pub critical_temperatures: Vec<String>,
    #[serde(default)]
    pub maintenance_schedules: Vec<String>,
    #[serde(default)]
    pub brand_context: String,
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub hierarchical_sections: Vec<String>,
}

const SUMMARY_SYSTEM_PROMPT: &str = "You are a quick-service-restaurant equipment documentation analyst. \
Given a document's filename and text, respond with ONLY a JSON object with keys: \
purpose, equipment_focus (array), target_audience, document_type (one of service-manual, \
cleaning-guide, safety-protocol, operation-guide, installation-manual, troubleshooting-guide, \
training, reference), qsr_category (one of ice-cream, fryer, grill, beverage, refrigeration, \
cleaning, general), key_procedures (array), safety_protocols (array), critical_temperatures \
(array of strings), maintenance_schedules (array), brand_context, executive_summary, \
hierarchical_sections (array).";

/// Produces a [`DocumentSummary`] for `text`. Tries the LLM first; on any
/// failure (disabled provider, upstream error, malformed JSON) falls back to
/// [`rule_based_summary`] so the document still becomes searchable.
pub async fn summarize(llm: &dyn LlmClient, filename: &str, text: &str) -> DocumentSummary {
    let excerpt: String = text.chars().take(6000).collect();
    let user_prompt = format!("Filename: {filename}\n\nDocument text:\n{excerpt}");

    match llm.complete(SUMMARY_SYSTEM_PROMPT, &user_prompt).await {
        Ok(raw) => match serde_json::from_str::<DocumentSummary>(strip_code_fence(&raw)) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(target: "audit", error = %e, "summarizer returned unparseable JSON, using rule-based fallback");
                rule_based_summary(filename, text)
            }
        },
        Err(e) => {
            tracing::warn!(target: "audit", error = %e, "summarizer LLM call failed, using rule-based fallback");
            rule_based_summary(filename, text)
        }
    }
}

/// Deterministic fallback summary: filename and keyword-table classification
/// into the same shape an LLM response would produce, with empty-but-valid
/// arrays for everything a keyword table can't infer.
pub fn rule_based_summary(filename: &str, text: &str) -> DocumentSummary {
    let haystack = format!("{} {}", filename.to_lowercase(), text.to_lowercase());
    let qsr_category = classify_qsr_category(&haystack);
    let document_type = classify_document_type(&haystack);
    let executive_summary = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().chars().take(280).collect())
        .unwrap_or_default();

    DocumentSummary {
        purpose: String::new(),
        equipment_focus: Vec::new(),
        target_audience: "service technician".to_string(),
        document_type,
        qsr_category,
        key_procedures: Vec::new(),
        safety_protocols: Vec::new(),
        critical_temperatures: Vec::new(),
        maintenance_schedules: Vec::new(),
        brand_context: String::new(),
        executive_summary,
        hierarchical_sections: Vec::new(),
    }
}

fn classify_qsr_category(haystack: &str) -> QsrCategory {
    const TABLE: &[(&str, QsrCategory)] = &[
        ("ice cream", QsrCategory::IceCream),
        ("soft serve", QsrCategory::IceCream),
        ("fryer", QsrCategory::Fryer),
        ("frying", QsrCategory::Fryer),
        ("grill", QsrCategory::Grill),
        ("griddle", QsrCategory::Grill),
        ("beverage", QsrCategory::Beverage),
        ("soda", QsrCategory::Beverage),
        ("refrigerat", QsrCategory::Refrigeration),
        ("freezer", QsrCategory::Refrigeration),
        ("cleaning", QsrCategory::Cleaning),
        ("sanitiz", QsrCategory::Cleaning),
    ];
    TABLE
        .iter()
        .find(|(kw, _)| haystack.contains(kw))
        .map(|(_, c)| *c)
        .unwrap_or(QsrCategory::General)
}

fn classify_document_type(haystack: &str) -> DocumentType {
    const TABLE: &[(&str, DocumentType)] = &[
        ("safety", DocumentType::SafetyProtocol),
        ("clean", DocumentType::CleaningGuide),
        ("install", DocumentType::InstallationManual),
        ("troubleshoot", DocumentType::TroubleshootingGuide),
        ("training", DocumentType::Training),
        ("service manual", DocumentType::ServiceManual),
        ("service", DocumentType::ServiceManual),
        ("operat", DocumentType::OperationGuide),
    ];
    TABLE
        .iter()
        .find(|(kw, _)| haystack.contains(kw))
        .map(|(_, t)| *t)
        .unwrap_or(DocumentType::Reference)
}

/// One entity as extracted by the LLM, before normalization and dedup.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntity {
    pub entity_text: String,
    pub entity_type: EntityType,
    pub canonical_name: String,
    #[serde(default = "default_hierarchy_level")]
    pub hierarchy_level: u8,
    #[serde(default)]
    pub parent_entity: Option<String>,
    #[serde(default)]
    pub page_reference: Option<u32>,
    #[serde(default)]
    pub section_context: String,
    #[serde(default)]
    pub qsr_context: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_hierarchy_level() -> u8 {
    4
}

fn default_confidence() -> f32 {
    0.6
}

#[derive(Debug, Deserialize)]
struct RawEntityList {
    entities: Vec<RawEntity>,
}

const ENTITY_SYSTEM_PROMPT: &str = "You are a quick-service-restaurant equipment documentation \
analyst. Extract canonical entities from the document following the hierarchy Manual -> \
Equipment_Type -> Equipment_Model -> Procedure -> Step -> Detail. Respond with ONLY a JSON object \
{\"entities\": [{\"entity_text\", \"entity_type\" (one of equipment, procedure, step, component, \
temperature, safety, parameter, tool, document, entity), \"canonical_name\", \"hierarchy_level\" \
(1-6), \"parent_entity\", \"page_reference\", \"section_context\", \"qsr_context\", \"confidence\" \
(0-1)}, ...]}.";

/// Extracts entities from `text` using `summary` as context.
/// Returns `Ok(None)` when the LLM call failed or returned unparseable
/// JSON - the caller falls back to the seed graph in that case, not to an
/// empty list.
pub async fn extract_entities_llm(llm: &dyn LlmClient, summary: &DocumentSummary, text: &str) -> Option<Vec<RawEntity>> {
    let excerpt: String = text.chars().take(8000).collect();
    let user_prompt = format!(
        "Document summary: purpose={}, qsr_category={:?}, document_type={:?}.\n\nDocument text:\n{excerpt}",
        summary.purpose, summary.qsr_category, summary.document_type
    );

    let raw = match llm.complete(ENTITY_SYSTEM_PROMPT, &user_prompt).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(target: "audit", error = %e, "entity extraction LLM call failed");
            return None;
        }
    };

    match serde_json::from_str::<RawEntityList>(strip_code_fence(&raw)) {
        Ok(list) => Some(list.entities),
        Err(e) => {
            tracing::warn!(target: "audit", error = %e, "entity extraction returned unparseable JSON");
            None
        }
    }
}

/// Applies deterministic rewrite rules: equipment model collapse, Title
/// Case procedure names, temperature normalization, whitespace collapse.
pub fn normalize_entities(mut raw: Vec<RawEntity>) -> Vec<RawEntity> {
    for entity in &mut raw {
        entity.canonical_name = collapse_whitespace(&entity.canonical_name);
        entity.qsr_context = collapse_whitespace(&entity.qsr_context);

        match entity.entity_type {
            EntityType::Equipment => {
                entity.canonical_name = collapse_equipment_model(&entity.canonical_name);
            }
            EntityType::Procedure => {
                entity.canonical_name = title_case(&entity.canonical_name);
            }
            EntityType::Temperature => {
                entity.canonical_name = normalize_temperature(&entity.canonical_name);
            }
            _ => {}
        }
    }
    raw
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapses equipment model variants (e.g. `"taylor c-602"`, `"Taylor
/// C602 "`, `"TAYLOR C 602"`) to a single canonical label: the first
/// alphabetic run Title Cased, followed by the alphanumeric model code
/// upper-cased with separators stripped.
fn collapse_equipment_model(name: &str) -> String {
    let trimmed = collapse_whitespace(name);
    let mut words = trimmed.split(' ');
    let brand = match words.next() {
        Some(w) => title_case(w),
        None => return trimmed,
    };
    let model: String = words
        .collect::<Vec<_>>()
        .join("")
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_uppercase();
    if model.is_empty() {
        brand
    } else {
        format!("{brand} {model}")
    }
}

/// Normalizes a temperature string to `"<int>\u{00b0}F"`, converting Celsius
/// values and rounding to the nearest integer. Strings with no parseable
/// number pass through whitespace-collapsed but otherwise unchanged.
fn normalize_temperature(s: &str) -> String {
    let collapsed = collapse_whitespace(s);
    let lower = collapsed.to_lowercase();
    let is_celsius = lower.contains('c') && !lower.contains('f');

    let digits: String = collapsed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect();
    match digits.parse::<f64>() {
        Ok(value) => {
            let fahrenheit = if is_celsius { value * 9.0 / 5.0 + 32.0 } else { value };
            format!("{}\u{00b0}F", fahrenheit.round() as i64)
        }
        Err(_) => collapsed,
    }
}

/// Groups `entities` by `(canonical_name, entity_type)` and merges each
/// group into one [`Entity`]: keeps the most complete record,
/// unions `page_reference`, and bumps confidence by `+0.1` capped at `0.95`.
pub fn dedupe_within_document(raw: Vec<RawEntity>, document_id: &str) -> Vec<Entity> {
    let mut groups: std::collections::HashMap<(String, EntityType), Vec<RawEntity>> = std::collections::HashMap::new();
    for entity in raw {
        groups.entry((entity.canonical_name.clone(), entity.entity_type)).or_default().push(entity);
    }

    groups
        .into_values()
        .map(|group| {
            let merge_count = group.len();
            let mut page_references = BTreeSet::new();
            let mut source_document_ids = BTreeSet::new();
            source_document_ids.insert(document_id.to_string());

            let best = group
                .iter()
                .max_by_key(|e| {
                    (!e.section_context.is_empty()) as u32
                        + (!e.qsr_context.is_empty()) as u32
                        + e.parent_entity.is_some() as u32
                })
                .cloned()
                .expect("group is non-empty by construction");

            for entity in &group {
                if let Some(page) = entity.page_reference {
                    page_references.insert(page);
                }
            }

            let confidence = if merge_count > 1 {
                (best.confidence + 0.1).min(0.95)
            } else {
                best.confidence
            };

            Entity {
                canonical_name: best.canonical_name,
                surface_form: best.entity_text,
                entity_type: best.entity_type,
                hierarchy_level: best.hierarchy_level,
                parent_entity: best.parent_entity,
                source_document_ids,
                page_references,
                qsr_context: best.qsr_context,
                confidence,
            }
        })
        .collect()
}

const PROCEDURE_CONTEXT_KEYWORDS: &[&str] = &["cleaning", "maintenance", "service", "repair"];

/// Derives relationships among `entities`, all attributed to `document_id`
///. A synthetic `Document`-typed entity representing the
/// document itself is included in the hierarchical+semantic pass so every
/// other entity gets a `DOCUMENTS` edge back to it.
pub fn derive_relationships(entities: &[Entity], document_id: &str, document_label: &str) -> Vec<Relationship> {
    let mut out = Vec::new();
    let mut doc_ids = BTreeSet::new();
    doc_ids.insert(document_id.to_string());

    let by_name_level: std::collections::HashMap<(&str, u8), &Entity> =
        entities.iter().map(|e| ((e.canonical_name.as_str(), e.hierarchy_level), e)).collect();

    for entity in entities {
        if let Some(parent_name) = &entity.parent_entity {
            let parent = (1..entity.hierarchy_level)
                .rev()
                .find_map(|level| by_name_level.get(&(parent_name.as_str(), level)))
                .or_else(|| entities.iter().find(|e| &e.canonical_name == parent_name));
            if let Some(parent) = parent {
                let relationship_type = if entity.entity_type == EntityType::Parameter {
                    RelationshipType::ParameterOf
                } else {
                    RelationshipType::BelongsTo
                };
                out.push(Relationship {
                    src_canonical: entity.canonical_name.clone(),
                    src_entity_type: entity.entity_type,
                    dst_canonical: parent.canonical_name.clone(),
                    dst_entity_type: parent.entity_type,
                    relationship_type,
                    source_document_ids: doc_ids.clone(),
                    confidence: entity.confidence,
                });
            }
        }
    }

    for procedure in entities.iter().filter(|e| e.entity_type == EntityType::Procedure) {
        let context = procedure.qsr_context.to_lowercase();
        for equipment in entities.iter().filter(|e| e.entity_type == EntityType::Equipment) {
            let mentions_equipment = context.contains(&equipment.canonical_name.to_lowercase());
            let mentions_keyword = PROCEDURE_CONTEXT_KEYWORDS.iter().any(|kw| context.contains(kw));
            if mentions_equipment || mentions_keyword {
                out.push(relationship(procedure, equipment, RelationshipType::ProcedureFor, &doc_ids));
            }
        }
        for tool in entities.iter().filter(|e| e.entity_type == EntityType::Tool) {
            if context.contains(&tool.canonical_name.to_lowercase()) {
                out.push(relationship(procedure, tool, RelationshipType::Requires, &doc_ids));
            }
        }
    }

    for equipment in entities.iter().filter(|e| e.entity_type == EntityType::Equipment) {
        for component in entities.iter().filter(|e| e.entity_type == EntityType::Component) {
            if component.qsr_context.to_lowercase().contains(&equipment.canonical_name.to_lowercase())
                || component.parent_entity.as_deref() == Some(equipment.canonical_name.as_str())
            {
                out.push(relationship(equipment, component, RelationshipType::Contains, &doc_ids));
            }
        }
    }

    for safety in entities.iter().filter(|e| e.entity_type == EntityType::Safety) {
        let context = safety.qsr_context.to_lowercase();
        for target in entities.iter().filter(|e| matches!(e.entity_type, EntityType::Procedure | EntityType::Equipment)) {
            if context.contains(&target.canonical_name.to_lowercase()) {
                out.push(relationship(safety, target, RelationshipType::SafetyWarningFor, &doc_ids));
            }
        }
    }

    let document_entity = Entity {
        canonical_name: document_label.to_string(),
        surface_form: document_label.to_string(),
        entity_type: EntityType::Document,
        hierarchy_level: 1,
        parent_entity: None,
        source_document_ids: doc_ids.clone(),
        page_references: BTreeSet::new(),
        qsr_context: String::new(),
        confidence: 1.0,
    };
    for entity in entities {
        out.push(relationship(&document_entity, entity, RelationshipType::Documents, &doc_ids));
    }

    out
}

fn relationship(src: &Entity, dst: &Entity, relationship_type: RelationshipType, doc_ids: &BTreeSet<String>) -> Relationship {
    Relationship {
        src_canonical: src.canonical_name.clone(),
        src_entity_type: src.entity_type,
        dst_canonical: dst.canonical_name.clone(),
        dst_entity_type: dst.entity_type,
        relationship_type,
        source_document_ids: doc_ids.clone(),
        confidence: src.confidence.min(dst.confidence),
    }
}

/// Splits `text` into [`Chunk`]s per the configured chunking parameters
///.
pub fn emit_chunks(document_id: &str, text: &str, config: &Config) -> Vec<Chunk> {
    chunk_document(document_id, text, config.chunking.target_tokens, config.chunking.overlap_ratio)
}

/// Full extraction result for one document.
pub struct ExtractionResult {
    pub summary: DocumentSummary,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub chunks: Vec<Chunk>,
    /// `Some(reason)` when entity extraction fell back to the seed graph.
    pub degraded_reason: Option<String>,
}

/// Runs the full per-document pipeline: summarize, extract entities,
/// normalize, dedupe within document, derive relationships, emit chunks.
pub async fn extract_document(
    llm: &dyn LlmClient,
    document_id: &str,
    filename: &str,
    text: &str,
    config: &Config,
) -> ExtractionResult {
    let summary = summarize(llm, filename, text).await;

    let (entities, degraded_reason) = match extract_entities_llm(llm, &summary, text).await {
        Some(raw) => {
            let normalized = normalize_entities(raw);
            (dedupe_within_document(normalized, document_id), None)
        }
        None => (
            seed_graph::seed_entities(document_id),
            Some("entity extraction unavailable, used seed graph".to_string()),
        ),
    };

    let relationships = if degraded_reason.is_some() {
        seed_graph::seed_relationships(document_id)
    } else {
        derive_relationships(&entities, document_id, filename)
    };

    let chunks = emit_chunks(document_id, text, config);

    ExtractionResult {
        summary,
        entities,
        relationships,
        chunks,
        degraded_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_qsr_category_matches_keyword() {
        assert_eq!(classify_qsr_category("taylor fryer service manual"), QsrCategory::Fryer);
        assert_eq!(classify_qsr_category("nothing relevant here"), QsrCategory::General);
    }

    #[test]
    fn classify_document_type_prefers_first_match() {
        assert_eq!(classify_document_type("fryer safety protocol"), DocumentType::SafetyProtocol);
        assert_eq!(classify_document_type("grill cleaning guide"), DocumentType::CleaningGuide);
    }

    #[test]
    fn rule_based_summary_is_non_panicking_on_empty_text() {
        let summary = rule_based_summary("manual.pdf", "");
        assert_eq!(summary.document_type, DocumentType::Reference);
    }

    #[test]
    fn collapse_equipment_model_unifies_variants() {
        assert_eq!(collapse_equipment_model("taylor c-602"), collapse_equipment_model("Taylor C602"));
        assert_eq!(collapse_equipment_model("TAYLOR C 602"), collapse_equipment_model("taylor c-602"));
    }

    #[test]
    fn title_case_capitalizes_each_word() {
        assert_eq!(title_case("daily cleaning procedure"), "Daily Cleaning Procedure");
    }

    #[test]
    fn normalize_temperature_converts_celsius_to_fahrenheit() {
        assert_eq!(normalize_temperature("100C"), "212\u{00b0}F");
        assert_eq!(normalize_temperature("350F"), "350\u{00b0}F");
    }

    fn raw_entity(name: &str, entity_type: EntityType, parent: Option<&str>, level: u8) -> RawEntity {
        RawEntity {
            entity_text: name.to_string(),
            entity_type,
            canonical_name: name.to_string(),
            hierarchy_level: level,
            parent_entity: parent.map(str::to_string),
            page_reference: Some(3),
            section_context: String::new(),
            qsr_context: String::new(),
            confidence: 0.6,
        }
    }

    #[test]
    fn dedupe_within_document_merges_duplicate_groups_and_bumps_confidence() {
        let raw = vec![
            raw_entity("Fryer", EntityType::Equipment, None, 2),
            raw_entity("Fryer", EntityType::Equipment, None, 2),
        ];
        let merged = dedupe_within_document(raw, "doc-1");
        assert_eq!(merged.len(), 1);
        assert!((merged[0].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn dedupe_within_document_caps_confidence_at_point_nine_five() {
        let raw: Vec<RawEntity> = (0..5).map(|_| raw_entity("Fryer", EntityType::Equipment, None, 2)).collect();
        let merged = dedupe_within_document(raw, "doc-1");
        assert!(merged[0].confidence <= 0.95);
    }

    #[test]
    fn derive_relationships_emits_belongs_to_for_parent_entity() {
        let entities = vec![
            Entity {
                canonical_name: "Fryer".to_string(),
                surface_form: "fryer".to_string(),
                entity_type: EntityType::Equipment,
                hierarchy_level: 2,
                parent_entity: None,
                source_document_ids: BTreeSet::new(),
                page_references: BTreeSet::new(),
                qsr_context: String::new(),
                confidence: 0.8,
            },
            Entity {
                canonical_name: "Heating Element".to_string(),
                surface_form: "heating element".to_string(),
                entity_type: EntityType::Component,
                hierarchy_level: 4,
                parent_entity: Some("Fryer".to_string()),
                source_document_ids: BTreeSet::new(),
                page_references: BTreeSet::new(),
                qsr_context: String::new(),
                confidence: 0.8,
            },
        ];
        let relationships = derive_relationships(&entities, "doc-1", "manual.pdf");
        assert!(relationships.iter().any(|r| {
            r.src_canonical == "Heating Element"
                && r.dst_canonical == "Fryer"
                && r.relationship_type == RelationshipType::BelongsTo
        }));
    }

    #[test]
    fn derive_relationships_links_every_entity_to_synthetic_document_node() {
        let entities = vec![Entity {
            canonical_name: "Fryer".to_string(),
            surface_form: "fryer".to_string(),
            entity_type: EntityType::Equipment,
            hierarchy_level: 2,
            parent_entity: None,
            source_document_ids: BTreeSet::new(),
            page_references: BTreeSet::new(),
            qsr_context: String::new(),
            confidence: 0.8,
        }];
        let relationships = derive_relationships(&entities, "doc-1", "manual.pdf");
        assert!(relationships
            .iter()
            .any(|r| r.relationship_type == RelationshipType::Documents && r.dst_canonical == "Fryer"));
    }
}
