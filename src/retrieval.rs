//! Hybrid retrieval and answer composition. Turns a natural-language
//! query into a structured response: classify, extract key terms, retrieve
//! entities and chunks, traverse the hierarchy, and compose steps/safety
//! warnings/equipment/timing/citations.
//!
//! The min-max normalize + weighted-merge shape mirrors [`crate::search`]'s
//! keyword/vector fusion, generalized here to entity-relevance vs.
//! vector-chunk fusion. The ordinal-cue step miner and safety-keyword
//! severity classifier are plain `&'static [(&str, ...)]` tables, the same
//! style [`crate::config`]'s defaults use.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::citation::{best_match, detect_references, DetectedReference};
use crate::config::Config;
use crate::degradation::DegradationMode;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::CoreResult;
use crate::models::{Entity, EntityType, RelationshipType, VisualCitation};
use crate::search::{merge_hybrid, ScoredChunk};
use crate::storage::{ChunkIndex, GraphStore};

/// Confidence ceiling applied when any composed entity or chunk traces back
/// to a document whose extraction degraded to the seed graph. Keeps
/// degraded-but-searchable data visible (never an error) while marking it
/// as less trustworthy than a complete extraction, per the degraded-
/// ingestion visibility requirement.
const DEGRADED_CONFIDENCE_CEILING: f32 = 0.49;

/// `max_entity_results`, shrunk while the system reports
/// [`DegradationMode::MemoryConstrained`] so retrieval does less work per
/// query under the same backpressure that triggered the mode.
pub fn effective_max_entity_results(config: &Config, mode: DegradationMode) -> usize {
    match mode {
        DegradationMode::MemoryConstrained => (config.retrieval.max_entity_results / 2).max(1),
        _ => config.retrieval.max_entity_results,
    }
}

/// `hierarchy_depth`, shrunk the same way as [`effective_max_entity_results`].
pub fn effective_hierarchy_depth(config: &Config, mode: DegradationMode) -> u8 {
    match mode {
        DegradationMode::MemoryConstrained => (config.retrieval.hierarchy_depth / 2).max(1),
        _ => config.retrieval.hierarchy_depth,
    }
}

/// `candidate_k_vector`, shrunk the same way, and zeroed entirely while
/// [`DegradationMode::LocalQueue`] reports the graph store or chunk index as
/// unreachable — vector search hits the same chunk index, so there is
/// nothing to query.
pub fn effective_candidate_k(config: &Config, mode: DegradationMode) -> i64 {
    match mode {
        DegradationMode::LocalQueue => 0,
        DegradationMode::MemoryConstrained => (config.retrieval.candidate_k_vector / 2).max(1),
        _ => config.retrieval.candidate_k_vector,
    }
}

/// Closed query classification vocabulary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryClass {
    EquipmentMaintenance,
    SafetyProtocol,
    CleaningProcedure,
    Troubleshooting,
    General,
}

impl QueryClass {
    /// Short wire label used for `procedure_type` in [`RetrievalResponse`],
    /// distinct from this enum's own `Debug`/derived-`Serialize` form.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClass::EquipmentMaintenance => "maintenance",
            QueryClass::SafetyProtocol => "safety",
            QueryClass::CleaningProcedure => "cleaning",
            QueryClass::Troubleshooting => "troubleshooting",
            QueryClass::General => "general",
        }
    }
}

fn serialize_procedure_type<S: serde::Serializer>(class: &QueryClass, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(class.as_str())
}

const CLASS_KEYWORDS: &[(&[&str], QueryClass)] = &[
    (&["safety", "hazard", "warning", "danger", "ppe", "lockout", "tagout"], QueryClass::SafetyProtocol),
    (&["clean", "sanitiz", "wash", "boil-out", "boil out"], QueryClass::CleaningProcedure),
    (&["broken", "error", "not working", "troubleshoot", "fault", "won't start", "wont start"], QueryClass::Troubleshooting),
    (&["maintenance", "repair", "service", "replace", "install", "calibrat"], QueryClass::EquipmentMaintenance),
];

/// Classifies `query` into one of the closed [`QueryClass`] variants using a
/// fixed keyword table, first match wins.
pub fn classify_query(query: &str) -> QueryClass {
    let lower = query.to_lowercase();
    CLASS_KEYWORDS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(_, class)| *class)
        .unwrap_or(QueryClass::General)
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "has", "had", "was", "were",
    "what", "when", "where", "how", "why", "with", "this", "that", "these", "those", "does",
    "did", "doing", "from", "into", "about", "there", "their", "which", "who", "will", "would",
];

/// Extracts key terms from `query` by removing stop words and tokens
/// shorter than 3 characters, capped at 10 terms.
pub fn extract_key_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= 3 && !STOP_WORDS.contains(&t.as_str()))
        .collect::<Vec<_>>()
        .into_iter()
        .take(10)
        .collect()
}

fn match_fraction(terms: &[String], haystack: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let lower = haystack.to_lowercase();
    let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
    matched as f32 / terms.len() as f32
}

/// Computes the relevance score for one entity against `terms`.
pub fn relevance_score(entity: &Entity, terms: &[String]) -> f32 {
    let name_match = match_fraction(terms, &entity.canonical_name);
    let text_match = match_fraction(terms, &entity.surface_form);
    let context_overlap = match_fraction(terms, &entity.qsr_context);
    let confidence_boost = entity.confidence * 0.1;

    let base = 0.5 * name_match + 0.3 * text_match + 0.1 * context_overlap + confidence_boost;
    if entity.hierarchy_level <= 3 {
        base * 1.2
    } else {
        base
    }
}

/// Entity-level retrieval: scores and ranks entities matching `terms`,
/// capped at `max_results`.
pub async fn retrieve_entities(graph: &dyn GraphStore, terms: &[String], max_results: usize) -> CoreResult<Vec<(Entity, f32)>> {
    let candidates = graph.find_entities_by_terms(terms).await?;
    let mut scored: Vec<(Entity, f32)> = candidates
        .into_iter()
        .map(|entity| {
            let score = relevance_score(&entity, terms);
            (entity, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(max_results);
    Ok(scored)
}

/// Walks `BELONGS_TO` edges up from `entity` to `depth`, collecting ancestor
/// canonical names closest-first.
pub async fn hierarchical_ancestors(graph: &dyn GraphStore, entity: &Entity, depth: u8) -> CoreResult<Vec<String>> {
    let mut ancestors = Vec::new();
    let mut current_name = entity.canonical_name.clone();
    let mut current_type = entity.entity_type;

    for _ in 0..depth {
        let relationships = graph.relationships_from(&current_name, current_type).await?;
        let Some(parent) = relationships.iter().find(|r| r.relationship_type == RelationshipType::BelongsTo) else {
            break;
        };
        ancestors.push(parent.dst_canonical.clone());
        current_name = parent.dst_canonical.clone();
        current_type = parent.dst_entity_type;
    }
    Ok(ancestors)
}

/// Vector retrieval over the chunk index for `query`, when an embedding
/// provider is enabled; `Ok(Vec::new())` when embeddings are disabled so the
/// caller degrades to entity-only retrieval rather than failing.
pub async fn vector_retrieve(
    chunk_index: &dyn ChunkIndex,
    embedding_provider: &dyn EmbeddingProvider,
    config: &Config,
    query: &str,
) -> CoreResult<Vec<ScoredChunk>> {
    if !config.embedding.is_enabled() {
        return Ok(Vec::new());
    }
    let embedding = match embed_query(embedding_provider, &config.embedding, query).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(target: "audit", error = %e, "query embedding failed, degrading to entity-only retrieval");
            return Ok(Vec::new());
        }
    };
    chunk_index.vector_search(&embedding, config.retrieval.candidate_k_vector).await
}

/// Severity bucket for a mined safety warning.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Clone, Debug, Serialize)]
pub struct SafetyWarning {
    pub text: String,
    pub severity: Severity,
}

const SEVERITY_KEYWORDS: &[(&[&str], Severity)] = &[
    (&["lethal", "fatal", "death", "electrocut"], Severity::Critical),
    (&["danger", "severe burn", "hazard"], Severity::High),
    (&["warning", "caution", "burn"], Severity::Medium),
    (&["note", "reminder", "safety tip"], Severity::Low),
];

fn classify_severity(text: &str) -> Severity {
    let lower = text.to_lowercase();
    SEVERITY_KEYWORDS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(_, severity)| *severity)
        .unwrap_or(Severity::Low)
}

const SAFETY_KEYWORDS: &[&str] = &["danger", "caution", "warning", "safety", "hazard", "burn", "lethal", "fatal"];

/// Mines safety warnings from chunk text whose sentences contain a safety
/// keyword, classifying each by severity.
pub fn mine_safety_warnings(chunks: &[ScoredChunk]) -> Vec<SafetyWarning> {
    let mut out = Vec::new();
    for chunk in chunks {
        for sentence in split_sentences(&chunk.text) {
            let lower = sentence.to_lowercase();
            if SAFETY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                out.push(SafetyWarning {
                    text: sentence.trim().to_string(),
                    severity: classify_severity(&sentence),
                });
            }
        }
    }
    out
}

const ORDINAL_WORDS: &[&str] = &["first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth"];

/// Mines ordered procedure steps from chunk text using ordinal cues: the
/// word "step", numeric prefixes (`1.`, `2)`), and ordinal words.
pub fn mine_steps(chunks: &[ScoredChunk]) -> Vec<String> {
    let mut steps = Vec::new();
    for chunk in chunks {
        for line in chunk.text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let lower = trimmed.to_lowercase();
            let is_step_cue = lower.starts_with("step")
                || has_numeric_prefix(trimmed)
                || ORDINAL_WORDS.iter().any(|w| lower.starts_with(w));
            if is_step_cue {
                steps.push(trimmed.to_string());
            }
        }
    }
    steps
}

fn has_numeric_prefix(s: &str) -> bool {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return false;
    }
    matches!(s.as_bytes().get(digits.len()), Some(b'.') | Some(b')'))
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            sentences.push(current.trim().to_string());
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Rounds `minutes` up to the nearest 5-minute bucket.
fn round_to_5(minutes: f32) -> u32 {
    ((minutes / 5.0).ceil() * 5.0) as u32
}

/// Computes `max(5, steps*2) * (1 + 0.2*distinct_equipment)`, rounded to a
/// 5-minute bucket.
pub fn estimated_time_minutes(step_count: usize, distinct_equipment: usize) -> u32 {
    let base = (step_count as f32 * 2.0).max(5.0);
    round_to_5(base * (1.0 + 0.2 * distinct_equipment as f32))
}

/// Final composed response for a query.
#[derive(Clone, Debug, Serialize)]
pub struct RetrievalResponse {
    pub task_title: String,
    pub steps: Vec<String>,
    pub safety_warnings: Vec<SafetyWarning>,
    pub equipment_needed: Vec<String>,
    pub estimated_time_minutes: u32,
    pub media_references: Vec<String>,
    pub source_documents: Vec<String>,
    pub confidence: f32,
    #[serde(serialize_with = "serialize_procedure_type")]
    pub procedure_type: QueryClass,
    /// Set when this response was composed from at least one document whose
    /// extraction degraded to the seed graph. `confidence` is capped below
    /// 0.5 whenever this is set.
    pub note: Option<String>,
}

impl RetrievalResponse {
    /// Structured empty response: a clear "not found" title, confidence 0,
    /// and a single step advising the user to contact management. Never
    /// fabricates procedure content.
    pub fn empty() -> Self {
        RetrievalResponse {
            task_title: "No matching information found".to_string(),
            steps: vec!["This topic was not found in the indexed documentation. Please contact management for assistance.".to_string()],
            safety_warnings: Vec::new(),
            equipment_needed: Vec::new(),
            estimated_time_minutes: 0,
            media_references: Vec::new(),
            source_documents: Vec::new(),
            confidence: 0.0,
            procedure_type: QueryClass::General,
            note: None,
        }
    }
}

/// Composes a [`RetrievalResponse`] from scored entities, hybrid chunks, and
/// the query's classification. Returns [`RetrievalResponse::empty`]
/// when both inputs are empty. `degraded_documents` is the set of document
/// ids whose extraction fell back to the seed graph; any composed response
/// drawing on one of them gets `note` set and `confidence` capped below 0.5.
pub fn compose_response(
    query: &str,
    scored_entities: &[(Entity, f32)],
    chunks: &[ScoredChunk],
    citations: &[VisualCitation],
    procedure_type: QueryClass,
    degraded_documents: &BTreeSet<String>,
) -> RetrievalResponse {
    if scored_entities.is_empty() && chunks.is_empty() {
        return RetrievalResponse::empty();
    }

    let steps = mine_steps(chunks);
    let safety_warnings = mine_safety_warnings(chunks);

    let equipment_needed: Vec<String> = scored_entities
        .iter()
        .map(|(e, _)| e)
        .filter(|e| e.entity_type == EntityType::Equipment)
        .map(|e| e.canonical_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let source_documents: BTreeSet<String> = scored_entities
        .iter()
        .flat_map(|(e, _)| e.source_document_ids.iter().cloned())
        .chain(chunks.iter().map(|c| c.document_id.clone()))
        .collect();

    let estimated_time_minutes = estimated_time_minutes(steps.len(), equipment_needed.len());

    let composed_text = format!("{} {}", query, steps.join(" "));
    let detected = detect_references(&composed_text);
    let media_references: Vec<String> = detected
        .iter()
        .filter_map(|d: &DetectedReference| best_match(citations, d))
        .map(|c| c.citation_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let confidence = if scored_entities.is_empty() {
        0.5
    } else {
        let mean: f32 = scored_entities.iter().map(|(_, s)| s).sum::<f32>() / scored_entities.len() as f32;
        mean.clamp(0.0, 1.0)
    };

    let draws_on_degraded_document = source_documents.iter().any(|id| degraded_documents.contains(id));
    let (confidence, note) = if draws_on_degraded_document {
        (
            confidence.min(DEGRADED_CONFIDENCE_CEILING),
            Some("This answer draws on a document whose extraction was incomplete; some details may be missing. Please verify with management before relying on it.".to_string()),
        )
    } else {
        (confidence, None)
    };

    let task_title = scored_entities
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(e, _)| format!("{} — {:?}", e.canonical_name, procedure_type))
        .unwrap_or_else(|| query.to_string());

    RetrievalResponse {
        task_title,
        steps,
        safety_warnings,
        equipment_needed,
        estimated_time_minutes,
        media_references,
        source_documents: source_documents.into_iter().collect(),
        confidence,
        procedure_type,
        note,
    }
}

/// Looks up every document id referenced by `scored_entities` or `chunks`
/// and returns the subset whose extraction degraded to the seed graph, for
/// passing to [`compose_response`]'s `degraded_documents` parameter.
pub async fn collect_degraded_documents(graph: &dyn GraphStore, scored_entities: &[(Entity, f32)], chunks: &[ScoredChunk]) -> CoreResult<BTreeSet<String>> {
    let document_ids: BTreeSet<String> = scored_entities
        .iter()
        .flat_map(|(e, _)| e.source_document_ids.iter().cloned())
        .chain(chunks.iter().map(|c| c.document_id.clone()))
        .collect();

    let mut degraded = BTreeSet::new();
    for document_id in document_ids {
        if let Some(document) = graph.get_document(&document_id).await? {
            if document.degraded {
                degraded.insert(document_id);
            }
        }
    }
    Ok(degraded)
}

/// Merges entity-level document hits with vector-retrieved chunks into a
/// single scored chunk set for step-mining, using the same min-max +
/// weighted-merge shape [`crate::search::merge_hybrid`] uses for keyword vs.
/// vector fusion - here fusing "chunks from entity-matched documents" (score
/// 1.0, unranked) against true vector hits.
pub fn merge_entity_and_vector_chunks(entity_chunks: Vec<ScoredChunk>, vector_chunks: Vec<ScoredChunk>, alpha: f64, limit: usize) -> Vec<ScoredChunk> {
    merge_hybrid(&entity_chunks, &vector_chunks, alpha, limit)
}

/// Shapes composed text for audio rendering: numbered list
/// markers become "Step N,", and the result is truncated at a sentence
/// boundary to 300-400 characters.
pub fn shape_for_speech(text: &str) -> String {
    let mut shaped = String::new();
    let mut step_number = 0u32;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if has_numeric_prefix(trimmed) {
            step_number += 1;
            let rest = trimmed.trim_start_matches(|c: char| c.is_ascii_digit()).trim_start_matches(['.', ')']).trim();
            shaped.push_str(&format!("Step {step_number}, {rest} "));
        } else {
            shaped.push_str(trimmed);
            shaped.push(' ');
        }
    }
    truncate_at_sentence_boundary(shaped.trim(), 400)
}

fn truncate_at_sentence_boundary(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut boundary = max_len;
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let window = &text[..boundary];
    match window.rfind(['.', '!', '?']) {
        Some(idx) => text[..=idx].to_string(),
        None => window.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn classify_query_detects_safety_keywords() {
        assert_eq!(classify_query("What PPE is needed for this hazard?"), QueryClass::SafetyProtocol);
    }

    #[test]
    fn classify_query_defaults_to_general() {
        assert_eq!(classify_query("Tell me about the menu"), QueryClass::General);
    }

    #[test]
    fn extract_key_terms_strips_stopwords_and_short_tokens() {
        let terms = extract_key_terms("How do I clean the fryer with a brush?");
        assert!(!terms.contains(&"how".to_string()));
        assert!(!terms.contains(&"the".to_string()));
        assert!(terms.contains(&"clean".to_string()));
        assert!(terms.contains(&"fryer".to_string()));
        assert!(terms.contains(&"brush".to_string()));
    }

    #[test]
    fn extract_key_terms_caps_at_ten() {
        let query = "aaa bbb ccc ddd eee fff ggg hhh iii jjj kkk lll";
        assert_eq!(extract_key_terms(query).len(), 10);
    }

    fn entity(name: &str, surface: &str, context: &str, level: u8, confidence: f32) -> Entity {
        Entity {
            canonical_name: name.to_string(),
            surface_form: surface.to_string(),
            entity_type: EntityType::Equipment,
            hierarchy_level: level,
            parent_entity: None,
            source_document_ids: BTreeSet::new(),
            page_references: BTreeSet::new(),
            qsr_context: context.to_string(),
            confidence,
        }
    }

    #[test]
    fn relevance_score_rewards_name_match_over_context_match() {
        let terms = vec!["fryer".to_string()];
        let by_name = entity("Fryer", "unit", "", 4, 0.5);
        let by_context = entity("Unit", "unit", "fryer accessory", 4, 0.5);
        assert!(relevance_score(&by_name, &terms) > relevance_score(&by_context, &terms));
    }

    #[test]
    fn relevance_score_boosts_shallow_hierarchy_levels() {
        let terms = vec!["fryer".to_string()];
        let shallow = entity("Fryer", "fryer", "", 2, 0.5);
        let deep = entity("Fryer", "fryer", "", 5, 0.5);
        assert!(relevance_score(&shallow, &terms) > relevance_score(&deep, &terms));
    }

    fn chunk(text: &str) -> ScoredChunk {
        ScoredChunk { chunk_id: "c1".to_string(), document_id: "doc-1".to_string(), text: text.to_string(), page: Some(1), score: 1.0 }
    }

    #[test]
    fn mine_steps_finds_numbered_and_step_prefixed_lines() {
        let chunks = vec![chunk("1. Turn off the fryer\nStep 2: drain the oil\nSome other text")];
        let steps = mine_steps(&chunks);
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn mine_safety_warnings_classifies_severity() {
        let chunks = vec![chunk("Danger: hot oil can cause severe burns. Caution when lifting the basket.")];
        let warnings = mine_safety_warnings(&chunks);
        assert!(warnings.iter().any(|w| w.severity == Severity::High));
    }

    #[test]
    fn estimated_time_scales_with_steps_and_equipment() {
        assert_eq!(estimated_time_minutes(0, 0), 5);
        assert!(estimated_time_minutes(5, 2) > estimated_time_minutes(5, 0));
    }

    #[test]
    fn compose_response_returns_empty_when_nothing_found() {
        let response = compose_response("unknown topic", &[], &[], &[], QueryClass::General, &BTreeSet::new());
        assert_eq!(response.confidence, 0.0);
        assert_eq!(response.steps.len(), 1);
    }

    #[test]
    fn compose_response_empty_query_against_empty_retrieval_is_structured_empty() {
        // The literal "no key terms" edge case: classification and
        // key-term extraction run on an empty query, retrieval finds
        // nothing to score, and composition must return the structured
        // empty response rather than an error.
        let terms = extract_key_terms("");
        assert!(terms.is_empty());
        let response = compose_response("", &[], &[], &[], classify_query(""), &BTreeSet::new());
        assert_eq!(response.confidence, 0.0);
        assert_eq!(response.task_title, "No matching information found");
        assert_eq!(response.steps.len(), 1);
        assert!(response.source_documents.is_empty());
        assert!(response.note.is_none());
    }

    #[test]
    fn compose_response_collects_equipment_and_documents() {
        let mut equipment = entity("Fryer", "fryer", "", 2, 0.8);
        equipment.source_document_ids.insert("doc-1".to_string());
        let scored = vec![(equipment, 0.9)];
        let chunks = vec![chunk("Step 1: clean the fryer")];
        let response = compose_response("clean the fryer", &scored, &chunks, &[], QueryClass::CleaningProcedure, &BTreeSet::new());
        assert!(response.equipment_needed.contains(&"Fryer".to_string()));
        assert!(response.source_documents.contains(&"doc-1".to_string()));
        assert!(response.confidence > 0.0);
        assert!(response.note.is_none());
    }

    #[test]
    fn compose_response_caps_confidence_and_sets_note_for_degraded_document() {
        let mut equipment = entity("Fryer", "fryer", "", 2, 0.8);
        equipment.source_document_ids.insert("doc-1".to_string());
        let scored = vec![(equipment, 0.9)];
        let chunks = vec![chunk("Step 1: clean the fryer")];
        let mut degraded = BTreeSet::new();
        degraded.insert("doc-1".to_string());
        let response = compose_response("clean the fryer", &scored, &chunks, &[], QueryClass::CleaningProcedure, &degraded);
        assert!(response.confidence < 0.5);
        assert!(response.note.is_some());
    }

    #[test]
    fn effective_limits_shrink_under_memory_constrained_and_zero_vector_k_under_local_queue() {
        let config: Config = toml::from_str("db = { path = \"ignored.db\" }").unwrap();
        let normal_entities = effective_max_entity_results(&config, DegradationMode::Normal);
        let constrained_entities = effective_max_entity_results(&config, DegradationMode::MemoryConstrained);
        assert!(constrained_entities < normal_entities);

        let normal_depth = effective_hierarchy_depth(&config, DegradationMode::Normal);
        let constrained_depth = effective_hierarchy_depth(&config, DegradationMode::MemoryConstrained);
        assert!(constrained_depth < normal_depth);

        assert_eq!(effective_candidate_k(&config, DegradationMode::LocalQueue), 0);
        assert!(effective_candidate_k(&config, DegradationMode::MemoryConstrained) < config.retrieval.candidate_k_vector);
    }

    #[test]
    fn shape_for_speech_converts_numbered_lines_to_step_markers() {
        let shaped = shape_for_speech("1. Turn off power\n2. Remove the basket");
        assert!(shaped.starts_with("Step 1, Turn off power"));
        assert!(shaped.contains("Step 2, Remove the basket"));
    }

    #[test]
    fn shape_for_speech_truncates_long_text_at_sentence_boundary() {
        let long_text = "This is a sentence. ".repeat(50);
        let shaped = shape_for_speech(&long_text);
        assert!(shaped.len() <= 400);
        assert!(shaped.ends_with('.'));
    }

    #[test]
    fn shape_for_speech_does_not_panic_on_multibyte_char_at_truncation_point() {
        // Every 4th char is a 2-byte degree sign, so byte 400 is guaranteed to
        // land mid-character for some repeat count around there.
        let long_text = "Heat to 350°F. ".repeat(40);
        let shaped = shape_for_speech(&long_text);
        assert!(shaped.len() <= 400);
    }

    #[test]
    fn procedure_type_serializes_to_short_label() {
        let response = compose_response("clean the fryer", &[], &[], &[], QueryClass::CleaningProcedure, &BTreeSet::new());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["procedure_type"], "cleaning");
    }
}
