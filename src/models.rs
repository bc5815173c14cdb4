//! Core data types: [`Document`], [`Entity`], [`Relationship`], [`Chunk`],
//! [`VisualCitation`], and [`ProgressRecord`], plus the closed enums each one
//! is built on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Coarse QSR domain category. Closed set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QsrCategory {
    IceCream,
    Fryer,
    Grill,
    Beverage,
    Refrigeration,
    Cleaning,
    General,
}

impl Default for QsrCategory {
    fn default() -> Self {
        QsrCategory::General
    }
}

/// Closed document-type classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentType {
    ServiceManual,
    CleaningGuide,
    SafetyProtocol,
    OperationGuide,
    InstallationManual,
    TroubleshootingGuide,
    Training,
    Reference,
}

impl Default for DocumentType {
    fn default() -> Self {
        DocumentType::Reference
    }
}

/// A document and its derived metadata. Created once on successful
/// validation; `executive_summary`, `qsr_category`, `document_type`, and
/// `hierarchical_sections` are derived once at ingestion and immutable for
/// the life of this `document_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub filename: String,
    pub file_type: crate::validator::FileType,
    pub blob_path: String,
    pub page_count: Option<u32>,
    pub uploaded_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub executive_summary: String,
    pub qsr_category: QsrCategory,
    pub document_type: DocumentType,
    pub hierarchical_sections: Vec<String>,
    /// Set when this document's entity/relationship extraction fell back to
    /// the deterministic seed graph rather than completing an LLM-driven
    /// extraction. Surfaced to retrieval so answers built from this
    /// document's entities carry a "limited data" note and a capped
    /// confidence, per the degraded-ingestion visibility requirement.
    #[serde(default)]
    pub degraded: bool,
}

/// Submission priority. Consulted only while the orchestrator is in
/// [`crate::degradation::DegradationMode::SelectiveProcessing`]: uploads
/// below `High` are queued rather than processed immediately. Ordered
/// low-to-high in declaration order so `priority >= Priority::High` reads
/// naturally.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Kind of canonical concept an [`Entity`] represents. Closed set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Equipment,
    Procedure,
    Step,
    Component,
    Temperature,
    Safety,
    Parameter,
    Tool,
    Document,
    Entity,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Equipment => "equipment",
            EntityType::Procedure => "procedure",
            EntityType::Step => "step",
            EntityType::Component => "component",
            EntityType::Temperature => "temperature",
            EntityType::Safety => "safety",
            EntityType::Parameter => "parameter",
            EntityType::Tool => "tool",
            EntityType::Document => "document",
            EntityType::Entity => "entity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "equipment" => EntityType::Equipment,
            "procedure" => EntityType::Procedure,
            "step" => EntityType::Step,
            "component" => EntityType::Component,
            "temperature" => EntityType::Temperature,
            "safety" => EntityType::Safety,
            "parameter" => EntityType::Parameter,
            "tool" => EntityType::Tool,
            "document" => EntityType::Document,
            "entity" => EntityType::Entity,
            _ => return None,
        })
    }
}

/// A canonical concept extracted from one or more documents. Within a
/// graph, `(canonical_name, entity_type)` is unique.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    pub canonical_name: String,
    pub surface_form: String,
    pub entity_type: EntityType,
    /// 1 = equipment category ... 6 = fine detail.
    pub hierarchy_level: u8,
    pub parent_entity: Option<String>,
    pub source_document_ids: BTreeSet<String>,
    pub page_references: BTreeSet<u32>,
    pub qsr_context: String,
    pub confidence: f32,
}

impl Entity {
    /// `(canonical_name, entity_type)` identity key.
    pub fn key(&self) -> (String, EntityType) {
        (self.canonical_name.clone(), self.entity_type)
    }

    /// Count of populated (non-empty/non-default) fields, used to pick the
    /// "most complete" record when merging duplicates.
    pub fn completeness(&self) -> u32 {
        let mut n = 0;
        if !self.surface_form.is_empty() {
            n += 1;
        }
        if self.parent_entity.is_some() {
            n += 1;
        }
        if !self.qsr_context.is_empty() {
            n += 1;
        }
        if !self.source_document_ids.is_empty() {
            n += 1;
        }
        if !self.page_references.is_empty() {
            n += 1;
        }
        n
    }
}

/// Directed, typed edge between two entities. Closed semantic type set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Contains,
    PartOf,
    Requires,
    ProcedureFor,
    SafetyWarningFor,
    FollowedBy,
    Documents,
    ParameterOf,
    BelongsTo,
    RelatedTo,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Contains => "CONTAINS",
            RelationshipType::PartOf => "PART_OF",
            RelationshipType::Requires => "REQUIRES",
            RelationshipType::ProcedureFor => "PROCEDURE_FOR",
            RelationshipType::SafetyWarningFor => "SAFETY_WARNING_FOR",
            RelationshipType::FollowedBy => "FOLLOWED_BY",
            RelationshipType::Documents => "DOCUMENTS",
            RelationshipType::ParameterOf => "PARAMETER_OF",
            RelationshipType::BelongsTo => "BELONGS_TO",
            RelationshipType::RelatedTo => "RELATED_TO",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Relationship {
    pub src_canonical: String,
    pub src_entity_type: EntityType,
    pub dst_canonical: String,
    pub dst_entity_type: EntityType,
    pub relationship_type: RelationshipType,
    pub source_document_ids: BTreeSet<String>,
    pub confidence: f32,
}

/// A searchable text fragment of a document, with an optional embedding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub page: Option<u32>,
    pub offset: usize,
    pub embedding: Option<Vec<f32>>,
}

/// Discriminator for the kind of visual artifact a [`VisualCitation`] points
/// at.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationType {
    Image,
    Diagram,
    Table,
    TextSection,
    SafetyWarning,
}

/// Stable, content-addressed reference to a visual artifact inside a
/// document. `citation_id` is a pure function of
/// `(document_id, page, reference_text)`; cached bytes are materialized
/// lazily.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VisualCitation {
    pub citation_id: String,
    pub citation_type: CitationType,
    pub document_id: String,
    pub page_number: u32,
    pub reference_text: String,
    pub bbox: Option<(f32, f32, f32, f32)>,
    pub xref: Option<String>,
    #[serde(skip)]
    pub cached_bytes: Option<Vec<u8>>,
}

/// Stage of the background ingestion pipeline. Order matters: it is the
/// order in which a `ProgressRecord` is expected to be observed for one
/// `process_id` (barring `failed`, which is terminal from wherever it
/// occurs).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Uploaded,
    Validated,
    TextExtracted,
    EntitiesExtracted,
    RelationshipsGenerated,
    Indexed,
    Verified,
    Failed,
}

impl Stage {
    pub fn percent(&self) -> u8 {
        match self {
            Stage::Uploaded => 10,
            Stage::Validated => 25,
            Stage::TextExtracted => 40,
            Stage::EntitiesExtracted => 60,
            Stage::RelationshipsGenerated => 75,
            Stage::Indexed => 90,
            Stage::Verified => 100,
            Stage::Failed => 100,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Verified | Stage::Failed)
    }
}

/// Durable, observable state of one background ingestion. `percent` is
/// monotonically non-decreasing for a given `process_id`; once `terminal`
/// is true the record never changes again.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub process_id: String,
    pub document_id: String,
    pub stage: Stage,
    pub percent: u8,
    pub message: String,
    pub entities_found: u32,
    pub relationships_found: u32,
    pub updated_at: DateTime<Utc>,
    pub terminal: bool,
}

impl ProgressRecord {
    pub fn new(process_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        let now = Utc::now();
        ProgressRecord {
            process_id: process_id.into(),
            document_id: document_id.into(),
            stage: Stage::Uploaded,
            percent: Stage::Uploaded.percent(),
            message: "uploaded".to_string(),
            entities_found: 0,
            relationships_found: 0,
            updated_at: now,
            terminal: false,
        }
    }
}
