//! Visual citation indexing and retrieval.
//!
//! `citation_id` is `sha256(document_id + "\0" + page + "\0" + reference_text)`
//! hex-encoded, the same "hash of a deterministic tuple, hex-encoded" idiom
//! [`crate::chunk`] uses for chunk ids. Citations are persisted directly
//! against the `visual_citations` table (rather than through
//! [`crate::storage::GraphStore`], which only covers documents/entities/
//! relationships) since they are a citation-specific projection, not part of
//! the property graph itself.
//!
//! Rendering actual image bytes re-extracts from the source document through
//! a [`crate::render::PageRenderer`], using the citation's stored `xref`;
//! [`render_citation`] never fabricates content — a citation with no `xref`
//! or one the renderer can't resolve is `NotFound`.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::error::{CoreError, CoreResult};
use crate::models::{CitationType, VisualCitation};
use crate::render::PageRenderer;

/// Computes the content-addressed `citation_id` for a visual artifact.
pub fn citation_id(document_id: &str, page: u32, reference_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(page.to_be_bytes());
    hasher.update([0u8]);
    hasher.update(reference_text.as_bytes());
    hex::encode(hasher.finalize())
}

/// One pattern family recognized in answer text, paired with the
/// [`CitationType`] it implies.
struct PatternFamily {
    citation_type: CitationType,
    prefixes: &'static [&'static str],
}

const PATTERN_FAMILIES: &[PatternFamily] = &[
    PatternFamily { citation_type: CitationType::Diagram, prefixes: &["diagram "] },
    PatternFamily { citation_type: CitationType::Image, prefixes: &["figure "] },
    PatternFamily { citation_type: CitationType::Table, prefixes: &["table "] },
    PatternFamily { citation_type: CitationType::TextSection, prefixes: &["page ", "section "] },
    PatternFamily { citation_type: CitationType::SafetyWarning, prefixes: &["warning", "caution", "danger", "hazard"] },
];

/// One detected reference to a visual artifact inside an answer string.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedReference {
    pub citation_type: CitationType,
    pub reference_text: String,
}

/// Scans `answer_text` for visual-reference pattern families: `diagram N`,
/// `figure N`, `table N`, `page N`, `section N.M`, and safety words.
/// Temperature expressions are handled separately by the retrieval composer
/// (they don't name a visual artifact).
pub fn detect_references(answer_text: &str) -> Vec<DetectedReference> {
    let lower = answer_text.to_lowercase();
    let mut out = Vec::new();

    for family in PATTERN_FAMILIES {
        for prefix in family.prefixes {
            let mut search_from = 0;
            while let Some(rel_idx) = lower[search_from..].find(prefix) {
                let start = search_from + rel_idx;
                let after_prefix = start + prefix.len();
                let rest = &lower[after_prefix..];
                let number_len = rest
                    .chars()
                    .take_while(|c| c.is_ascii_digit() || *c == '.')
                    .count();
                let end = if number_len > 0 { after_prefix + number_len } else { after_prefix };
                let reference_text = answer_text[start..end].trim().to_string();
                if !reference_text.is_empty() {
                    out.push(DetectedReference {
                        citation_type: family.citation_type,
                        reference_text,
                    });
                }
                search_from = end.max(after_prefix);
                if search_from <= start {
                    break;
                }
            }
        }
    }
    out
}

/// Builds a candidate [`VisualCitation`] for a detected reference, scoped to
/// `document_id`/`page`. Indexing (walking a document's pages to enumerate
/// real artifacts) happens once per document on first need and is cached;
/// this just shapes the metadata for a reference already matched to a page.
pub fn build_citation(document_id: &str, page: u32, detected: &DetectedReference) -> VisualCitation {
    VisualCitation {
        citation_id: citation_id(document_id, page, &detected.reference_text),
        citation_type: detected.citation_type,
        document_id: document_id.to_string(),
        page_number: page,
        reference_text: detected.reference_text.clone(),
        bbox: None,
        xref: None,
        cached_bytes: None,
    }
}

/// Finds the best matching citation among `candidates` for `detected`: exact
/// reference-text match first, then same citation type on the lowest page
/// number.
pub fn best_match<'a>(candidates: &'a [VisualCitation], detected: &DetectedReference) -> Option<&'a VisualCitation> {
    candidates
        .iter()
        .find(|c| c.reference_text.eq_ignore_ascii_case(&detected.reference_text))
        .or_else(|| {
            candidates
                .iter()
                .filter(|c| c.citation_type == detected.citation_type)
                .min_by_key(|c| c.page_number)
        })
}

/// Materializes a citation's PNG bytes by re-extracting them from the owning
/// document through `renderer`, using the citation's stored `xref`. Fails
/// `NotFound` rather than fabricating content when the xref is absent or
/// unresolvable.
pub fn render_citation(renderer: &dyn PageRenderer, document_bytes: &[u8], citation: &VisualCitation) -> CoreResult<Vec<u8>> {
    renderer.render(document_bytes, citation.xref.as_deref())
}

fn citation_type_str(t: CitationType) -> &'static str {
    match t {
        CitationType::Image => "image",
        CitationType::Diagram => "diagram",
        CitationType::Table => "table",
        CitationType::TextSection => "text_section",
        CitationType::SafetyWarning => "safety_warning",
    }
}

fn parse_citation_type(s: &str) -> Option<CitationType> {
    Some(match s {
        "image" => CitationType::Image,
        "diagram" => CitationType::Diagram,
        "table" => CitationType::Table,
        "text_section" => CitationType::TextSection,
        "safety_warning" => CitationType::SafetyWarning,
        _ => return None,
    })
}

/// Direct SQLite-backed persistence for [`VisualCitation`]s against the
/// `visual_citations` table. Not exposed through [`crate::storage::GraphStore`]:
/// citations are a citation-specific projection cached on demand, not part
/// of the core property graph the dual-writer maintains.
pub struct VisualCitationStore {
    pool: SqlitePool,
}

impl VisualCitationStore {
    pub fn new(pool: SqlitePool) -> Self {
        VisualCitationStore { pool }
    }

    pub async fn upsert(&self, citation: &VisualCitation) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO visual_citations (citation_id, document_id, citation_type, page_number, reference_text, bbox, xref)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(citation_id) DO UPDATE SET
                bbox = excluded.bbox,
                xref = excluded.xref
            "#,
        )
        .bind(&citation.citation_id)
        .bind(&citation.document_id)
        .bind(citation_type_str(citation.citation_type))
        .bind(citation.page_number as i64)
        .bind(&citation.reference_text)
        .bind(citation.bbox.map(|b| serde_json::to_string(&[b.0, b.1, b.2, b.3]).unwrap()))
        .bind(&citation.xref)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn list_for_document(&self, document_id: &str) -> CoreResult<Vec<VisualCitation>> {
        let rows = sqlx::query("SELECT * FROM visual_citations WHERE document_id = ?")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;
        rows.iter().map(row_to_citation).collect()
    }

    pub async fn get(&self, citation_id: &str) -> CoreResult<Option<VisualCitation>> {
        let row = sqlx::query("SELECT * FROM visual_citations WHERE citation_id = ?")
            .bind(citation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::from)?;
        row.as_ref().map(row_to_citation).transpose()
    }
}

fn row_to_citation(row: &sqlx::sqlite::SqliteRow) -> CoreResult<VisualCitation> {
    let citation_type_str: String = row.try_get("citation_type").map_err(CoreError::from)?;
    let citation_type = parse_citation_type(&citation_type_str)
        .ok_or_else(|| CoreError::internal(format!("unrecognized stored citation_type: {citation_type_str}")))?;
    let bbox_raw: Option<String> = row.try_get("bbox").map_err(CoreError::from)?;
    let bbox = bbox_raw.and_then(|raw| serde_json::from_str::<[f32; 4]>(&raw).ok()).map(|b| (b[0], b[1], b[2], b[3]));

    Ok(VisualCitation {
        citation_id: row.try_get("citation_id").map_err(CoreError::from)?,
        citation_type,
        document_id: row.try_get("document_id").map_err(CoreError::from)?,
        page_number: row.try_get::<i64, _>("page_number").map_err(CoreError::from)? as u32,
        reference_text: row.try_get("reference_text").map_err(CoreError::from)?,
        bbox,
        xref: row.try_get("xref").map_err(CoreError::from)?,
        cached_bytes: None,
    })
}
