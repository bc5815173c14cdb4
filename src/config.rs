//! Configuration parsing and validation.
//!
//! The core is configured via a TOML file (default: `config/qsr.toml`). The
//! config defines the database path, chunking parameters, embedding and LLM
//! provider settings, retrieval tuning, ingestion concurrency/deadlines, and
//! the demonstration HTTP host's bind address.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub blobs: BlobConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    #[serde(default = "default_blob_dir")]
    pub dir: PathBuf,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            dir: default_blob_dir(),
        }
    }
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            overlap_ratio: default_overlap_ratio(),
        }
    }
}

fn default_target_tokens() -> usize {
    384
}

fn default_overlap_ratio() -> f32 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_max_entity_results")]
    pub max_entity_results: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    #[serde(default = "default_hierarchy_depth")]
    pub hierarchy_depth: u8,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k_vector: default_candidate_k(),
            max_entity_results: default_max_entity_results(),
            final_limit: default_final_limit(),
            hierarchy_depth: default_hierarchy_depth(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_max_entity_results() -> usize {
    20
}
fn default_final_limit() -> i64 {
    12
}
fn default_hierarchy_depth() -> u8 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// LLM provider used for summarization and entity/relationship extraction.
/// Mirrors [`EmbeddingConfig`]'s shape: `provider = "disabled"` runs the
/// deterministic rule-based / seed-graph fallback paths exclusively.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            max_retries: default_llm_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_llm_max_retries() -> u32 {
    3
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Ingestion orchestrator tuning: background worker pool size and per-stage
/// deadlines.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_n_ingest")]
    pub n_ingest: usize,
    #[serde(default = "default_extraction_deadline_secs")]
    pub extraction_deadline_secs: u64,
    #[serde(default = "default_dual_writer_deadline_secs")]
    pub dual_writer_deadline_secs: u64,
    #[serde(default = "default_max_stage_retries")]
    pub max_stage_retries: u32,
    #[serde(default = "default_progress_retention_secs")]
    pub progress_retention_secs: u64,
    #[serde(default = "default_progress_soft_cap")]
    pub progress_soft_cap: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            n_ingest: default_n_ingest(),
            extraction_deadline_secs: default_extraction_deadline_secs(),
            dual_writer_deadline_secs: default_dual_writer_deadline_secs(),
            max_stage_retries: default_max_stage_retries(),
            progress_retention_secs: default_progress_retention_secs(),
            progress_soft_cap: default_progress_soft_cap(),
        }
    }
}

fn default_n_ingest() -> usize {
    4
}
fn default_extraction_deadline_secs() -> u64 {
    120
}
fn default_dual_writer_deadline_secs() -> u64 {
    60
}
fn default_max_stage_retries() -> u32 {
    3
}
fn default_progress_retention_secs() -> u64 {
    3600
}
fn default_progress_soft_cap() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8089".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.target_tokens == 0 {
        anyhow::bail!("chunking.target_tokens must be > 0");
    }
    if !(0.0..1.0).contains(&config.chunking.overlap_ratio) {
        anyhow::bail!("chunking.overlap_ratio must be in [0.0, 1.0)");
    }

    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }
    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.ingestion.n_ingest == 0 {
        anyhow::bail!("ingestion.n_ingest must be > 0");
    }

    Ok(config)
}
