//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or
//! [`Config::minimal`]) is a working configuration: a local `./data`
//! directory, the deterministic `hash` embedder, and no generative model.
//!
//! ```toml
//! [paths]
//! data_dir = "./data"
//!
//! [chunking]
//! chunk_size = 800
//! chunk_overlap = 120
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use intel_qa_core::text::DEFAULT_TECHNICAL_TERMS;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub text: TextConfig,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// All defaults. Used by tests and when no config file is given.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// All defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.paths.data_dir = data_dir.into();
        config
    }
}

// ============ Paths ============

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub source_dir: Option<PathBuf>,
    #[serde(default)]
    pub index_dir: Option<PathBuf>,
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    #[serde(default)]
    pub tables_file: Option<PathBuf>,
    #[serde(default)]
    pub table_texts_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            source_dir: None,
            index_dir: None,
            manifest: None,
            tables_file: None,
            table_texts_file: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl PathsConfig {
    fn under_data(&self, explicit: &Option<PathBuf>, name: &str) -> PathBuf {
        explicit
            .clone()
            .unwrap_or_else(|| self.data_dir.join(name))
    }

    pub fn source_dir(&self) -> PathBuf {
        self.under_data(&self.source_dir, "source")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.under_data(&self.index_dir, "vector_index")
    }

    pub fn manifest(&self) -> PathBuf {
        self.under_data(&self.manifest, "processed_files.json")
    }

    pub fn tables_file(&self) -> PathBuf {
        self.under_data(&self.tables_file, "extracted_tables.json")
    }

    pub fn table_texts_file(&self) -> PathBuf {
        self.under_data(&self.table_texts_file, "table_texts.json")
    }
}

// ============ Chunking / Text ============

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct TextConfig {
    #[serde(default = "default_technical_terms")]
    pub technical_terms: Vec<String>,
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            technical_terms: default_technical_terms(),
            min_chunk_chars: default_min_chunk_chars(),
        }
    }
}

fn default_technical_terms() -> Vec<String> {
    DEFAULT_TECHNICAL_TERMS
        .iter()
        .map(|t| t.to_string())
        .collect()
}
fn default_min_chunk_chars() -> usize {
    50
}

// ============ Tables ============

#[derive(Debug, Deserialize, Clone)]
pub struct TablesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_accuracy")]
    pub min_accuracy: f64,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,
    #[serde(default = "default_fallback_min_tables")]
    pub fallback_min_tables: usize,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<String>,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_accuracy: default_min_accuracy(),
            dedup_threshold: default_dedup_threshold(),
            fallback_min_tables: default_fallback_min_tables(),
            strategies: default_strategies(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_min_accuracy() -> f64 {
    0.5
}
fn default_dedup_threshold() -> f64 {
    0.8
}
fn default_fallback_min_tables() -> usize {
    2
}
fn default_strategies() -> Vec<String> {
    ["layout", "text_flow", "text_pattern", "whole_document"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    #[serde(default = "default_display_chars")]
    pub display_chars: usize,
    #[serde(default = "default_table_preview_lines")]
    pub table_preview_lines: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            overfetch_factor: default_overfetch_factor(),
            display_chars: default_display_chars(),
            table_preview_lines: default_table_preview_lines(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_overfetch_factor() -> usize {
    2
}
fn default_display_chars() -> usize {
    300
}
fn default_table_preview_lines() -> usize {
    5
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for `ollama` (default `http://localhost:11434`) or an
    /// OpenAI-compatible server (default `https://api.openai.com`).
    #[serde(default)]
    pub url: Option<String>,
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
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

// ============ LLM ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    /// Overrides the built-in prompt. `{context}`, `{question}` and
    /// `{result_count}` are substituted.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            endpoint: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
            prompt: None,
        }
    }
}

fn default_llm_provider() -> String {
    "none".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    200
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_max_retries() -> u32 {
    2
}

// ============ Source / Logging ============

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.pdf", "**/*.txt", "**/*.md"]
        .iter()
        .map(|g| g.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============ Loading ============

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    if !(0.0..=1.0).contains(&config.tables.min_accuracy) {
        bail!("tables.min_accuracy must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.tables.dedup_threshold) {
        bail!("tables.dedup_threshold must be in [0.0, 1.0]");
    }
    for name in &config.tables.strategies {
        match name.as_str() {
            "layout" | "text_flow" | "text_pattern" | "whole_document" => {}
            other => bail!(
                "Unknown table strategy: '{}'. Must be layout, text_flow, text_pattern, or whole_document.",
                other
            ),
        }
    }

    if config.retrieval.default_k == 0 {
        bail!("retrieval.default_k must be >= 1");
    }
    if config.retrieval.overfetch_factor == 0 {
        bail!("retrieval.overfetch_factor must be >= 1");
    }

    let emb = &config.embedding;
    match emb.provider.as_str() {
        "disabled" | "hash" | "local" => {}
        "openai" | "ollama" => {
            if emb.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    emb.provider
                );
            }
            if emb.dims.is_none() || emb.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    emb.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, local, or disabled.",
            other
        ),
    }
    if emb.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if emb.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.llm.provider.as_str() {
        "none" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be none, openai, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.max_tokens == 0 {
        bail!("llm.max_tokens must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 120);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.llm.provider, "none");
        assert_eq!(config.retrieval.default_k, 5);
        assert_eq!(config.tables.strategies.len(), 4);
        assert!(config.source.include_globs.iter().any(|g| g == "**/*.md"));
        assert_eq!(
            config.paths.manifest(),
            PathBuf::from("./data").join("processed_files.json")
        );
    }

    #[test]
    fn test_explicit_paths_win() {
        let config = parse(
            r#"
            [paths]
            data_dir = "/srv/iqa"
            index_dir = "/var/index"
            "#,
        )
        .unwrap();
        assert_eq!(config.paths.index_dir(), PathBuf::from("/var/index"));
        assert_eq!(config.paths.source_dir(), PathBuf::from("/srv/iqa/source"));
    }

    #[test]
    fn test_invalid_overlap_rejected() {
        let err = parse("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_openai_embedding_requires_model_and_dims() {
        assert!(parse("[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n"
        )
        .is_ok());
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(parse("[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[llm]\nprovider = \"gemini\"\n").is_err());
        assert!(parse("[tables]\nstrategies = [\"camelot\"]\n").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iqa.toml");
        std::fs::write(&path, "[retrieval]\ndefault_k = 3\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.retrieval.default_k, 3);
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
