//! TOML configuration.
//!
//! Every section is optional; a missing config file yields the defaults.
//! Secrets never live in the file: the CLI reads them from the environment
//! into [`Secrets`] and passes them down explicitly.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docrag_core::chunk::TextSplitter;

use crate::error::RagError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub diagrams: DiagramsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Recorded `source` paths are made relative to this directory.
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    #[serde(default = "default_source_dirs")]
    pub source_dirs: Vec<PathBuf>,
    #[serde(default = "default_vectorstore_dir")]
    pub vectorstore_dir: PathBuf,
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            source_dirs: default_source_dirs(),
            vectorstore_dir: default_vectorstore_dir(),
            manifest: default_manifest(),
        }
    }
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_source_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("data/uploads"), PathBuf::from("docs")]
}
fn default_vectorstore_dir() -> PathBuf {
    PathBuf::from("data/rag/vectorstore")
}
fn default_manifest() -> PathBuf {
    PathBuf::from("data/rag/docs-manifest.json")
}

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
pub struct EmbeddingConfig {
    /// Model identifier; its prefix selects the backend.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Overrides the known dimensionality of the model.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Texts per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_url")]
    pub openai_url: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: None,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: default_embedding_timeout(),
            openai_url: default_openai_url(),
            ollama_url: default_ollama_url(),
        }
    }
}

fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    60
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            k: default_k(),
        }
    }
}

fn default_collection() -> String {
    "docs".to_string()
}
fn default_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_url")]
    pub url: String,
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: default_chat_url(),
            timeout_secs: default_chat_timeout(),
        }
    }
}

fn default_chat_url() -> String {
    "https://kb.terpedia.com/v1/api/chat".to_string()
}
fn default_chat_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_report_url")]
    pub url: String,
    #[serde(default = "default_report_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_report_timeout")]
    pub timeout_secs: u64,
    /// Sent as `HTTP-Referer` when set.
    #[serde(default)]
    pub referer: Option<String>,
    /// Sent as `X-Title` when set.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            url: default_report_url(),
            model: default_report_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_report_timeout(),
            referer: None,
            title: None,
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_report_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}
fn default_report_model() -> String {
    "openai/gpt-4o-mini".to_string()
}
fn default_temperature() -> f64 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_report_timeout() -> u64 {
    120
}
fn default_system_prompt() -> String {
    "You are Terpedia's scientific writing assistant. \
     Produce journal-quality scientific prose aligned with the provided template. \
     Respect headings, requested word counts, and guardrails. \
     Do not invent data beyond the context supplied."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    /// Optional manifest listing the chunk files.
    #[serde(default)]
    pub index: Option<PathBuf>,
    #[serde(default = "default_corpus_persist_dir")]
    pub persist_dir: PathBuf,
    #[serde(default = "default_corpus_collection")]
    pub collection: String,
    #[serde(default)]
    pub embed_model: Option<String>,
    /// Records per upsert.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            processed_dir: default_processed_dir(),
            index: None,
            persist_dir: default_corpus_persist_dir(),
            collection: default_corpus_collection(),
            embed_model: None,
            batch_size: default_batch_size(),
        }
    }
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("research/corpus/processed")
}
fn default_corpus_persist_dir() -> PathBuf {
    PathBuf::from("research/rag/collections")
}
fn default_corpus_collection() -> String {
    "research".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiagramsConfig {
    #[serde(default = "default_repo_root")]
    pub root: PathBuf,
    /// Standalone Mermaid sources, relative to `root`.
    #[serde(default = "default_mmd_files")]
    pub mmd_files: Vec<PathBuf>,
    /// HTML pages with `<div class="mermaid">` blocks, relative to `root`.
    #[serde(default = "default_html_sources")]
    pub html_sources: Vec<PathBuf>,
    /// Renderer command; `-i <src> -o <out> --quiet` is appended.
    #[serde(default = "default_renderer")]
    pub renderer: Vec<String>,
}

impl Default for DiagramsConfig {
    fn default() -> Self {
        Self {
            root: default_repo_root(),
            mmd_files: default_mmd_files(),
            html_sources: default_html_sources(),
            renderer: default_renderer(),
        }
    }
}

fn default_mmd_files() -> Vec<PathBuf> {
    vec![PathBuf::from("META-METHODS.mmd")]
}
fn default_html_sources() -> Vec<PathBuf> {
    vec![
        PathBuf::from("meta-methods.html"),
        PathBuf::from("study-methods.html"),
    ]
}
fn default_renderer() -> Vec<String> {
    ["npx", "-y", "@mermaid-js/mermaid-cli@10.9.0"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// API credentials gathered at the CLI boundary.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub chat_api_key: Option<String>,
}

impl Secrets {
    /// Build from a variable lookup (normally `std::env::var`). Empty
    /// values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            chat_api_key: get("KB_CHAT_API_KEY"),
        }
    }
}

impl Config {
    /// Check cross-field constraints. Called after file parsing and again
    /// after CLI overrides are applied.
    pub fn validate(&self) -> Result<()> {
        TextSplitter::new(self.chunking.chunk_size, self.chunking.chunk_overlap)
            .map_err(|e| RagError::config(format!("chunking: {}", e)))?;

        if self.embedding.batch_size == 0 {
            return Err(RagError::config("embedding.batch_size must be > 0").into());
        }
        if self.corpus.batch_size == 0 {
            return Err(RagError::config("corpus.batch_size must be > 0").into());
        }
        if self.retrieval.k == 0 {
            return Err(RagError::config("retrieval.k must be >= 1").into());
        }
        if self.diagrams.renderer.is_empty() {
            return Err(RagError::config("diagrams.renderer must name a command").into());
        }
        Ok(())
    }
}

/// Load configuration from `path`, or the defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
