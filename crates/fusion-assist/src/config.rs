//! Typed service configuration loaded from TOML.
//!
//! Every section except `[db]`, `[storage]`, `[embedding]`, `[completion]`
//! and `[server]` has defaults. [`load_config`] rejects an invalid file at
//! startup rather than at first use.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fusion_core::chunk::SplitConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    pub embedding: EmbeddingConfig,
    pub completion: CompletionConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Where uploaded files are written.
    pub upload_dir: PathBuf,
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

impl ChunkingConfig {
    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    fusion_core::retrieve::DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Persisted messages replayed into a new session.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Trailing history entries included in a document-grounded prompt.
    #[serde(default = "default_rag_history_turns")]
    pub rag_history_turns: usize,
    /// Upper bound on in-memory history per session; oldest entries drop first.
    #[serde(default = "default_session_history_cap")]
    pub session_history_cap: usize,
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            rag_history_turns: default_rag_history_turns(),
            session_history_cap: default_session_history_cap(),
            bot_name: default_bot_name(),
        }
    }
}

fn default_history_limit() -> usize {
    10
}
fn default_rag_history_turns() -> usize {
    6
}
fn default_session_history_cap() -> usize {
    100
}
fn default_bot_name() -> String {
    "FusionBot".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `openai`, `ollama` or `gemini`.
    pub provider: String,
    pub model: String,
    pub dims: usize,
    /// Base URL override. Each provider has a default.
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    /// Bound on every embedding and completion call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries on 429/5xx/transport errors. Zero keeps provider calls single-shot.
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
        }
    }
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Environment variable holding the HS256 signing secret.
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret_env: default_jwt_secret_env(),
        }
    }
}

impl AuthConfig {
    pub fn secret(&self) -> Result<String> {
        let secret = std::env::var(&self.jwt_secret_env).with_context(|| {
            format!("{} environment variable not set", self.jwt_secret_env)
        })?;
        if secret.is_empty() {
            bail!("{} is empty", self.jwt_secret_env);
        }
        Ok(secret)
    }
}

fn default_jwt_secret_env() -> String {
    "FUSION_JWT_SECRET".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

const PROVIDERS: &[&str] = &["openai", "ollama", "gemini"];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config
        .chunking
        .split_config()
        .validate()
        .context("invalid [chunking]")?;

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.chat.session_history_cap < 2 {
        bail!("chat.session_history_cap must be >= 2");
    }

    if config.jobs.max_concurrency < 1 {
        bail!("jobs.max_concurrency must be >= 1");
    }

    if config.providers.timeout_secs == 0 {
        bail!("providers.timeout_secs must be > 0");
    }

    if !PROVIDERS.contains(&config.embedding.provider.as_str()) {
        bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, or gemini.",
            config.embedding.provider
        );
    }
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must be specified");
    }

    if !PROVIDERS.contains(&config.completion.provider.as_str()) {
        bail!(
            "Unknown completion provider: '{}'. Must be openai, ollama, or gemini.",
            config.completion.provider
        );
    }
    if config.completion.model.trim().is_empty() {
        bail!("completion.model must be specified");
    }
    if let Some(t) = config.completion.temperature {
        if !(0.0..=2.0).contains(&t) {
            bail!("completion.temperature must be in [0.0, 2.0]");
        }
    }

    Ok(())
}
