//! HTTP embedding backends.
//!
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings`.
//! - **[`OllamaEmbedder`]**: `POST /api/embed` on a local Ollama instance.
//! - **[`GeminiEmbedder`]**: `POST /v1beta/{model}:embedContent`.
//!
//! Every backend checks that the returned vector has the configured
//! dimensionality; a mismatch is a provider failure, not a truncation.
//! Use [`create_embedding_provider`] to pick one from config.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use fusion_core::embedding::EmbeddingProvider;

use crate::config::{EmbeddingConfig, ProvidersConfig};
use crate::http::{api_key, base_url, build_client, send_json};

fn check_dims(label: &str, vec: Vec<f32>, dims: usize) -> Result<Vec<f32>> {
    if vec.len() != dims {
        bail!(
            "{} returned a {}-dimension vector, expected {}",
            label,
            vec.len(),
            dims
        );
    }
    Ok(vec)
}

fn json_floats(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid {} response: embedding is not an array", what))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("Invalid {} response: non-numeric value", what))
        })
        .collect()
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig, providers: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(providers)?,
            model: config.model.clone(),
            dims: config.dims,
            url: base_url(config.url.as_deref(), "https://api.openai.com"),
            api_key: api_key(config.api_key_env.as_deref(), "OPENAI_API_KEY")?,
            max_retries: providers.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({ "model": self.model, "input": [text] });
        let json = send_json("OpenAI", self.max_retries, || {
            self.client
                .post(format!("{}/v1/embeddings", self.url))
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        check_dims("OpenAI", parse_openai_response(&json)?, self.dims)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;
    let embedding = first
        .get("embedding")
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
    json_floats(embedding, "OpenAI")
}

// ============ Ollama ============

/// Calls `POST /api/embed` on the configured URL (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig, providers: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(providers)?,
            model: config.model.clone(),
            dims: config.dims,
            url: base_url(config.url.as_deref(), "http://localhost:11434"),
            max_retries: providers.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({ "model": self.model, "input": [text] });
        let json = send_json("Ollama", self.max_retries, || {
            self.client
                .post(format!("{}/api/embed", self.url))
                .json(&body)
        })
        .await?;
        check_dims("Ollama", parse_ollama_response(&json)?, self.dims)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;
    json_floats(first, "Ollama")
}

// ============ Gemini ============

/// Google Generative Language API. The default model is `models/embedding-001`
/// (768 dimensions).
pub struct GeminiEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
}

/// Gemini model ids are addressed as `models/<name>`.
pub(crate) fn gemini_model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig, providers: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(providers)?,
            model: gemini_model_path(&config.model),
            dims: config.dims,
            url: base_url(
                config.url.as_deref(),
                "https://generativelanguage.googleapis.com",
            ),
            api_key: api_key(config.api_key_env.as_deref(), "GEMINI_API_KEY")?,
            max_retries: providers.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "content": { "parts": [{ "text": text }] },
        });
        let json = send_json("Gemini", self.max_retries, || {
            self.client
                .post(format!("{}/v1beta/{}:embedContent", self.url, self.model))
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;
        check_dims("Gemini", parse_gemini_response(&json)?, self.dims)
    }
}

fn parse_gemini_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let values = json
        .get("embedding")
        .and_then(|e| e.get("values"))
        .ok_or_else(|| anyhow!("Invalid Gemini response: missing embedding.values"))?;
    json_floats(values, "Gemini")
}

/// Build the configured embedding backend.
pub fn create_embedding_provider(
    config: &EmbeddingConfig,
    providers: &ProvidersConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config, providers)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config, providers)?)),
        "gemini" => Ok(Arc::new(GeminiEmbedder::new(config, providers)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
