//! HTTP completion backends: OpenAI chat completions, Ollama `/api/chat`
//! and Gemini `generateContent`.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use fusion_core::completion::{CompletionProvider, PromptMessage, Role};

use crate::config::{CompletionConfig, ProvidersConfig};
use crate::embedding::gemini_model_path;
use crate::http::{api_key, base_url, build_client, send_json};

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// OpenAI and Ollama share the `{role, content}` message shape.
fn chat_messages(messages: &[PromptMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({ "role": role_name(m.role), "content": m.content }))
        .collect()
}

fn non_empty(text: &str, label: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        bail!("{} returned an empty completion", label);
    }
    Ok(text.to_string())
}

// ============ OpenAI ============

pub struct OpenAICompleter {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    temperature: Option<f32>,
    max_retries: u32,
}

impl OpenAICompleter {
    pub fn new(config: &CompletionConfig, providers: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(providers)?,
            model: config.model.clone(),
            url: base_url(config.url.as_deref(), "https://api.openai.com"),
            api_key: api_key(config.api_key_env.as_deref(), "OPENAI_API_KEY")?,
            temperature: config.temperature,
            max_retries: providers.max_retries,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let mut body = json!({ "model": self.model, "messages": chat_messages(messages) });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        let json = send_json("OpenAI", self.max_retries, || {
            self.client
                .post(format!("{}/v1/chat/completions", self.url))
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))?;
        non_empty(text, "OpenAI")
    }
}

// ============ Ollama ============

pub struct OllamaCompleter {
    client: reqwest::Client,
    model: String,
    url: String,
    temperature: Option<f32>,
    max_retries: u32,
}

impl OllamaCompleter {
    pub fn new(config: &CompletionConfig, providers: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(providers)?,
            model: config.model.clone(),
            url: base_url(config.url.as_deref(), "http://localhost:11434"),
            temperature: config.temperature,
            max_retries: providers.max_retries,
        })
    }
}

#[async_trait]
impl CompletionProvider for OllamaCompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "messages": chat_messages(messages),
            "stream": false,
        });
        if let Some(t) = self.temperature {
            body["options"] = json!({ "temperature": t });
        }
        let json = send_json("Ollama", self.max_retries, || {
            self.client.post(format!("{}/api/chat", self.url)).json(&body)
        })
        .await?;
        let text = json
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))?;
        non_empty(text, "Ollama")
    }
}

// ============ Gemini ============

pub struct GeminiCompleter {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    temperature: Option<f32>,
    max_retries: u32,
}

impl GeminiCompleter {
    pub fn new(config: &CompletionConfig, providers: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(providers)?,
            model: gemini_model_path(&config.model),
            url: base_url(
                config.url.as_deref(),
                "https://generativelanguage.googleapis.com",
            ),
            api_key: api_key(config.api_key_env.as_deref(), "GEMINI_API_KEY")?,
            temperature: config.temperature,
            max_retries: providers.max_retries,
        })
    }
}

/// Gemini takes system text separately and calls the assistant role `model`.
fn gemini_body(messages: &[PromptMessage], temperature: Option<f32>) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let contents: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = if m.role == Role::Assistant { "model" } else { "user" };
            json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect();

    let mut body = json!({ "contents": contents });
    if !system.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
    }
    if let Some(t) = temperature {
        body["generationConfig"] = json!({ "temperature": t });
    }
    body
}

fn parse_gemini_text(json: &Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow!("Invalid Gemini response: missing candidates[0].content.parts"))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    non_empty(&text, "Gemini")
}

#[async_trait]
impl CompletionProvider for GeminiCompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let body = gemini_body(messages, self.temperature);
        let json = send_json("Gemini", self.max_retries, || {
            self.client
                .post(format!("{}/v1beta/{}:generateContent", self.url, self.model))
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;
        parse_gemini_text(&json)
    }
}

/// Build the configured completion backend.
pub fn create_completion_provider(
    config: &CompletionConfig,
    providers: &ProvidersConfig,
) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAICompleter::new(config, providers)?)),
        "ollama" => Ok(Arc::new(OllamaCompleter::new(config, providers)?)),
        "gemini" => Ok(Arc::new(GeminiCompleter::new(config, providers)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_body_splits_system() {
        let body = gemini_body(
            &[
                PromptMessage::system("be brief"),
                PromptMessage::user("hi"),
                PromptMessage::assistant("hello"),
                PromptMessage::user("orders?"),
            ],
            Some(0.2),
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "orders?");
        assert!(body["generationConfig"]["temperature"].is_number());
    }

    #[test]
    fn test_parse_gemini_text_joins_parts() {
        let json = json!({"candidates": [{"content": {"parts": [{"text": "Hello "}, {"text": "there"}]}}]});
        assert_eq!(parse_gemini_text(&json).unwrap(), "Hello there");
        assert!(parse_gemini_text(&json!({"candidates": []})).is_err());
        let blank = json!({"candidates": [{"content": {"parts": [{"text": "  "}]}}]});
        assert!(parse_gemini_text(&blank).is_err());
    }

    #[test]
    fn test_chat_messages_shape() {
        let msgs = chat_messages(&[PromptMessage::system("s"), PromptMessage::user("u")]);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["content"], "u");
    }
}
