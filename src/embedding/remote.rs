//! HTTP-backed embedding providers.
//!
//! Two wire formats are supported: the OpenAI `/v1/embeddings` shape and
//! the Ollama `/api/embed` shape. Both return vectors that are checked
//! against the configured dimension before they leave this module — a
//! provider that returns the wrong width is treated as failed so the chain
//! can advance.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::EmbeddingProvider;
use crate::config::ProviderConfig;
use crate::error::{EngineError, Result};

/// OpenAI-compatible embeddings endpoint.
pub struct OpenAiProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig, dimension: usize, timeout_secs: u64) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EngineError::validation("openai provider requires a model"))?;
        let key_env = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
        let api_key = std::env::var(key_env).map_err(|_| {
            EngineError::validation(format!("environment variable {key_env} not set"))
        })?;
        let base = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EngineError::Provider {
                provider: "openai".into(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: format!("{}/v1/embeddings", base.trim_end_matches('/')),
            model,
            api_key,
            dimension,
        })
    }

    fn provider_error(&self, message: impl std::fmt::Display) -> EngineError {
        EngineError::Provider {
            provider: self.name().to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| self.provider_error("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.provider_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(self.provider_error(format!("HTTP {status}: {detail}")));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| self.provider_error(e))?;

        if parsed.data.len() != texts.len() {
            return Err(self.provider_error(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for v in &vectors {
            if v.len() != self.dimension {
                return Err(self.provider_error(format!(
                    "returned dimension {} instead of {}",
                    v.len(),
                    self.dimension
                )));
            }
        }
        Ok(vectors)
    }
}

/// Ollama embeddings endpoint (`POST /api/embed`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig, dimension: usize, timeout_secs: u64) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EngineError::validation("ollama provider requires a model"))?;
        let base = config
            .base_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EngineError::Provider {
                provider: "ollama".into(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
            model,
            dimension,
        })
    }

    fn provider_error(&self, message: impl std::fmt::Display) -> EngineError {
        EngineError::Provider {
            provider: self.name().to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| self.provider_error("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.provider_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(self.provider_error(format!("HTTP {status}: {detail}")));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| self.provider_error(e))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(self.provider_error(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        for v in &parsed.embeddings {
            if v.len() != self.dimension {
                return Err(self.provider_error(format!(
                    "returned dimension {} instead of {}",
                    v.len(),
                    self.dimension
                )));
            }
        }
        Ok(parsed.embeddings)
    }
}
