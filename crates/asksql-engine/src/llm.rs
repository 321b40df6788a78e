//! Text-generation client: sends a prompt, returns the candidate SQL text

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("generation request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("generation service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed generation response: {0}")]
    Malformed(String),

    #[error("generation service returned an empty response")]
    Empty,
}

impl GenerationError {
    /// Network failures and server-side errors may succeed on a second try
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Transport(_) => true,
            GenerationError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Turns a prompt into candidate SQL
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Returns the trimmed generated text. Empty output is an error.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Generation service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Full URL of the non-streaming generate endpoint
    pub endpoint: String,

    pub model: String,

    /// SQL dialect named in the prompt rules
    pub dialect: String,

    pub timeout_secs: u64,

    /// Extra attempts after a transient failure (0 = single attempt)
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry
    pub retry_backoff_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "llama3".to_string(),
            dialect: crate::prompt::DEFAULT_DIALECT.to_string(),
            timeout_secs: 60,
            max_retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

/// Client for an Ollama-style `/api/generate` endpoint
pub struct OllamaGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl OllamaGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(GenerationError::Client)?;
        Ok(Self { client, config })
    }

    async fn request(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(GenerationError::Transport)?;

        let status = response.status();
        let text = response.text().await.map_err(GenerationError::Transport)?;
        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| GenerationError::Malformed(e.to_string()))?;
        let generated = parsed.response.unwrap_or_default().trim().to_string();
        if generated.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(generated)
    }
}

#[async_trait]
impl SqlGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut attempt = 0;
        loop {
            match self.request(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_backoff_ms.saturating_mul(1 << attempt.min(16));
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay,
                        error = %e,
                        "Generation attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(model = %self.config.model, error = %e, "Error calling generation service");
                    return Err(e);
                }
            }
        }
    }
}
