//! Ollama chat client.
//!
//! Speaks the `/api/chat` protocol with `stream: false` and a JSON schema in
//! `format`, so the reply content is the annotation object itself.

use crate::client::{Classifier, annotation_schema, parse_annotation};
use crate::models::{
    Annotation, AnnotatorError, ClassifyError, PromptContext, Result, SamplingParams,
    ServiceConfig,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat request payload.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
    format: serde_json::Value,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    seed: i64,
    temperature: f64,
}

/// Chat response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Client for an Ollama server.
///
/// Holds only connection settings and read-only usage counters; sampling
/// options are taken per call.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
    // Usage tracking
    total_prompt_tokens: AtomicU64,
    total_completion_tokens: AtomicU64,
    total_requests: AtomicU64,
}

impl OllamaClient {
    /// Create a new client.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AnnotatorError::Network)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
            total_prompt_tokens: AtomicU64::new(0),
            total_completion_tokens: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
        })
    }

    /// Create a client from the service section of the config.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Self::new(config.base_url(), config.model.clone(), config.timeout())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one chat request and return the reply content.
    async fn chat(
        &self,
        messages: Vec<Message>,
        params: SamplingParams,
    ) -> std::result::Result<String, ClassifyError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            format: annotation_schema(),
            options: ChatOptions {
                seed: params.seed,
                temperature: params.temperature,
            },
        };

        let url = format!("{}/api/chat", self.base_url);
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifyError::Transient(format!("request timed out after {:?}", self.timeout))
                } else {
                    ClassifyError::Transient(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Transient(format!(
                "service returned {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                ClassifyError::InvalidResponse(format!("malformed chat response: {e}"))
            } else {
                ClassifyError::Transient(format!("reading response failed: {e}"))
            }
        })?;

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_prompt_tokens
            .fetch_add(body.prompt_eval_count.unwrap_or(0), Ordering::Relaxed);
        self.total_completion_tokens
            .fetch_add(body.eval_count.unwrap_or(0), Ordering::Relaxed);

        debug!(
            model = %self.model,
            seed = params.seed,
            temperature = params.temperature,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chat completed"
        );

        Ok(body.message.content)
    }

    /// Get total tokens tracked as (prompt, completion).
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_prompt_tokens.load(Ordering::Relaxed),
            self.total_completion_tokens.load(Ordering::Relaxed),
        )
    }

    /// Get the number of successful requests.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Health check: list models and confirm the configured one is loaded.
    /// Whether a listed model name is the configured model. Untagged names
    /// are listed with the implicit `latest` tag.
    fn serves(&self, listed: &str) -> bool {
        listed == self.model || listed.strip_suffix(":latest") == Some(self.model.as_str())
    }

    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let url = format!("{}/api/tags", self.base_url);

        #[derive(Deserialize)]
        struct TagsResponse {
            #[serde(default)]
            models: Vec<ModelInfo>,
        }

        #[derive(Deserialize)]
        struct ModelInfo {
            name: String,
        }

        let response = match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return HealthCheckResult {
                    endpoint: self.base_url.clone(),
                    status: HealthStatus::Unreachable,
                    latency_ms: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        if !response.status().is_success() {
            return HealthCheckResult {
                endpoint: self.base_url.clone(),
                status: HealthStatus::Unhealthy,
                latency_ms: Some(latency_ms),
                error: Some(format!("HTTP {}", response.status().as_u16())),
            };
        }

        let error = match response.json::<TagsResponse>().await {
            Ok(tags) if tags.models.iter().any(|m| self.serves(&m.name)) => None,
            Ok(_) => Some(format!("model '{}' is not available", self.model)),
            Err(e) => Some(format!("unreadable model list: {e}")),
        };

        HealthCheckResult {
            endpoint: self.base_url.clone(),
            status: if error.is_none() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            latency_ms: Some(latency_ms),
            error,
        }
    }
}

#[async_trait]
impl Classifier for OllamaClient {
    async fn classify(
        &self,
        prompt: PromptContext<'_>,
        params: SamplingParams,
    ) -> std::result::Result<Annotation, ClassifyError> {
        let messages = vec![
            Message::system(prompt.system_prompt),
            Message::user(prompt.user_message()),
        ];
        let content = self.chat(messages, params).await?;
        parse_annotation(&content)
    }
}

/// Health check result.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Service base URL
    pub endpoint: String,
    /// Health status
    pub status: HealthStatus,
    /// Latency in milliseconds (if reachable)
    pub latency_ms: Option<u64>,
    /// Error message (if unhealthy or unreachable)
    pub error: Option<String>,
}

/// Health status of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Responding and serving the configured model
    Healthy,
    /// Responding, but with errors or without the model
    Unhealthy,
    /// Not reachable
    Unreachable,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}
