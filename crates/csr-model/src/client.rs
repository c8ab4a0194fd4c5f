//! OpenAI-compatible chat completions client (Ollama, vLLM, hosted APIs).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use csr_core::Usage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{Backend, FailureKind, RawResult};

/// Connection settings for [`ModelClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL including the API version, e.g. `http://localhost:11435/v1`.
    pub base_url: String,
    pub model_id: String,
    /// Sent as a bearer token when non-empty.
    pub api_key: String,
    pub temperature: f32,
    /// Ask the server for a JSON object reply.
    pub json_mode: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11435/v1".to_string(),
            model_id: "llama3".to_string(),
            api_key: "ollama".to_string(),
            temperature: 0.1,
            json_mode: true,
        }
    }
}

/// Backend client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ModelClient {
    http: reqwest::Client,
    base_url: String,
    config: ClientConfig,
    healthy: AtomicBool,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

impl ModelClient {
    /// Create a client. `base_url` may carry a trailing slash.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
            healthy: AtomicBool::new(true),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lightweight liveness check against `GET {base_url}/models`.
    ///
    /// Updates the health flag reported by [`Backend::is_healthy`].
    pub async fn probe(&self, timeout: Duration) -> bool {
        let url = format!("{}/models", self.base_url);
        let mut req = self.http.get(&url).timeout(timeout);
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(&self.config.api_key);
        }
        let ok = match req.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url = %url, error = %e, "backend probe failed");
                false
            }
        };
        self.healthy.store(ok, Ordering::Relaxed);
        ok
    }

    async fn call(&self, instruction: &str, task: &str) -> RawResult {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.config.model_id,
            messages: [
                ChatMessage {
                    role: "system",
                    content: instruction,
                },
                ChatMessage {
                    role: "user",
                    content: task,
                },
            ],
            temperature: self.config.temperature,
            response_format: self
                .config
                .json_mode
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        let mut req = self.http.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(&self.config.api_key);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return transport_failure(&e),
        };

        let status = resp.status();
        let raw = match resp.text().await {
            Ok(raw) => raw,
            Err(e) => return transport_failure(&e),
        };
        if !status.is_success() {
            let snippet: String = raw.chars().take(200).collect();
            return RawResult::failure(
                FailureKind::BadStatus,
                format!("server returned {}: {snippet}", status.as_u16()),
            );
        }

        let parsed: ChatResponse = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                return RawResult::failure(
                    FailureKind::Malformed,
                    format!("undecodable completion envelope: {e}"),
                );
            }
        };

        let usage = parsed
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens.unwrap_or(0),
                output_tokens: u.completion_tokens.unwrap_or(0),
            })
            .unwrap_or_default();
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        RawResult::Success { text, usage }
    }
}

fn transport_failure(e: &reqwest::Error) -> RawResult {
    let kind = if e.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Unreachable
    };
    RawResult::failure(kind, e.to_string())
}

#[async_trait]
impl Backend for ModelClient {
    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    async fn generate(&self, instruction: &str, task: &str, timeout: Duration) -> RawResult {
        debug!(model = %self.config.model_id, task_chars = task.len(), "calling backend");
        let result = match tokio::time::timeout(timeout, self.call(instruction, task)).await {
            Ok(result) => result,
            Err(_) => RawResult::failure(
                FailureKind::Timeout,
                format!("no reply within {}ms", timeout.as_millis()),
            ),
        };

        match &result {
            RawResult::Success { usage, .. } => {
                info!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "backend call complete"
                );
            }
            RawResult::Failure(f) => {
                warn!(kind = f.kind.as_str(), error = %f.message, "backend call failed");
            }
        }
        self.healthy.store(result.is_success(), Ordering::Relaxed);
        result
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}
