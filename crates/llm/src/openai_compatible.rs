//! OpenAI-compatible chat completions backend.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    CollaboratorError, Completion, CompletionRequest, ConfigurationError, LlmProvider, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Base URL used when none is configured (a local Ollama server).
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Model preferred when none is configured.
pub const DEFAULT_MODEL: &str = "gemma3:4b";

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Connection settings for an OpenAI-compatible server.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Server URL; normalised with [`normalize_base_url`].
    pub base_url: String,
    /// Model name sent with every request.
    pub model: String,
    /// Bearer token. Local servers usually accept any value or none.
    pub api_key: Option<String>,
    /// Transport timeout for one request.
    pub request_timeout: Duration,
}

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl OpenAiCompatibleProvider {
    /// Builds the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if the model is empty or the HTTP client
    /// cannot be constructed.
    pub fn new(config: LlmConfig) -> Result<Self, ConfigurationError> {
        if config.model.trim().is_empty() {
            return Err(ConfigurationError::new("LLM model must not be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigurationError::new(format!("Failed to build HTTP client: {e}")))?;
        let base_url = normalize_base_url(&config.base_url);
        let endpoint = format!("{base_url}/chat/completions");
        Ok(Self {
            client,
            base_url,
            endpoint,
            model: config.model.trim().to_string(),
            api_key: config.api_key.filter(|k| !k.trim().is_empty()),
            request_timeout: config.request_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Replaces the model, e.g. after [`choose_model`] picked a fallback.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Lists the model ids the server offers (`GET {base}/models`).
    pub async fn list_models(&self) -> Result<Vec<String>, CollaboratorError> {
        let url = format!("{}/models", self.base_url);
        let mut http = self.client.get(&url);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), None, &text));
        }
        let list: ModelList = response.json().await.map_err(|e| CollaboratorError::Malformed {
            message: format!("Failed to parse model list from {url}: {e}"),
        })?;
        let models: Vec<String> = list
            .data
            .into_iter()
            .map(|m| m.id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        debug!(url = %url, models = models.len(), "Model list received");
        Ok(models)
    }

    fn transport_error(&self, err: reqwest::Error) -> CollaboratorError {
        if err.is_timeout() {
            CollaboratorError::Timeout {
                operation: "llm".to_string(),
                after: self.request_timeout,
            }
        } else {
            CollaboratorError::Transport {
                message: format!("Request to {} failed: {err}", self.endpoint),
            }
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CollaboratorError> {
        debug!(
            model = %self.model,
            temperature = request.temperature,
            max_tokens = ?request.max_tokens,
            prompt_chars = request.prompt.len(),
            "Invoking chat completion"
        );

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let mut http = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), retry_after, &text));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                CollaboratorError::Malformed {
                    message: format!("Failed to parse chat completion response: {e}"),
                }
            }
        })?;
        let completion = extract_completion(parsed, &self.model)?;

        debug!(
            model = %completion.model,
            content_chars = completion.content.len(),
            "Chat completion received"
        );
        Ok(completion)
    }
}

/// Result of matching the preferred model against the installed ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelChoice {
    /// The preferred model is installed.
    Preferred(String),
    /// The preferred model is missing; another installed model was picked.
    Fallback(String),
}

impl ModelChoice {
    pub fn name(&self) -> &str {
        match self {
            ModelChoice::Preferred(name) | ModelChoice::Fallback(name) => name,
        }
    }
}

/// Picks `preferred` when installed, else the first installed model.
///
/// # Errors
///
/// Returns [`ConfigurationError`] when no model is installed.
pub fn choose_model(preferred: &str, installed: &[String]) -> Result<ModelChoice, ConfigurationError> {
    if installed.iter().any(|m| m == preferred) {
        return Ok(ModelChoice::Preferred(preferred.to_string()));
    }
    installed
        .first()
        .map(|m| ModelChoice::Fallback(m.clone()))
        .ok_or_else(|| {
            ConfigurationError::new(format!(
                "No models are installed on the LLM server (install one, e.g. '{preferred}')"
            ))
        })
}

/// Normalises a server URL: adds `http://` when no scheme is given, drops
/// trailing slashes, and appends `/v1` when the URL has no path.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let after_scheme = with_scheme
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    if after_scheme.contains('/') {
        with_scheme
    } else {
        format!("{with_scheme}/v1")
    }
}

/// Maps a non-success status to a collaborator error.
///
/// 408, 429 and 5xx are retryable (honouring `Retry-After`); every other
/// status is not.
fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> CollaboratorError {
    let retry = match status {
        408 | 429 | 500..=599 => RetryPolicy::Retryable { after: retry_after },
        _ => RetryPolicy::NonRetryable,
    };
    let mut message: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    if message.is_empty() {
        message = "no response body".to_string();
    }
    CollaboratorError::Provider {
        status,
        message,
        retry,
    }
}

/// Parses a delta-seconds `Retry-After` value. HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn extract_completion(response: ChatResponse, requested_model: &str) -> Result<Completion, CollaboratorError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    if content.is_empty() {
        return Err(CollaboratorError::EmptyResponse);
    }
    Ok(Completion {
        content,
        model: response.model.unwrap_or_else(|| requested_model.to_string()),
    })
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
