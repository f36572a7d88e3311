use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use slotform_core::config::{LlmConfig, LlmProvider};
use tracing::{debug, warn};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const SYSTEM_PROMPT: &str =
    "You extract order form values from customer messages. Answer with one JSON object and nothing else.";

pub trait LlmClient: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// How often a failed completion is retried and how long to wait in between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 0, base_delay_ms: 200, max_delay_ms: 2_000 }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1_u64 << attempt.min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms))
    }
}

/// Rate limiting and server-side failures are worth another attempt; other statuses are not.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

enum AttemptError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

/// OpenAI-compatible `/chat/completions` client. Ollama exposes the same surface.
pub struct ChatCompletionsClient {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    retry: RetryPolicy,
}

impl ChatCompletionsClient {
    /// `Ok(None)` when the provider is disabled.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>> {
        let default_base = match config.provider {
            LlmProvider::Disabled => return Ok(None),
            LlmProvider::OpenAi => OPENAI_BASE_URL,
            LlmProvider::Ollama => OLLAMA_BASE_URL,
        };
        let base_url = config.base_url.as_deref().unwrap_or(default_base);
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build chat completions http client")?;

        Ok(Some(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            retry: RetryPolicy { max_retries: config.max_retries, ..RetryPolicy::default() },
        }))
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsClient {
    fn attempt(&self, body: &ChatRequest<'_>) -> std::result::Result<String, AttemptError> {
        let mut request = self.http.post(&self.endpoint).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }
        let response = request.send().map_err(|error| {
            let timed_out = error.is_timeout();
            let error = anyhow::Error::new(error).context("chat completions request failed");
            if timed_out {
                AttemptError::Fatal(error)
            } else {
                AttemptError::Retryable(error)
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let error = anyhow!("chat completions returned HTTP {status}");
            return Err(if is_retryable_status(status) {
                AttemptError::Retryable(error)
            } else {
                AttemptError::Fatal(error)
            });
        }

        let payload: ChatResponse = response
            .json()
            .context("chat completions response was not valid JSON")
            .map_err(AttemptError::Fatal)?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AttemptError::Fatal(anyhow!("chat completions returned no content")))
    }
}

impl LlmClient for ChatCompletionsClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: 0.0,
        };

        let mut attempt = 0;
        loop {
            match self.attempt(&body) {
                Ok(content) => {
                    debug!(
                        event_name = "agent.llm.completed",
                        model = %self.model,
                        attempts = attempt + 1,
                        chars = content.chars().count(),
                        "chat completion received"
                    );
                    return Ok(content);
                }
                Err(AttemptError::Retryable(error)) if attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        event_name = "agent.llm.retrying",
                        model = %self.model,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %format!("{error:#}"),
                        "chat completion failed; retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(AttemptError::Retryable(error)) | Err(AttemptError::Fatal(error)) => {
                    return Err(error)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;
    use slotform_core::config::{AppConfig, LlmProvider};

    use super::{is_retryable_status, ChatCompletionsClient, RetryPolicy};

    #[test]
    fn disabled_provider_builds_no_client() {
        let config = AppConfig::default();
        assert_eq!(config.llm.provider, LlmProvider::Disabled);
        assert!(ChatCompletionsClient::from_config(&config.llm).expect("build").is_none());
    }

    #[test]
    fn endpoint_follows_provider_and_base_url() {
        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::Ollama;
        let client = ChatCompletionsClient::from_config(&config.llm).expect("build").expect("enabled");
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");

        config.llm.provider = LlmProvider::OpenAi;
        config.llm.base_url = Some("https://gateway.internal/v1/".to_string());
        let client = ChatCompletionsClient::from_config(&config.llm).expect("build").expect("enabled");
        assert_eq!(client.endpoint(), "https://gateway.internal/v1/chat/completions");
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[test]
    fn retry_count_comes_from_config() {
        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::OpenAi;
        config.llm.max_retries = 3;

        let client = ChatCompletionsClient::from_config(&config.llm).expect("build").expect("enabled");

        assert_eq!(client.retry_policy().max_retries, 3);
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let policy = RetryPolicy { max_retries: 5, base_delay_ms: 100, max_delay_ms: 500 };

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn only_throttling_and_server_errors_are_retried() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }
}
