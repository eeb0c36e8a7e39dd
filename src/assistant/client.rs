//! Chat model client
//!
//! Two wire formats:
//! - Ollama native: POST {base_url}/api/chat, reply at `message.content`
//! - OpenAI Chat Completions: POST {base_url}/chat/completions, reply at
//!   `choices[0].message.content`, bearer token from the provider's `env_key`
//!
//! Calls are one blocking request/response each (no streaming). Retryable
//! failures (timeouts, connection errors, 5xx) back off exponentially.

use crate::config::{ProviderSettings, WireApi};
use crate::protocol::Message;
use crate::{RecallError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_RETRY_ATTEMPTS: u32 = 4;
const RETRY_BASE_DELAY_MS: u64 = 200;
const MAX_ERROR_DETAIL_CHARS: usize = 500;

/// Anything that can answer a chat request.
///
/// Used for both the conversation call and the extraction call.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, model: &str, messages: &[Message]) -> Result<String>;
}

// ─── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ─── Client ─────────────────────────────────────────────────────────

/// HTTP chat client for a single provider
pub struct ChatClient {
    client: Client,
    provider: ProviderSettings,
}

impl ChatClient {
    pub fn new(provider: ProviderSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .user_agent(concat!("recall/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RecallError::Config(format!("http client: {e}")))?;

        info!(
            "Chat client: provider={}, base_url={}, wire={:?}",
            provider.id, provider.base_url, provider.wire_api
        );

        Ok(Self { client, provider })
    }

    pub fn provider(&self) -> &ProviderSettings {
        &self.provider
    }

    async fn send_request(&self, model: &str, messages: &[Message]) -> Result<String> {
        match self.provider.wire_api {
            WireApi::Ollama => self.send_ollama_request(model, messages).await,
            WireApi::Chat => self.send_chat_completions_request(model, messages).await,
        }
    }

    async fn send_ollama_request(&self, model: &str, messages: &[Message]) -> Result<String> {
        let url = format!("{}/api/chat", self.provider.base_url);
        let request = OllamaChatRequest {
            model,
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;
        let response = Self::check_response_status(response).await?;

        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| RecallError::Model(format!("invalid Ollama response: {e}")))?;
        Ok(body.message.content)
    }

    async fn send_chat_completions_request(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.provider.base_url);
        let request = ChatRequest {
            model,
            messages,
            stream: false,
        };

        let mut req_builder = self.client.post(&url);
        if let Some(token) = self.bearer_token()? {
            req_builder = req_builder.bearer_auth(token);
        }

        let response = req_builder
            .json(&request)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;
        let response = Self::check_response_status(response).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| RecallError::Model(format!("invalid chat response: {e}")))?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    /// Read the API key named by `env_key`, if the provider has one
    fn bearer_token(&self) -> Result<Option<String>> {
        let Some(env_key) = &self.provider.env_key else {
            return Ok(None);
        };
        match std::env::var(env_key) {
            Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
            _ => Err(RecallError::Config(format!(
                "provider '{}' needs ${} to be set",
                self.provider.id, env_key
            ))),
        }
    }

    async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = truncate_error_detail(&extract_error_detail(&body), MAX_ERROR_DETAIL_CHARS);
        let prefix = if status.is_server_error() {
            "retryable API error"
        } else {
            "API error"
        };
        if detail.is_empty() {
            Err(RecallError::Model(format!("{prefix} {status}")))
        } else {
            Err(RecallError::Model(format!("{prefix} {status}: {detail}")))
        }
    }

    fn map_reqwest_error(e: reqwest::Error) -> RecallError {
        if e.is_timeout() {
            RecallError::Model(format!("timeout: {e}"))
        } else if e.is_connect() {
            RecallError::Model(format!("connection: {e}"))
        } else {
            RecallError::Model(e.to_string())
        }
    }
}

#[async_trait]
impl ChatModel for ChatClient {
    async fn chat(&self, model: &str, messages: &[Message]) -> Result<String> {
        debug!("Chat request: model={}, messages={}", model, messages.len());

        let mut last_err = None;
        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if attempt > 0 {
                let delay = retry_backoff(attempt);
                warn!(
                    "Model request failed (attempt {}/{}), retrying in {:?}...",
                    attempt, MAX_RETRY_ATTEMPTS, delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.send_request(model, messages).await {
                Ok(content) => return Ok(strip_think_tags(&content)),
                Err(e) => {
                    if is_retryable_error(&e) && attempt + 1 < MAX_RETRY_ATTEMPTS {
                        last_err = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| RecallError::Model("all retry attempts exhausted".to_string())))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Exponential backoff with a small deterministic jitter
fn retry_backoff(attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base_ms = RETRY_BASE_DELAY_MS.saturating_mul(exp);
    let jitter = 1.0 + ((attempt as f64 * 0.37).sin() * 0.1);
    Duration::from_millis((base_ms as f64 * jitter) as u64)
}

fn is_retryable_error(e: &RecallError) -> bool {
    let RecallError::Model(msg) = e else {
        return false;
    };
    msg.starts_with("timeout") || msg.starts_with("connection") || msg.starts_with("retryable")
}

fn think_regex() -> &'static Regex {
    static THINK: OnceLock<Regex> = OnceLock::new();
    THINK.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("think pattern is valid"))
}

/// Drop `<think>…</think>` reasoning that local reasoning models emit
pub fn strip_think_tags(content: &str) -> String {
    let stripped = think_regex().replace_all(content, "");
    let stripped = stripped.trim();
    // An unterminated block means the reply never got past its reasoning
    if stripped.starts_with("<think>") {
        return String::new();
    }
    stripped.to_string()
}

fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        // Ollama: {"error": "model 'x' not found"}
        if let Some(msg) = value.get("error").and_then(|e| e.as_str()) {
            return msg.to_string();
        }
        // OpenAI: {"error": {"message": "..."}}
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }

    trimmed.to_string()
}

fn truncate_error_detail(detail: &str, max_chars: usize) -> String {
    if detail.chars().count() <= max_chars {
        return detail.to_string();
    }

    let mut truncated = detail.chars().take(max_chars).collect::<String>();
    truncated.push_str("... [truncated]");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_think_tags() {
        assert_eq!(
            strip_think_tags("<think>user wants a name</think>\nHi Sam!"),
            "Hi Sam!"
        );
        assert_eq!(strip_think_tags("plain reply "), "plain reply");
        assert_eq!(strip_think_tags("<think>still going"), "");
    }

    #[test]
    fn test_extract_error_detail() {
        assert_eq!(
            extract_error_detail(r#"{"error":"model 'llama9' not found"}"#),
            "model 'llama9' not found"
        );
        assert_eq!(
            extract_error_detail(r#"{"error":{"message":"bad key","type":"auth"}}"#),
            "bad key"
        );
        assert_eq!(extract_error_detail("  Bad Gateway "), "Bad Gateway");
    }

    #[test]
    fn test_truncate_error_detail() {
        let long = "x".repeat(600);
        let truncated = truncate_error_detail(&long, 500);
        assert!(truncated.ends_with("... [truncated]"));
        assert_eq!(truncated.chars().count(), 500 + "... [truncated]".len());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(is_retryable_error(&RecallError::Model("timeout: x".into())));
        assert!(is_retryable_error(&RecallError::Model(
            "retryable API error 503".into()
        )));
        assert!(!is_retryable_error(&RecallError::Model("API error 404".into())));
        assert!(!is_retryable_error(&RecallError::Config("x".into())));
    }

    #[test]
    fn test_retry_backoff_grows() {
        assert!(retry_backoff(2) > retry_backoff(1));
        assert!(retry_backoff(3) > retry_backoff(2));
    }

    #[test]
    fn test_ollama_request_shape() {
        let messages = vec![Message::system("s"), Message::user("hi")];
        let request = OllamaChatRequest {
            model: "llama3.1:8b",
            messages: &messages,
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][1]["role"], "user");
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let provider = ProviderSettings {
            id: "custom".to_string(),
            base_url: "http://localhost:9".to_string(),
            wire_api: WireApi::Chat,
            env_key: Some("RECALL_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
        };
        let client = ChatClient::new(provider, Duration::from_secs(1)).unwrap();
        assert!(matches!(client.bearer_token(), Err(RecallError::Config(_))));
    }
}
