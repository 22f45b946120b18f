//! Text-completion providers
//!
//! The Keeper talks to a completion backend through [`CompletionProvider`].
//! Whatever comes back is untrusted free text: it is always classified and
//! never parsed as structured data.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Backend unreachable or overloaded; try again later
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    /// Backend answered with an error the caller cannot fix by waiting
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("provider returned an empty completion")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of prompt context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Backend identifier, e.g. the model name
    fn id(&self) -> &str;

    /// Complete `prompt` given prior `context` messages
    async fn complete(&self, prompt: &str, context: &[Message]) -> Result<String, ProviderError>;
}

// =============================================================================
// OpenAI-compatible chat completions (OpenAI, Ollama, vLLM, ...)
// =============================================================================

pub struct OpenAiCompatProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiCompatProvider {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::RequestFailed(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<&'a Message>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, context: &[Message]) -> Result<String, ProviderError> {
        let prompt = Message::user(prompt);
        let mut messages: Vec<&Message> = context.iter().collect();
        messages.push(&prompt);

        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut request = self.client.post(self.chat_completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    ProviderError::Unavailable(format!("HTTP {status}"))
                } else {
                    ProviderError::RequestFailed(format!("HTTP {status}: {body}"))
                },
            );
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("bad response body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(content)
    }
}

// =============================================================================
// Scripted provider (offline mode and tests)
// =============================================================================

const DEFAULT_SCRIPT: &[&str] = &[
    "What if attention is less a spotlight than a gardener, because what we tend keeps growing while the rest quietly recedes?",
    "Perhaps understanding arrives sideways. We circle a question for weeks, and then an unrelated conversation rearranges everything.",
    "Memory feels stable; however, each recollection rebuilds the scene, which means remembering is closer to composing than retrieving.",
    "Kindness might be a form of precision: noticing exactly what someone needs, rather than offering what we happen to have.",
    "Why do constraints so often produce creativity? Perhaps limits collapse the search space until unexpected paths become visible.",
    "Languages carve experience differently, therefore translation always loses something, although it sometimes discovers something new as well.",
];

/// Deterministic provider cycling through a fixed script
pub struct ScriptedProvider {
    responses: Vec<String>,
    available: AtomicBool,
    calls: AtomicU32,
    latency: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::with_responses(DEFAULT_SCRIPT.iter().map(|s| s.to_string()).collect())
    }

    /// Cycle through `responses` in order
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses,
            available: AtomicBool::new(true),
            calls: AtomicU32::new(0),
            latency: None,
        }
    }

    /// Sleep this long before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str, _context: &[Message]) -> Result<String, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("scripted provider switched off".into()));
        }
        if self.responses.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(self.responses[call as usize % self.responses.len()].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_cycles() {
        let provider = ScriptedProvider::with_responses(vec!["a b".into(), "c d".into()]);
        assert_eq!(provider.complete("x", &[]).await.unwrap(), "a b");
        assert_eq!(provider.complete("x", &[]).await.unwrap(), "c d");
        assert_eq!(provider.complete("x", &[]).await.unwrap(), "a b");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_unavailable() {
        let provider = ScriptedProvider::new();
        provider.set_available(false);
        let err = provider.complete("x", &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn test_chat_request_shape() {
        let system = Message::system("You are Athena.");
        let user = Message::user("hello");
        let body = ChatRequest {
            model: "m",
            messages: vec![&system, &user],
            temperature: 0.5,
            max_tokens: 10,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
    }
}
