//! LLM provider client.
//!
//! A single chat-completion call per request. The caller passes a shared
//! [`CancellationToken`]; when it trips, the in-flight HTTP request is
//! dropped (aborting the connection) and the call returns
//! [`Error::Cancelled`]. This is the only place in the system where
//! cancellation reaches network I/O.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Default completion timeout; research agents can run long.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(300);

/// One completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// System prompt.
    pub system: String,
    /// User prompt.
    pub prompt: String,
}

/// A completed response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Response text (markdown).
    pub text: String,
    /// Source URLs cited by the model, when provided.
    pub citations: Vec<String>,
}

/// LLM provider interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Runs one completion, aborting promptly if `cancel` trips.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the token trips before the
    /// response arrives; transport/API errors otherwise.
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion>;
}

// ============================================================================
// HTTP client (chat-completions shape)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// HTTP LLM client.
pub struct HttpLlmClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLlmClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpLlmClient {
    /// Default production API base.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    /// Creates a new client against the default API base.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(Self::DEFAULT_BASE_URL, api_key)
    }

    /// Creates a new client against a custom API base (tests, proxies).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_COMPLETION_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    async fn send(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = ChatRequest {
            model: &request.model,
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
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), message));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::decode(format!("completion response: {e}")))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::decode("completion response had no choices"))?;

        Ok(Completion {
            text,
            citations: Vec::new(),
        })
    }
}

#[async_trait]
impl LlmProvider for HttpLlmClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        // Dropping the request future tears down the connection, so an
        // in-flight round-trip aborts as soon as the token trips.
        tokio::select! {
            result = self.send(request) => result,
            () = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}
