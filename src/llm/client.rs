use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use super::types::{ApiError, ChatMessage, ChatRequest, ChatResponse};
use crate::config::ApiKey;
use crate::retry::{RetryPolicy, with_retry};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API rate limit exceeded. Please retry later.")]
    RateLimited,

    #[error("LLM API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("LLM returned no content")]
    EmptyResponse,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Chat-completion capability used by the sampler, the responder and the
/// organic backend's query rewriter.
/// Implemented by `OpenAiClient` for production; mock implementations used in tests.
pub trait ChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: Option<f32>,
    ) -> Result<String, LlmError>;
}

/// Client for any server speaking the OpenAI `/chat/completions` protocol.
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    http: Client,
    api_key: Option<ApiKey>,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(http: Client, base_url: &str, api_key: Option<ApiKey>) -> Self {
        if api_key.is_none() {
            warn!("no LLM API key configured; requests are sent unauthenticated");
        }
        Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::exponential(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: Option<f32>,
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model,
            messages,
            temperature,
        };

        let mut builder = self
            .http
            .post(&url)
            .header("User-Agent", crate::USER_AGENT)
            .json(&request)
            .timeout(REQUEST_TIMEOUT);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose());
        }
        let response = builder.send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(model, "LLM API rate limited");
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if let Ok(body) = serde_json::from_str::<ChatResponse>(&text)
                && let Some(err) = &body.error
            {
                let classified = classify_api_error(status.as_u16(), err);
                warn!(error = %classified, "LLM API error");
                return Err(classified);
            }
            let end = text.floor_char_boundary(200);
            warn!(status = %status, "LLM API error (no structured body)");
            return Err(LlmError::Api {
                code: status.as_u16(),
                message: format!("HTTP {status}: {}", &text[..end]),
            });
        }

        let body: ChatResponse = response.json().await?;
        if let Some(err) = &body.error {
            let classified = classify_api_error(status.as_u16(), err);
            warn!(error = %classified, "LLM API error in 200 response");
            return Err(classified);
        }

        let content = body
            .first_content()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse)?;
        debug!(model, chars = content.len(), "chat completion done");
        Ok(content.to_string())
    }
}

impl ChatClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: Option<f32>,
    ) -> Result<String, LlmError> {
        with_retry(&self.retry, "chat completion", is_retriable, || {
            self.send_once(messages, model, temperature)
        })
        .await
    }
}

fn is_retriable(e: &LlmError) -> bool {
    matches!(
        e,
        LlmError::RateLimited
            | LlmError::Api {
                code: 500..=599,
                ..
            }
    )
}

fn classify_api_error(status: u16, err: &ApiError) -> LlmError {
    let message = err
        .message
        .clone()
        .or_else(|| err.kind.clone())
        .unwrap_or_else(|| "Unknown error".to_string());

    let code = err
        .code
        .as_ref()
        .and_then(|c| c.as_u64())
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(status);

    match code {
        429 => LlmError::RateLimited,
        code => LlmError::Api { code, message },
    }
}
