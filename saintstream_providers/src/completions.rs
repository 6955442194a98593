use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use saintstream_core::{ChatMessage, ChatProvider, ChunkStream, GenerationOptions};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::ProviderError;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::sse::SseStream;

pub const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
pub const DEFAULT_MODEL: &str = "glm-4-flash";

/// Streaming client for OpenAI-compatible `/chat/completions` endpoints.
pub struct CompletionsProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl CompletionsProvider {
    pub fn new(api_key: String) -> Self {
        info!("Creating CompletionsProvider");
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, model: String) -> Self {
        self.default_model = model;
        self
    }

    /// Deadline for a whole generation, from connecting until the last chunk.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request_body(messages: &[ChatMessage], options: &GenerationOptions) -> Value {
        json!({
            "model": options.model,
            "messages": messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "stream": true,
        })
    }

    /// Send the request once and check the status.
    async fn try_open(&self, body: &Value) -> Result<Response, ProviderError> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Extract the text delta carried by one streamed completion event.
///
/// Events without content (role announcements, finish reasons, usage)
/// yield `Ok(None)`. An `error` object in the event is a failure.
fn parse_delta(data: &str) -> Result<Option<String>, ProviderError> {
    let event: Value =
        serde_json::from_str(data).map_err(|e| ProviderError::Payload(e.to_string()))?;

    if let Some(error) = event.get("error") {
        let message = error["message"]
            .as_str()
            .map_or_else(|| error.to_string(), ToString::to_string);
        return Err(ProviderError::Remote(message));
    }

    Ok(event["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|content| !content.is_empty())
        .map(ToString::to_string))
}

#[async_trait]
impl ChatProvider for CompletionsProvider {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> anyhow::Result<ChunkStream> {
        let body = Self::request_body(messages, options);

        info!(
            "Opening completion stream: model={}, messages={}",
            options.model,
            messages.len()
        );

        let response = retry_with_backoff(
            || self.try_open(&body),
            &self.retry,
            ProviderError::is_retryable,
        )
        .await?;

        debug!("Completion stream opened");

        let chunks = SseStream::new(Box::pin(response.bytes_stream())).filter_map(
            |event| async move {
                match event.and_then(|data| parse_delta(&data)) {
                    Ok(Some(text)) => Some(Ok(text)),
                    Ok(None) => None,
                    Err(e) => Some(Err(anyhow::Error::from(e))),
                }
            },
        );

        Ok(chunks.boxed())
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
