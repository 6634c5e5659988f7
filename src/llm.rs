//! Chat completion provider abstraction
//!
//! Provides a common interface for hosted chat-completion endpoints, either
//! as a one-shot response or as a stream of text fragments.

mod error;
mod openai;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use openai::{OpenAIService, SseDecoder, SseEvent};
pub use types::*;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Incremental response text, terminated by the end of the stream or by an
/// `Err` item when the provider fails mid-response
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Common interface for completion providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a one-shot completion request
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] classified by [`LlmErrorKind`] when the
    /// provider cannot be reached or rejects the request.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Open a streaming completion.
    ///
    /// Providers without incremental delivery fall back to `complete`, and
    /// the whole response arrives as a single fragment.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] when the stream cannot be opened; failures
    /// after that arrive as `Err` items of the stream.
    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream, LlmError> {
        let response = self.complete(request).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(response.text) })))
    }

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: LlmService + ?Sized> LlmService for Arc<T> {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        (**self).complete(request).await
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream, LlmError> {
        (**self).stream(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    #[must_use]
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let start = Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    messages = request.messages.len(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream, LlmError> {
        let start = Instant::now();
        let model_id = self.model_id.clone();
        let messages = request.messages.len();

        let mut inner = match self.inner.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    model = %model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM stream failed to open"
                );
                return Err(e);
            }
        };

        Ok(Box::pin(async_stream::stream! {
            let mut fragments = 0usize;
            let mut chars = 0usize;
            while let Some(item) = inner.next().await {
                match &item {
                    Ok(fragment) => {
                        fragments += 1;
                        chars += fragment.chars().count();
                    }
                    Err(e) => {
                        tracing::error!(
                            model = %model_id,
                            duration_ms = %start.elapsed().as_millis(),
                            fragments,
                            error = %e.message,
                            "LLM stream failed mid-response"
                        );
                    }
                }
                yield item;
            }
            tracing::info!(
                model = %model_id,
                duration_ms = %start.elapsed().as_millis(),
                messages,
                fragments,
                chars,
                "LLM stream completed"
            );
        }))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
