//! `OpenAI` and `OpenAI`-compatible chat completions provider

use super::types::{CompletionRequest, CompletionResponse, Usage};
use super::{FragmentStream, LlmError, LlmService};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// `OpenAI`-compatible service implementation
pub struct OpenAIService {
    client: Client,
    api_key: String,
    endpoint: String,
    model_id: String,
}

impl OpenAIService {
    /// `base_url` points at the API root (e.g. `https://api.openai.com/v1`);
    /// `/chat/completions` is appended.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend of the HTTP client cannot be initialized.
    #[must_use]
    pub fn new(api_key: String, model: impl Into<String>, base_url: Option<&str>) -> Self {
        let endpoint = format!(
            "{}/chat/completions",
            base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/')
        );

        // No whole-request timeout: streams may legitimately run long, the
        // controller bounds the full exchange instead.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            endpoint,
            model_id: model.into(),
        }
    }

    fn translate_request(request: &CompletionRequest, stream: bool) -> OpenAIRequest {
        OpenAIRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.as_str().to_string(),
                    content: Some(m.content.clone()),
                })
                .collect(),
            stream,
        }
    }

    /// Send the request and turn any non-success status into a classified error
    async fn send(&self, body: &OpenAIRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read error response: {e}")))?;

        Err(error_from_body(status.as_u16(), &body, retry_after))
    }

    fn normalize_response(resp: OpenAIResponse) -> Result<CompletionResponse, LlmError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::unknown("No choices in response"))?;

        let usage = resp.usage.map_or_else(Usage::default, |u| Usage {
            input_tokens: u64::from(u.prompt_tokens),
            output_tokens: u64::from(u.completion_tokens),
        });

        Ok(CompletionResponse {
            text: choice.message.content.unwrap_or_default(),
            usage,
        })
    }
}

#[async_trait]
impl LlmService for OpenAIService {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = Self::translate_request(request, false);
        let response = self.send(&body).await?;

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        let openai_response: OpenAIResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {text}"))
        })?;

        Self::normalize_response(openai_response)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream, LlmError> {
        if !request.stream {
            let response = self.complete(request).await?;
            return Ok(Box::pin(futures::stream::once(async move {
                Ok(response.text)
            })));
        }

        let body = Self::translate_request(request, true);
        let response = self.send(&body).await?;
        Ok(decode_fragments(response.bytes_stream()))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn error_from_body(status: u16, body: &str, retry_after: Option<Duration>) -> LlmError {
    let message = serde_json::from_str::<OpenAIErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |r| r.error.message);
    let error = LlmError::from_status(status, &message);
    match retry_after {
        Some(delay) => error.with_retry_after(delay),
        None => error,
    }
}

/// Turn a raw SSE byte stream into response text fragments.
///
/// The stream only ends cleanly after `[DONE]` or a chunk carrying a
/// `finish_reason`; a body that stops short yields a trailing network error
/// so callers never mistake a truncated response for a complete one.
fn decode_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = SseDecoder::default();
        let mut finished = false;

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(LlmError::network(format!("Stream interrupted: {e}")));
                    return;
                }
            };

            for event in decoder.push(chunk.as_ref()) {
                match interpret_event(event) {
                    Ok(StreamStep::Done) => {
                        finished = true;
                        break 'read;
                    }
                    Ok(StreamStep::Delta { text, finished: last }) => {
                        if let Some(text) = text {
                            yield Ok(text);
                        }
                        finished |= last;
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        // A final event may lack its blank-line terminator
        if !finished {
            for event in decoder.finish() {
                match interpret_event(event) {
                    Ok(StreamStep::Done) => finished = true,
                    Ok(StreamStep::Delta { text, finished: last }) => {
                        if let Some(text) = text {
                            yield Ok(text);
                        }
                        finished |= last;
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        if !finished {
            yield Err(LlmError::network("Stream ended before the response completed"));
        }
    })
}

enum StreamStep {
    Delta { text: Option<String>, finished: bool },
    Done,
}

fn interpret_event(event: SseEvent) -> Result<StreamStep, LlmError> {
    let data = match event {
        SseEvent::Done => return Ok(StreamStep::Done),
        SseEvent::Data(data) => data,
    };

    let chunk: OpenAIStreamChunk = match serde_json::from_str(&data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, data = %data, "Skipping unparsable stream chunk");
            return Ok(StreamStep::Delta {
                text: None,
                finished: false,
            });
        }
    };

    if let Some(error) = chunk.error {
        return Err(LlmError::server_error(format!(
            "Provider error mid-stream: {}",
            error.message
        )));
    }

    let mut text = String::new();
    let mut finished = false;
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            text.push_str(&content);
        }
        finished |= choice.finish_reason.is_some();
    }

    Ok(StreamStep::Delta {
        text: (!text.is_empty()).then_some(text),
        finished,
    })
}

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// `data:` payload, multi-line payloads joined with `\n`
    Data(String),
    /// The `[DONE]` sentinel
    Done,
}

/// Incremental server-sent-events decoder.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk and return every event it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.process_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }

        events
    }

    /// Flush whatever remains once the byte stream has ended
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.process_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(events);
        } else if line.starts_with(':') {
            // comment / keep-alive
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // event:, id:, retry: carry nothing we need
    }

    fn dispatch(&mut self, events: &mut Vec<SseEvent>) {
        if self.data.is_empty() {
            return;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        if payload.trim() == "[DONE]" {
            events.push(SseEvent::Done);
        } else {
            events.push(SseEvent::Data(payload));
        }
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    #[serde(default)]
    error: Option<OpenAIError>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}
