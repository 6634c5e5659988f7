//! Conversation controller
//!
//! Drives one request/response cycle per user input: record the question,
//! trim the transcript to budget, stream the provider's answer to the
//! renderer, and commit the answer only once the stream has completed.

#[cfg(test)]
pub mod testing;

use crate::llm::{CompletionRequest, LlmError, LlmService};
use crate::render::Renderer;
use crate::transcript::{EvictionReport, TranscriptStore};
use futures::StreamExt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::timeout;

/// Default bound on one provider exchange, connect through end of stream
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors surfaced by `handle_user_input`. In every case the user turn
/// stays in the transcript and no assistant turn is committed.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("provider request for turn {index} failed: {source}")]
    ProviderRequest {
        index: u64,
        #[source]
        source: LlmError,
    },
    #[error("provider did not finish turn {index} within {after:?}")]
    Timeout { index: u64, after: Duration },
}

impl ChatError {
    /// Exchange the failure belongs to
    #[must_use]
    pub fn turn_index(&self) -> u64 {
        match self {
            ChatError::ProviderRequest { index, .. } | ChatError::Timeout { index, .. } => *index,
        }
    }
}

/// Result of one call to `handle_user_input`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Empty input, nothing happened
    Ignored,
    Completed {
        index: u64,
        response: String,
        evicted: EvictionReport,
    },
}

/// Per-session controller settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub model: String,
    pub provider_timeout: Duration,
    /// Provider attempts per exchange; 1 disables retries
    pub max_attempts: u32,
}

impl ControllerConfig {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            max_attempts: 1,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, provider_timeout: Duration) -> Self {
        self.provider_timeout = provider_timeout;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Why a single provider attempt failed
enum AttemptFailure {
    Provider(LlmError),
    TimedOut,
}

/// One conversation session: owns the transcript for its whole lifetime
pub struct ConversationController<L, R>
where
    L: LlmService,
    R: Renderer,
{
    store: TranscriptStore,
    llm: L,
    renderer: R,
    config: ControllerConfig,
}

impl<L, R> ConversationController<L, R>
where
    L: LlmService,
    R: Renderer,
{
    #[must_use]
    pub fn new(store: TranscriptStore, llm: L, renderer: R, config: ControllerConfig) -> Self {
        Self {
            store,
            llm,
            renderer,
            config,
        }
    }

    #[must_use]
    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    #[must_use]
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// End the session, handing back the final transcript
    #[must_use]
    pub fn into_store(self) -> TranscriptStore {
        self.store
    }

    /// Repaint the full transcript
    pub fn redraw(&mut self) {
        self.renderer.render_history(self.store.all_turns());
    }

    /// Drive a whole session from line-oriented input until it ends.
    ///
    /// The full history is repainted before every prompt, except directly
    /// after a failed exchange so its error line stays on screen. Lines that
    /// are not valid UTF-8 are logged and skipped. Only the line terminator
    /// is stripped; other whitespace is kept as typed.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if reading the input fails.
    pub async fn run_session<I>(&mut self, input: I, prompt: &str) -> io::Result<()>
    where
        I: AsyncBufRead + Unpin,
    {
        let mut lines = input.split(b'\n');
        let mut repaint = true;

        loop {
            if repaint {
                self.redraw();
            }
            self.renderer.prompt(prompt);

            let Some(raw) = lines.next_segment().await? else {
                break;
            };
            let Some(line) = line_text(raw) else {
                repaint = false;
                continue;
            };

            repaint = match self.handle_user_input(&line).await {
                Ok(_) => true,
                // Already shown by the renderer; the session carries on
                Err(e) => {
                    tracing::debug!(turn = e.turn_index(), "Exchange ended with an error");
                    false
                }
            };
        }

        Ok(())
    }

    /// Run one exchange for `text`.
    ///
    /// The user turn is appended before eviction runs, so an input larger
    /// than the whole budget is evicted before the request is built.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError`] when the provider call fails, fails mid-stream,
    /// or does not finish within the configured timeout. The user turn stays
    /// in the transcript and nothing is committed for the assistant.
    pub async fn handle_user_input(&mut self, text: &str) -> Result<TurnOutcome, ChatError> {
        if text.is_empty() {
            tracing::debug!("Ignoring empty input");
            return Ok(TurnOutcome::Ignored);
        }

        let index = self.store.append_user_turn(text);
        if let Some(turn) = self.store.last_turn() {
            self.renderer.render_user_echo(
                turn,
                self.store.total_len(),
                self.store.max_context_len(),
            );
        }

        let evicted = self.store.evict_if_over_budget();
        if evicted.is_empty() {
            tracing::debug!(
                turn = index,
                total_len = self.store.total_len(),
                max_context_len = self.store.max_context_len(),
                "User turn appended"
            );
        } else {
            tracing::info!(
                turn = index,
                evicted_turns = evicted.turns_removed,
                released_chars = evicted.chars_released,
                total_len = self.store.total_len(),
                remaining_turns = self.store.len(),
                "Evicted oldest turns to stay within context budget"
            );
        }

        let request = CompletionRequest::streaming(
            self.config.model.clone(),
            self.store.snapshot_for_provider(),
        );

        match self.exchange(index, &request).await {
            Ok(response) => {
                self.store.append_assistant_turn(index, response.clone());
                tracing::debug!(
                    turn = index,
                    total_len = self.store.total_len(),
                    "Assistant turn committed"
                );
                Ok(TurnOutcome::Completed {
                    index,
                    response,
                    evicted,
                })
            }
            Err(e) => {
                tracing::warn!(
                    turn = index,
                    error = %e,
                    "Exchange failed, no assistant turn committed"
                );
                self.renderer.render_error(&e);
                Err(e)
            }
        }
    }

    /// Call the provider, retrying retryable failures that happened before
    /// any text reached the renderer
    async fn exchange(
        &mut self,
        index: u64,
        request: &CompletionRequest,
    ) -> Result<String, ChatError> {
        let mut attempt = 1;
        loop {
            let (result, forwarded) = self.attempt(request).await;
            let failure = match result {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            let retry_after = match &failure {
                AttemptFailure::Provider(e) if e.kind.is_retryable() => {
                    Some(e.retry_after.unwrap_or_else(|| retry_delay(attempt)))
                }
                _ => None,
            };

            match retry_after {
                Some(delay) if !forwarded && attempt < self.config.max_attempts => {
                    tracing::warn!(
                        turn = index,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = %delay.as_millis(),
                        "Retrying provider request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => {
                    return Err(match failure {
                        AttemptFailure::Provider(source) => {
                            ChatError::ProviderRequest { index, source }
                        }
                        AttemptFailure::TimedOut => ChatError::Timeout {
                            index,
                            after: self.config.provider_timeout,
                        },
                    });
                }
            }
        }
    }

    /// One provider round trip. Fragments are forwarded and accumulated in
    /// arrival order; the flag reports whether any reached the renderer.
    async fn attempt(
        &mut self,
        request: &CompletionRequest,
    ) -> (Result<String, AttemptFailure>, bool) {
        let llm = &self.llm;
        let renderer = &mut self.renderer;
        let mut accumulated = String::new();
        let mut forwarded = false;

        let run = async {
            let mut fragments = llm.stream(request).await?;
            while let Some(fragment) = fragments.next().await {
                let fragment = fragment?;
                if !forwarded {
                    renderer.begin_assistant();
                    forwarded = true;
                }
                renderer.render_fragment(&fragment);
                accumulated.push_str(&fragment);
            }
            Ok::<(), LlmError>(())
        };

        let outcome = timeout(self.config.provider_timeout, run).await;
        let result = match outcome {
            Ok(Ok(())) => {
                if !forwarded {
                    renderer.begin_assistant();
                }
                renderer.end_assistant();
                Ok(accumulated)
            }
            Ok(Err(e)) => Err(AttemptFailure::Provider(e)),
            Err(_) => Err(AttemptFailure::TimedOut),
        };
        (result, forwarded)
    }
}

/// Decode one input line without its terminator
fn line_text(mut raw: Vec<u8>) -> Option<String> {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    match String::from_utf8(raw) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping input line that is not valid UTF-8");
            None
        }
    }
}

fn retry_delay(attempt: u32) -> Duration {
    // Exponential backoff: 1s, 2s, 4s, capped at 32s
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}
