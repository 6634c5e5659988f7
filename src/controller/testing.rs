//! Mock collaborators for controller tests
//!
//! A scripted provider that replays queued responses and a renderer that
//! records every call it receives.

use crate::controller::ChatError;
use crate::llm::{
    CompletionRequest, CompletionResponse, FragmentStream, LlmError, LlmService,
};
use crate::render::Renderer;
use crate::transcript::{Turn, TurnRole};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;

// ============================================================================
// Scripted provider
// ============================================================================

/// One queued provider behaviour
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these fragments, then end cleanly
    Fragments(Vec<String>),
    /// Stream these fragments, then fail
    FailAfter {
        fragments: Vec<String>,
        error: LlmError,
    },
    /// Fail when the stream is opened
    Error(LlmError),
    /// Stream these fragments, then never finish
    Hang { fragments: Vec<String> },
    /// Only the one-shot path is available
    OneShot(String),
}

impl Script {
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Script::Fragments(fragments.into_iter().map(Into::into).collect())
    }
}

/// Provider that replays queued scripts in order and records requests
pub struct ScriptedLlm {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_script(&self, request: &CompletionRequest) -> Script {
        self.requests.lock().unwrap().push(request.clone());
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Error(LlmError::network("No mock response queued")))
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

fn ok_fragments(fragments: Vec<String>) -> impl futures::Stream<Item = Result<String, LlmError>> {
    futures::stream::iter(fragments.into_iter().map(Ok))
}

#[async_trait]
impl LlmService for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self.next_script(request) {
            Script::Fragments(fragments) | Script::Hang { fragments } => {
                Ok(CompletionResponse::text(fragments.concat()))
            }
            Script::OneShot(text) => Ok(CompletionResponse::text(text)),
            Script::FailAfter { error, .. } | Script::Error(error) => Err(error),
        }
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream, LlmError> {
        match self.next_script(request) {
            Script::Fragments(fragments) => Ok(Box::pin(ok_fragments(fragments))),
            Script::FailAfter { fragments, error } => Ok(Box::pin(
                ok_fragments(fragments).chain(futures::stream::once(async move { Err(error) })),
            )),
            Script::Error(error) => Err(error),
            Script::Hang { fragments } => Ok(Box::pin(
                ok_fragments(fragments).chain(futures::stream::pending()),
            )),
            Script::OneShot(text) => {
                Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
            }
        }
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Recording renderer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    History(Vec<(u64, TurnRole, String)>),
    UserEcho {
        index: u64,
        content: String,
        total_len: usize,
        max_context_len: usize,
    },
    BeginAssistant,
    Fragment(String),
    EndAssistant,
    Error(String),
    Prompt(String),
}

/// Renderer that keeps every call for later assertions
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub events: Vec<RecordedEvent>,
}

impl Renderer for RecordingRenderer {
    fn render_history(&mut self, turns: &[Turn]) {
        self.events.push(RecordedEvent::History(
            turns
                .iter()
                .map(|t| (t.index(), t.role(), t.content().to_string()))
                .collect(),
        ));
    }

    fn render_user_echo(&mut self, turn: &Turn, total_len: usize, max_context_len: usize) {
        self.events.push(RecordedEvent::UserEcho {
            index: turn.index(),
            content: turn.content().to_string(),
            total_len,
            max_context_len,
        });
    }

    fn begin_assistant(&mut self) {
        self.events.push(RecordedEvent::BeginAssistant);
    }

    fn render_fragment(&mut self, fragment: &str) {
        self.events.push(RecordedEvent::Fragment(fragment.to_string()));
    }

    fn end_assistant(&mut self) {
        self.events.push(RecordedEvent::EndAssistant);
    }

    fn render_error(&mut self, error: &ChatError) {
        self.events.push(RecordedEvent::Error(error.to_string()));
    }

    fn prompt(&mut self, text: &str) {
        self.events.push(RecordedEvent::Prompt(text.to_string()));
    }
}
