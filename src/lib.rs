//! Rolling-transcript chat front-end
//!
//! Forwards user text to a hosted chat-completion model, streams the answer
//! back to a renderer, and keeps the conversation under a character budget
//! by evicting the oldest turns.

pub mod config;
pub mod controller;
pub mod llm;
pub mod render;
pub mod transcript;

pub use config::{ChatConfig, ConfigError};
pub use controller::{ChatError, ControllerConfig, ConversationController, TurnOutcome};
pub use llm::{LlmError, LlmErrorKind, LlmService, LoggingService, OpenAIService};
pub use render::{Renderer, TerminalRenderer};
pub use transcript::{EvictionReport, TranscriptStore, Turn, TurnRole};
