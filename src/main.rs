//! rolling-chat - terminal chat with a rolling context budget
//!
//! Reads one message per line from stdin, streams the model's answer to
//! stdout, and logs as JSON to stderr.

use rolling_chat::config::DEFAULT_PROMPT;
use rolling_chat::{
    ChatConfig, ConversationController, LlmService, LoggingService, OpenAIService,
    TerminalRenderer, TranscriptStore,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rolling_chat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = ChatConfig::from_env()?;
    tracing::info!(
        model = %config.model,
        max_context_len = config.max_context_len,
        timeout_secs = config.provider_timeout.as_secs(),
        max_attempts = config.max_attempts,
        "Starting chat session"
    );

    let service = OpenAIService::new(
        config.api_key.clone(),
        config.model.clone(),
        config.base_url.as_deref(),
    );
    let llm: Arc<dyn LlmService> = Arc::new(LoggingService::new(Arc::new(service)));

    let mut controller = ConversationController::new(
        TranscriptStore::new(config.max_context_len),
        llm,
        TerminalRenderer::stdout(config.title.clone()),
        config.controller_config(),
    );

    controller
        .run_session(BufReader::new(tokio::io::stdin()), DEFAULT_PROMPT)
        .await?;

    let store = controller.into_store();
    tracing::info!(
        exchanges = store.turn_counter(),
        retained_turns = store.len(),
        total_len = store.total_len(),
        "Chat session ended"
    );

    Ok(())
}
