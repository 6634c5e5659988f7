//! Session configuration from the environment

use crate::controller::{ControllerConfig, DEFAULT_PROVIDER_TIMEOUT};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-0125";
pub const DEFAULT_TITLE: &str = "ChatGPT-like clone with context window management";
pub const DEFAULT_PROMPT: &str = "What's up?";

/// Context window of the default model, in tokens
pub const DEFAULT_TOKEN_WINDOW: usize = 16 * 1024;
/// Rough characters-per-token ratio used to turn tokens into a character budget
pub const DEFAULT_CHARS_PER_TOKEN: usize = 5;
/// Share of the token window the transcript may occupy
pub const DEFAULT_WINDOW_FRACTION: f64 = 0.90;

/// Character budget for a model with `tokens` of context
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn budget_from_token_window(tokens: usize, chars_per_token: usize, fraction: f64) -> usize {
    let chars = tokens.saturating_mul(chars_per_token) as f64;
    (chars * fraction.clamp(0.0, 1.0)).floor() as usize
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

/// Configuration for one chat session
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_key: String,
    /// API root of an `OpenAI`-compatible endpoint; `None` uses api.openai.com
    pub base_url: Option<String>,
    pub model: String,
    /// Character budget for the transcript
    pub max_context_len: usize,
    pub provider_timeout: Duration,
    pub max_attempts: u32,
    pub title: String,
}

impl ChatConfig {
    /// # Errors
    ///
    /// See [`ChatConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] without an API key and
    /// [`ConfigError::InvalidNumber`] for a numeric setting that does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;

        let max_context_len = parse_number(get("CHAT_MAX_CONTEXT_CHARS"), "CHAT_MAX_CONTEXT_CHARS")?
            .map_or_else(
                || {
                    budget_from_token_window(
                        DEFAULT_TOKEN_WINDOW,
                        DEFAULT_CHARS_PER_TOKEN,
                        DEFAULT_WINDOW_FRACTION,
                    )
                },
                |v| usize::try_from(v).unwrap_or(usize::MAX),
            );

        let provider_timeout = parse_number(
            get("CHAT_PROVIDER_TIMEOUT_SECS"),
            "CHAT_PROVIDER_TIMEOUT_SECS",
        )?
        .map_or(DEFAULT_PROVIDER_TIMEOUT, Duration::from_secs);

        let max_attempts = parse_number(get("CHAT_MAX_ATTEMPTS"), "CHAT_MAX_ATTEMPTS")?
            .map_or(1, |v| u32::try_from(v).unwrap_or(u32::MAX).max(1));

        Ok(Self {
            api_key,
            base_url: get("OPENAI_BASE_URL"),
            model: get("CHAT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_context_len,
            provider_timeout,
            max_attempts,
            title: get("CHAT_TITLE").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        })
    }

    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::new(self.model.clone())
            .with_timeout(self.provider_timeout)
            .with_max_attempts(self.max_attempts)
    }
}

fn parse_number(value: Option<String>, name: &'static str) -> Result<Option<u64>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber { name, value: v })
        })
        .transpose()
}
