//! Engine configuration.
//!
//! `JoustConfig::default()` reads `JOUST_*` environment variables; a TOML
//! file can override any field, with missing fields taking those defaults.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::DecisionMode;

/// Upper bound on any single vote callback.
pub const VOTE_TIMEOUT_CAP: Duration = Duration::from_secs(4);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which agents are polled in the vote phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteScope {
    /// Every registered agent.
    #[default]
    All,
    /// Only members of the contest's tribes.
    ContestTribes,
}

impl FromStr for VoteScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(VoteScope::All),
            "contest_tribes" => Ok(VoteScope::ContestTribes),
            other => Err(format!("unknown vote scope: {other}")),
        }
    }
}

/// External analyst endpoint for `ai` decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalystConfig {
    /// Full chat-completions URL.
    pub url: String,
    /// Bearer credential. `None` means the heuristic always decides.
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("JOUST_ANALYST_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".into()),
            api_key: std::env::var("JOUST_ANALYST_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            model: std::env::var("JOUST_ANALYST_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            timeout_ms: env_parse("JOUST_ANALYST_TIMEOUT_MS").unwrap_or(20_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoustConfig {
    /// Hard limit for each round callback.
    pub callback_timeout_ms: u64,
    pub vote_scope: VoteScope,
    pub decision_mode: DecisionMode,
    pub analyst: AnalystConfig,
}

impl Default for JoustConfig {
    fn default() -> Self {
        Self {
            callback_timeout_ms: env_parse("JOUST_CALLBACK_TIMEOUT_MS").unwrap_or(8_000),
            vote_scope: env_parse("JOUST_VOTE_SCOPE").unwrap_or_default(),
            decision_mode: env_parse("JOUST_DECISION_MODE").unwrap_or(DecisionMode::Rules),
            analyst: AnalystConfig::default(),
        }
    }
}

impl JoustConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    /// `min(callback_timeout, 4s)`.
    pub fn vote_timeout(&self) -> Duration {
        self.callback_timeout().min(VOTE_TIMEOUT_CAP)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
