//! Round reply validation. A reply that breaks any rule becomes a forfeit.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::callback::{Round1Reply, Round2Reply};
use crate::store::{Choice, Round};

static LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(https?://|www\.)").expect("LINK_PATTERN regex should compile")
});

/// Why a round reply was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("reply does not match the round schema: {0}")]
    Malformed(String),

    #[error("reply has no message")]
    MissingMessage,

    #[error("reply has no choice")]
    MissingChoice,

    #[error("message is empty")]
    Empty,

    #[error("message contains a link")]
    Link,

    #[error("message is {len} chars, limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// Message recorded for a forfeited round.
pub fn forfeit_message(token: &str) -> String {
    format!("{token} (forfeit)")
}

/// Trim, reject links, prefix the token when absent, then enforce the cap on
/// the final text. Token presence ignores case.
pub fn normalize_message(raw: &str, token: &str, round: Round) -> Result<String, Violation> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(Violation::Empty);
    }
    if LINK_PATTERN.is_match(text) {
        return Err(Violation::Link);
    }

    let message = if text.to_lowercase().contains(&token.to_lowercase()) {
        text.to_string()
    } else {
        format!("{token} {text}")
    };

    let len = message.chars().count();
    let max = round.max_chars();
    if len > max {
        return Err(Violation::TooLong { len, max });
    }
    Ok(message)
}

pub fn check_round1(reply: &serde_json::Value, token: &str) -> Result<String, Violation> {
    let reply: Round1Reply = serde_json::from_value(reply.clone())
        .map_err(|e| Violation::Malformed(e.to_string()))?;
    let message = reply.message.ok_or(Violation::MissingMessage)?;
    normalize_message(&message, token, Round::Round1)
}

pub fn check_round2(
    reply: &serde_json::Value,
    token: &str,
) -> Result<(Choice, String), Violation> {
    let reply: Round2Reply = serde_json::from_value(reply.clone())
        .map_err(|e| Violation::Malformed(e.to_string()))?;
    let choice = reply.choice.ok_or(Violation::MissingChoice)?;
    let message = reply.message.ok_or(Violation::MissingMessage)?;
    Ok((choice, normalize_message(&message, token, Round::Round2)?))
}
