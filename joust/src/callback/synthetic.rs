//! Deterministic offline participants.
//!
//! A synthetic agent never touches the network. Its answers depend only on
//! its tags (and name, for flavour text), so tests and demo arenas replay
//! identically.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{CallbackChannel, CallbackError, CallbackRequest};
use crate::store::{Agent, Choice};

/// Callback channel that answers on behalf of synthetic agents.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticChannel;

impl SyntheticChannel {
    /// Stable side for this agent in a given context.
    pub fn leaning(agent: &Agent, context: &str) -> Choice {
        let mut hasher = Sha256::new();
        for tag in &agent.tags {
            hasher.update(tag.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"|");
        hasher.update(context.as_bytes());
        let digest = hasher.finalize();
        if digest[0] % 2 == 0 {
            Choice::A
        } else {
            Choice::B
        }
    }

    fn creed(agent: &Agent) -> String {
        if agent.tags.is_empty() {
            "no creed at all".to_string()
        } else {
            agent
                .tags
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(" and ")
        }
    }

    /// The reply this agent gives to `request`.
    pub fn reply(agent: &Agent, request: &CallbackRequest) -> serde_json::Value {
        match request {
            CallbackRequest::Round1(r) => {
                let message = format!(
                    "{} {} rides in for {}, sworn to {}.",
                    r.rules.required_token,
                    agent.name,
                    r.tribe.name,
                    Self::creed(agent)
                );
                json!({ "message": clip(&message, r.rules.max_chars) })
            }
            CallbackRequest::Round2(r) => {
                let choice = Self::leaning(agent, "round2");
                let message = format!(
                    "{} {} says {}: {} demands it.",
                    r.rules.required_token,
                    r.tribe.name,
                    r.prompt.option(choice),
                    Self::creed(agent)
                );
                json!({ "choice": choice, "message": clip(&message, r.rules.max_chars) })
            }
            CallbackRequest::Vote(_) => json!({ "vote": Self::leaning(agent, "vote") }),
        }
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[async_trait]
impl CallbackChannel for SyntheticChannel {
    async fn call(
        &self,
        agent: &Agent,
        request: &CallbackRequest,
        _timeout: Duration,
    ) -> Result<serde_json::Value, CallbackError> {
        Ok(Self::reply(agent, request))
    }
}
