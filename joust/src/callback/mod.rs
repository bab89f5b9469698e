//! How the engine talks to participants.
//!
//! ```text
//! JoustEngine ──► AgentDialer ──┬─ Endpoint::Remote    ─► RemoteChannel   (signed HTTP POST)
//!                               └─ Endpoint::Synthetic ─► SyntheticChannel (deterministic, offline)
//! ```
//!
//! Channels return the participant's raw JSON reply. Decoding the reply into
//! the round's schema, and deciding whether it is a forfeit, is the engine's
//! job; a channel only fails on transport problems.

pub mod payload;
pub mod remote;
pub mod signing;
pub mod synthetic;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::store::{Agent, Endpoint};

pub use payload::{
    CallbackRequest, ContestBrief, Round1Reply, Round1Request, Round2Reply, Round2Request,
    RoundRules, TranscriptEntry, TribeRef, VoteReply, VoteRequest,
};
pub use remote::RemoteChannel;
pub use synthetic::SyntheticChannel;

/// Errors from delivering a callback
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("Callback timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Agent answered with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Agent {0} has no endpoint this channel can reach")]
    Unroutable(String),
}

/// A way of delivering a callback to an agent and getting its reply.
#[async_trait]
pub trait CallbackChannel: Send + Sync {
    /// Deliver `request` to `agent`, giving up after `timeout`.
    async fn call(
        &self,
        agent: &Agent,
        request: &CallbackRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallbackError>;
}

/// Shared reference to a callback channel
pub type SharedChannel = Arc<dyn CallbackChannel>;

/// Routes each call to the channel matching the agent's endpoint.
pub struct AgentDialer {
    remote: SharedChannel,
    synthetic: SharedChannel,
}

impl AgentDialer {
    /// Dialer with the signed HTTP channel and the synthetic generator.
    pub fn new() -> Result<Self, CallbackError> {
        Ok(Self::with_channels(
            Arc::new(RemoteChannel::new()?),
            Arc::new(SyntheticChannel),
        ))
    }

    pub fn with_channels(remote: SharedChannel, synthetic: SharedChannel) -> Self {
        Self { remote, synthetic }
    }

    /// Create a shared reference to this dialer
    pub fn shared(self) -> SharedChannel {
        Arc::new(self)
    }
}

#[async_trait]
impl CallbackChannel for AgentDialer {
    async fn call(
        &self,
        agent: &Agent,
        request: &CallbackRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallbackError> {
        match agent.endpoint {
            Endpoint::Remote { .. } => self.remote.call(agent, request, timeout).await,
            Endpoint::Synthetic => self.synthetic.call(agent, request, timeout).await,
        }
    }
}
