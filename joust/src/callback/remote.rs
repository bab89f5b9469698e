//! Signed HTTP callbacks to remote agents.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::signing::{self, AGENT_ID_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use super::{CallbackChannel, CallbackError, CallbackRequest};
use crate::store::{Agent, Endpoint};

/// Maximum bytes of an error body kept in [`CallbackError::Status`].
const ERROR_BODY_LIMIT: usize = 512;

/// Delivers callbacks as signed JSON POSTs.
pub struct RemoteChannel {
    client: reqwest::Client,
}

impl RemoteChannel {
    pub fn new() -> Result<Self, CallbackError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("joust-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CallbackError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    async fn post(
        &self,
        agent: &Agent,
        url: &str,
        request: &CallbackRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallbackError> {
        let body = request
            .to_body()
            .map_err(|e| CallbackError::Serialization(e.to_string()))?;
        let timestamp = Utc::now().timestamp_millis();
        let signature = signing::sign(&agent.secret, timestamp, &body)?;

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(AGENT_ID_HEADER, agent.id.as_str())
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallbackError::Timeout(timeout)
                } else {
                    CallbackError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CallbackError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(CallbackError::Status {
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        // Non-JSON replies become null; the round rules turn that into a forfeit.
        Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
            debug!(agent_id = %agent.id, error = %e, "Callback reply is not JSON");
            serde_json::Value::Null
        }))
    }
}

#[async_trait]
impl CallbackChannel for RemoteChannel {
    async fn call(
        &self,
        agent: &Agent,
        request: &CallbackRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallbackError> {
        let Endpoint::Remote { url } = &agent.endpoint else {
            return Err(CallbackError::Unroutable(agent.id.clone()));
        };

        debug!(
            agent_id = %agent.id,
            url = %url,
            kind = request.kind(),
            "Sending signed callback"
        );

        tokio::time::timeout(timeout, self.post(agent, url, request, timeout))
            .await
            .map_err(|_| CallbackError::Timeout(timeout))?
    }
}
