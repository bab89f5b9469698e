//! External analyst: asks a chat-completions model to judge a finished
//! contest and parses its strict-JSON verdict.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use super::DecisionContext;

const SYSTEM_INSTRUCTION: &str = r#"You judge a "would you rather" joust between tribes of agents.
Each tribe made an entrance (round 1) and then picked option A or B with a pitch (round 2).
Decide which tribe argued best. Answer with strict JSON and nothing else:
{"winnerTribeId": "<one of the tribe ids>", "confidence": <number 0..1>, "verdict": "<one or two sentences>", "highlights": ["<up to 3 short quotes>"]}"#;

const MAX_HIGHLIGHTS: usize = 3;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analyst credential not configured")]
    MissingCredential,

    #[error("analyst request failed: {0}")]
    Transport(String),

    #[error("analyst returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("analyst reply is not valid JSON: {0}")]
    Parse(String),

    #[error("analyst reply violates schema: {0}")]
    Schema(String),

    #[error("analyst named unknown tribe {0}")]
    UnknownWinner(String),

    #[error("analyst panicked")]
    Panicked,
}

/// Prompt handed to an [`Analyst`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub system: String,
    pub summary: String,
}

impl AnalysisRequest {
    /// Build the request for a contest about to be resolved.
    pub fn for_contest(ctx: &DecisionContext<'_>) -> Self {
        let tribes: Vec<serde_json::Value> = ctx
            .dossiers
            .iter()
            .map(|d| {
                json!({
                    "id": d.id,
                    "name": d.name,
                    "color": d.color,
                    "infamy": d.infamy,
                    "record": { "wins": d.wins, "losses": d.losses },
                    "round1": d.round1_text,
                    "round2": { "choice": d.round2_choice, "text": d.round2_text },
                    "persuasionScore": ctx.board.score_of(&d.id),
                })
            })
            .collect();

        let summary = json!({
            "joust": { "id": ctx.contest.id, "title": ctx.contest.title },
            "prompt": ctx.contest.prompt,
            "votes": ctx.board.vote_totals,
            "winningOption": ctx.board.winning_option,
            "tribes": tribes,
        });

        Self {
            system: SYSTEM_INSTRUCTION.to_string(),
            summary: summary.to_string(),
        }
    }
}

/// Verdict returned by the analyst.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalystVerdict {
    pub winner_tribe_id: String,
    pub confidence: f64,
    pub verdict: String,
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl AnalystVerdict {
    /// Parse a reply that must be a single JSON object.
    pub fn parse(content: &str) -> Result<Self, AnalysisError> {
        let verdict: Self = serde_json::from_str(content.trim())
            .map_err(|e| AnalysisError::Parse(e.to_string()))?;
        verdict.validate()
    }

    /// Check field ranges. Extra highlights are dropped.
    pub fn validate(mut self) -> Result<Self, AnalysisError> {
        if self.winner_tribe_id.trim().is_empty() {
            return Err(AnalysisError::Schema("winnerTribeId is empty".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(AnalysisError::Schema(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        self.highlights.truncate(MAX_HIGHLIGHTS);
        Ok(self)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Analyst: Send + Sync {
    /// Short label recorded as the decision source.
    fn name(&self) -> String;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalystVerdict, AnalysisError>;
}

/// OpenAI-compatible `/chat/completions` analyst.
pub struct ChatAnalyst {
    url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ChatAnalyst {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AnalysisError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AnalysisError::MissingCredential);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            api_key,
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl Analyst for ChatAnalyst {
    fn name(&self) -> String {
        self.model.clone()
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalystVerdict, AnalysisError> {
        let request_body = json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.summary },
            ],
        });

        debug!(url = %self.url, model = %self.model, "Requesting contest analysis");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Status {
                status,
                body: body.chars().take(512).collect(),
            });
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::Parse(e.to_string()))?;

        let content = resp_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AnalysisError::Schema("reply has no message content".into()))?;

        AnalystVerdict::parse(content)
    }
}
