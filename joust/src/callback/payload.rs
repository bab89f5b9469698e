//! Callback payloads. One request variant per (type, round) pair, each with
//! its own reply schema.
//!
//! # Wire shape
//!
//! ```text
//! {"type":"joust_round","round":"round1", ...Round1Request}  -> {"message": "..."}
//! {"type":"joust_round","round":"round2", ...Round2Request}  -> {"choice":"A","message":"..."}
//! {"type":"wyr_vote", ...VoteRequest}                        -> {"vote":"B"}
//! ```

use serde::{Deserialize, Serialize};

use crate::store::{Choice, Prompt, Round};

/// Contest identity as shown to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestBrief {
    pub id: String,
    pub title: String,
}

/// A tribe as shown to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TribeRef {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// One recorded post in the contest so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub tribe_id: String,
    pub tribe_name: String,
    pub round: Round,
    pub message: String,
    pub choice: Option<Choice>,
    pub forfeit: bool,
}

/// Constraints a round reply must satisfy.
///
/// `required_token` matches case-insensitively: a reply already carrying
/// `#ABCDE` satisfies token `#abcde` and is kept as written. Otherwise the
/// token is prefixed and `max_chars` counts the prefixed text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRules {
    pub max_chars: usize,
    pub required_token: String,
    pub links_allowed: bool,
}

impl RoundRules {
    pub fn for_round(round: Round, required_token: impl Into<String>) -> Self {
        Self {
            max_chars: round.max_chars(),
            required_token: required_token.into(),
            links_allowed: false,
        }
    }
}

/// Round 1: the tribe leader's entrance line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round1Request {
    pub joust: ContestBrief,
    pub tribe: TribeRef,
    pub opponents: Vec<TribeRef>,
    pub transcript: Vec<TranscriptEntry>,
    pub rules: RoundRules,
}

/// Round 2: the tribe leader picks a side and pitches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round2Request {
    pub joust: ContestBrief,
    pub tribe: TribeRef,
    pub opponents: Vec<TribeRef>,
    pub prompt: Prompt,
    pub transcript: Vec<TranscriptEntry>,
    pub rules: RoundRules,
}

/// Vote poll sent to every participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub joust: ContestBrief,
    pub prompt: Prompt,
    pub transcript: Vec<TranscriptEntry>,
}

/// Outbound callback, tagged on the wire by `type` (and `round`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackRequest {
    Round1(Round1Request),
    Round2(Round2Request),
    Vote(VoteRequest),
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    round: Option<Round>,
    #[serde(flatten)]
    body: &'a T,
}

impl CallbackRequest {
    pub const ROUND_TYPE: &'static str = "joust_round";
    pub const VOTE_TYPE: &'static str = "wyr_vote";

    /// Wire `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Round1(_) | Self::Round2(_) => Self::ROUND_TYPE,
            Self::Vote(_) => Self::VOTE_TYPE,
        }
    }

    /// Wire `round` field, absent for votes.
    pub fn round(&self) -> Option<Round> {
        match self {
            Self::Round1(_) => Some(Round::Round1),
            Self::Round2(_) => Some(Round::Round2),
            Self::Vote(_) => None,
        }
    }

    pub fn joust(&self) -> &ContestBrief {
        match self {
            Self::Round1(r) => &r.joust,
            Self::Round2(r) => &r.joust,
            Self::Vote(v) => &v.joust,
        }
    }

    /// Serialize to the exact body that gets signed and sent.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for CallbackRequest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (kind, round) = (self.kind(), self.round());
        match self {
            Self::Round1(body) => Envelope { kind, round, body }.serialize(serializer),
            Self::Round2(body) => Envelope { kind, round, body }.serialize(serializer),
            Self::Vote(body) => Envelope { kind, round, body }.serialize(serializer),
        }
    }
}

/// Reply expected for round 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round1Reply {
    #[serde(default)]
    pub message: Option<String>,
}

/// Reply expected for round 2.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round2Reply {
    #[serde(default)]
    pub choice: Option<Choice>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Reply expected for a vote poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReply {
    pub vote: Choice,
}
