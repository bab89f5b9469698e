//! Core types persisted by the joust store
//!
//! These are the entities every backend stores. They stay free of internally
//! tagged enums and skipped fields so that the binary RocksDB encoding and the
//! JSON encoding used by the CLI describe the same shape.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contest::ContestState;
use crate::roster::JoinPolicy;

/// Unique identifier for agents
pub type AgentId = String;

/// Unique identifier for tribes
pub type TribeId = String;

/// Unique identifier for contests
pub type ContestId = String;

/// One side of the contest's binary prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Choice {
    A,
    B,
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Choice::A => write!(f, "A"),
            Choice::B => write!(f, "B"),
        }
    }
}

/// Where an agent receives its callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    /// Signed HTTP POST to the given URL.
    Remote { url: String },
    /// Offline participant answered by the deterministic generator.
    Synthetic,
}

impl Endpoint {
    /// Address scheme reserved for synthetic participants.
    pub const SYNTHETIC_SCHEME: &'static str = "local://";

    /// Parse a registration address into an endpoint.
    ///
    /// This is the only place the reserved scheme is inspected; everything
    /// downstream dispatches on the variant.
    pub fn parse(address: &str) -> Self {
        let address = address.trim();
        if address.starts_with(Self::SYNTHETIC_SCHEME) {
            Endpoint::Synthetic
        } else {
            Endpoint::Remote {
                url: address.to_string(),
            }
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Endpoint::Synthetic)
    }
}

/// Win or loss recorded alongside an infamy delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    pub fn from_win(won: bool) -> Self {
        if won {
            Outcome::Win
        } else {
            Outcome::Loss
        }
    }
}

/// A remote autonomous participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub endpoint: Endpoint,
    /// Shared secret used to sign callbacks sent to this agent
    pub secret: String,
    pub tags: BTreeSet<String>,
    pub infamy: i64,
    pub wins: u32,
    pub losses: u32,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Create an agent with a known id.
    pub fn new(id: impl Into<String>, name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoint,
            secret: String::new(),
            tags: BTreeSet::new(),
            infamy: 0,
            wins: 0,
            losses: 0,
            created_at: Utc::now(),
        }
    }

    /// Register a new agent from its declared callback address.
    pub fn register(name: impl Into<String>, address: &str, secret: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), name, Endpoint::parse(address))
            .with_secret(secret)
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_infamy(mut self, infamy: i64) -> Self {
        self.infamy = infamy;
        self
    }

    /// Apply an infamy delta and bump the matching counter.
    pub fn apply(&mut self, delta: i64, outcome: Outcome) {
        self.infamy += delta;
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
        }
    }
}

/// A team of agents sharing infamy and a join policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tribe {
    pub id: TribeId,
    pub name: String,
    pub color: String,
    pub leader_id: AgentId,
    pub infamy: i64,
    pub wins: u32,
    pub losses: u32,
    pub policy: JoinPolicy,
    pub created_at: DateTime<Utc>,
}

impl Tribe {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        color: impl Into<String>,
        leader_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: color.into(),
            leader_id: leader_id.into(),
            infamy: 0,
            wins: 0,
            losses: 0,
            policy: JoinPolicy::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_infamy(mut self, infamy: i64) -> Self {
        self.infamy = infamy;
        self
    }

    pub fn with_policy(mut self, policy: JoinPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply an infamy delta and bump the matching counter.
    pub fn apply(&mut self, delta: i64, outcome: Outcome) {
        self.infamy += delta;
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
        }
    }
}

/// The binary question every contest is fought over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub question: String,
    pub option_a: String,
    pub option_b: String,
}

impl Prompt {
    pub fn new(
        question: impl Into<String>,
        option_a: impl Into<String>,
        option_b: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            option_a: option_a.into(),
            option_b: option_b.into(),
        }
    }

    pub fn option(&self, choice: Choice) -> &str {
        match choice {
            Choice::A => &self.option_a,
            Choice::B => &self.option_b,
        }
    }
}

/// Which posting round a [`RoundPost`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Round {
    Round1,
    Round2,
}

impl Round {
    /// Maximum characters accepted in a reply for this round.
    pub fn max_chars(self) -> usize {
        match self {
            Round::Round1 => 240,
            Round::Round2 => 420,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Round::Round1 => "round1",
            Round::Round2 => "round2",
        }
    }
}

impl std::fmt::Display for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tribe's recorded answer for one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundPost {
    pub contest_id: ContestId,
    pub tribe_id: TribeId,
    pub round: Round,
    /// The agent that answered (the tribe leader)
    pub agent_id: AgentId,
    pub message: String,
    /// Only set for round 2, and never for a forfeit
    pub choice: Option<Choice>,
    pub forfeit: bool,
    pub created_at: DateTime<Utc>,
}

/// A single agent's vote in a contest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub contest_id: ContestId,
    pub agent_id: AgentId,
    pub choice: Choice,
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(contest_id: impl Into<String>, agent_id: impl Into<String>, choice: Choice) -> Self {
        Self {
            contest_id: contest_id.into(),
            agent_id: agent_id.into(),
            choice,
            cast_at: Utc::now(),
        }
    }
}

/// Vote counts per option
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTotals {
    #[serde(rename = "A")]
    pub a: u32,
    #[serde(rename = "B")]
    pub b: u32,
}

impl VoteTotals {
    pub fn record(&mut self, choice: Choice) {
        match choice {
            Choice::A => self.a += 1,
            Choice::B => self.b += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.a + self.b
    }

    /// The option with strictly more votes, or `None` on a tie.
    pub fn winning_option(&self) -> Option<Choice> {
        match self.a.cmp(&self.b) {
            std::cmp::Ordering::Greater => Some(Choice::A),
            std::cmp::Ordering::Less => Some(Choice::B),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Per-tribe line of a contest's results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TribeResult {
    pub tribe_id: TribeId,
    pub choice: Option<Choice>,
    pub neutral_votes: u32,
    pub snitch_votes: u32,
    /// Every matching vote from a non-member; reported, never scored
    pub outside_votes: u32,
    pub persuasion_score: i64,
    pub delta_infamy: i64,
    pub on_winning_side: bool,
    pub is_winner: bool,
}

/// How the winning tribe was designated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionMode {
    Rules,
    Ai,
}

impl std::fmt::Display for DecisionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionMode::Rules => write!(f, "rules"),
            DecisionMode::Ai => write!(f, "ai"),
        }
    }
}

impl std::str::FromStr for DecisionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rules" => Ok(DecisionMode::Rules),
            "ai" => Ok(DecisionMode::Ai),
            other => Err(format!("unknown decision mode: {other}")),
        }
    }
}

/// Metadata describing the decision source of a contest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionMeta {
    pub mode: DecisionMode,
    /// `rules`, `heuristic`, or `analyst:<model>`
    pub source: String,
    pub confidence: Option<f64>,
    pub verdict: String,
    pub highlights: Vec<String>,
    pub fallback: bool,
}

/// Outcome of the conquest step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    pub winner_tribe_id: Option<TribeId>,
    pub moved_total: u32,
    pub moved_from_tribes: BTreeMap<TribeId, u32>,
}

/// Final record of a contest, written once when it reaches `done`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestResults {
    pub vote_totals: VoteTotals,
    pub winning_option: Option<Choice>,
    pub winner_tribe_id: Option<TribeId>,
    pub tribes: Vec<TribeResult>,
    pub decision: DecisionMeta,
    pub migration: Migration,
    pub resolved_at: DateTime<Utc>,
}

impl ContestResults {
    pub fn tribe(&self, tribe_id: &str) -> Option<&TribeResult> {
        self.tribes.iter().find(|t| t.tribe_id == tribe_id)
    }
}

/// One run of the binary-choice protocol between two or more tribes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contest {
    pub id: ContestId,
    pub title: String,
    pub prompt: Prompt,
    /// Participating tribes, fixed at creation
    pub tribe_ids: Vec<TribeId>,
    pub state: ContestState,
    pub results: Option<ContestResults>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contest {
    /// Create a contest in the draft state with a fresh id.
    pub fn new(title: impl Into<String>, prompt: Prompt, tribe_ids: Vec<TribeId>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), title, prompt, tribe_ids)
    }

    pub fn with_id(
        id: impl Into<String>,
        title: impl Into<String>,
        prompt: Prompt,
        tribe_ids: Vec<TribeId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            prompt,
            tribe_ids,
            state: ContestState::Draft,
            results: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Token every round reply must carry: `#` plus the first 5 chars of the id.
    pub fn required_token(&self) -> String {
        let prefix: String = self.id.chars().take(5).collect();
        format!("#{prefix}")
    }

    pub fn has_tribe(&self, tribe_id: &str) -> bool {
        self.tribe_ids.iter().any(|t| t == tribe_id)
    }

    /// Winner already persisted on this contest, if any.
    pub fn persisted_winner(&self) -> Option<&str> {
        self.results
            .as_ref()
            .and_then(|r| r.winner_tribe_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(Endpoint::parse("local://bot-7"), Endpoint::Synthetic);
        assert_eq!(
            Endpoint::parse(" https://agent.example/hook "),
            Endpoint::Remote {
                url: "https://agent.example/hook".to_string()
            }
        );
    }

    #[test]
    fn test_register_assigns_fresh_ids() {
        let first = Agent::register("Ada", "local://ada", "s3cret");
        let second = Agent::register("Bo", "https://bo.example/hook", "");
        assert_ne!(first.id, second.id);
        assert!(first.endpoint.is_synthetic());
        assert_eq!(first.secret, "s3cret");
        assert!(!second.endpoint.is_synthetic());
    }

    #[test]
    fn test_required_token() {
        let contest = Contest::with_id(
            "abcdef-123",
            "t",
            Prompt::new("q", "a", "b"),
            vec!["t1".into(), "t2".into()],
        );
        assert_eq!(contest.required_token(), "#abcde");
    }

    #[test]
    fn test_vote_totals_winning_option() {
        let mut totals = VoteTotals::default();
        assert_eq!(totals.winning_option(), None);
        totals.record(Choice::A);
        assert_eq!(totals.winning_option(), Some(Choice::A));
        totals.record(Choice::B);
        assert_eq!(totals.winning_option(), None);
        totals.record(Choice::B);
        assert_eq!(totals.winning_option(), Some(Choice::B));
        assert_eq!(totals.total(), 3);
    }

    #[test]
    fn test_results_serialize_camel_case() {
        let results = ContestResults {
            vote_totals: VoteTotals { a: 2, b: 0 },
            winning_option: Some(Choice::A),
            winner_tribe_id: Some("t1".into()),
            tribes: vec![],
            decision: DecisionMeta {
                mode: DecisionMode::Rules,
                source: "rules".into(),
                confidence: None,
                verdict: String::new(),
                highlights: vec![],
                fallback: false,
            },
            migration: Migration::default(),
            resolved_at: Utc::now(),
        };
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["voteTotals"]["A"], 2);
        assert_eq!(json["winningOption"], "A");
        assert_eq!(json["winnerTribeId"], "t1");
        assert_eq!(json["migration"]["movedTotal"], 0);
    }

    #[test]
    fn test_apply_outcome() {
        let mut agent = Agent::new("a1", "Ada", Endpoint::Synthetic).with_infamy(3);
        agent.apply(-5, Outcome::Loss);
        agent.apply(2, Outcome::Win);
        assert_eq!(agent.infamy, 0);
        assert_eq!((agent.wins, agent.losses), (1, 1));
    }
}
