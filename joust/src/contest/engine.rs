//! The joust engine: drives a contest through its rounds, one state per
//! [`JoustEngine::advance`] call.
//!
//! Everything an advance learns is written to the store before the state
//! moves, so an advance that fails half way (a leader's endpoint is down)
//! can simply be retried: tribes that already answered are not called again.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::locks::ContestLocks;
use super::rules::{self, Violation};
use super::state::{ContestState, TransitionError};
use crate::callback::{
    AgentDialer, CallbackError, CallbackRequest, ContestBrief, Round1Request, Round2Request,
    RoundRules, SharedChannel, TranscriptEntry, TribeRef, VoteReply, VoteRequest,
};
use crate::config::{JoustConfig, VoteScope};
use crate::conquest;
use crate::decision::{self, Decision, DecisionContext, SharedStrategy, TribeDossier};
use crate::resolution::resolve;
use crate::scoring::{score, CastVote, Scoreboard, TribeChoice, TribeTally};
use crate::store::{
    Agent, Contest, ContestResults, Migration, Round, RoundPost, Settlement, SharedStore,
    StoreError, Tribe, TribeId, Vote,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("contest {0} not found")]
    ContestNotFound(String),

    #[error("invalid contest: {0}")]
    InvalidContest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("callback to agent {agent_id} failed: {source}")]
    Callback {
        agent_id: String,
        #[source]
        source: CallbackError,
    },

    #[error("callback channel unavailable: {0}")]
    Channel(#[source] CallbackError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// What one `advance` call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceReport {
    pub contest_id: String,
    pub from: ContestState,
    pub to: ContestState,
    pub posts_recorded: usize,
    pub forfeits: usize,
    pub votes_recorded: usize,
    pub results: Option<ContestResults>,
}

impl AdvanceReport {
    fn new(contest: &Contest) -> Self {
        Self {
            contest_id: contest.id.clone(),
            from: contest.state,
            to: contest.state,
            posts_recorded: 0,
            forfeits: 0,
            votes_recorded: 0,
            results: None,
        }
    }
}

pub struct JoustEngine {
    store: SharedStore,
    channel: SharedChannel,
    strategy: SharedStrategy,
    config: JoustConfig,
    locks: ContestLocks,
}

impl JoustEngine {
    pub fn new(
        store: SharedStore,
        channel: SharedChannel,
        strategy: SharedStrategy,
        config: JoustConfig,
    ) -> Self {
        Self {
            store,
            channel,
            strategy,
            config,
            locks: ContestLocks::new(),
        }
    }

    /// Engine with the default dialer and the strategy `config` selects.
    pub fn from_config(store: SharedStore, config: JoustConfig) -> EngineResult<Self> {
        let channel = AgentDialer::new().map_err(EngineError::Channel)?.shared();
        let strategy = decision::strategy_for(&config);
        Ok(Self::new(store, channel, strategy, config))
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> &JoustConfig {
        &self.config
    }

    /// Validate and persist a draft contest.
    pub fn create_contest(&self, contest: Contest) -> EngineResult<Contest> {
        if contest.state != ContestState::Draft || contest.results.is_some() {
            return Err(EngineError::InvalidContest(
                "new contests start as drafts".into(),
            ));
        }
        let prompt = &contest.prompt;
        if [&prompt.question, &prompt.option_a, &prompt.option_b]
            .iter()
            .any(|s| s.trim().is_empty())
        {
            return Err(EngineError::InvalidContest(
                "prompt needs a question and two options".into(),
            ));
        }
        if contest.tribe_ids.len() < 2 {
            return Err(EngineError::InvalidContest(
                "at least two tribes must take part".into(),
            ));
        }
        for (i, id) in contest.tribe_ids.iter().enumerate() {
            if contest.tribe_ids[..i].contains(id) {
                return Err(EngineError::InvalidContest(format!("tribe {id} listed twice")));
            }
            if self.store.get_tribe(id)?.is_none() {
                return Err(EngineError::InvalidContest(format!("unknown tribe {id}")));
            }
        }
        if self.store.get_contest(&contest.id)?.is_some() {
            return Err(EngineError::InvalidContest(format!(
                "contest {} already exists",
                contest.id
            )));
        }

        self.store.put_contest(&contest)?;
        info!(
            contest_id = %contest.id,
            tribes = contest.tribe_ids.len(),
            "Contest created"
        );
        Ok(contest)
    }

    /// Move the contest one state forward, doing that state's work first.
    pub async fn advance(&self, contest_id: &str) -> EngineResult<AdvanceReport> {
        let guard = self.locks.acquire(contest_id).await;
        let outcome = self.advance_locked(contest_id).await;

        // Missing and finished contests never need their lock again.
        let settled = match &outcome {
            Ok(report) => report.to.is_terminal(),
            Err(EngineError::ContestNotFound(_)) => true,
            Err(_) => false,
        };
        drop(guard);
        if settled {
            self.locks.release(contest_id);
        }
        outcome
    }

    async fn advance_locked(&self, contest_id: &str) -> EngineResult<AdvanceReport> {
        let mut contest = self.load(contest_id)?;
        let mut report = AdvanceReport::new(&contest);
        let from = contest.state;

        match from {
            ContestState::Draft => {}
            ContestState::Round1 => self.run_round(&contest, Round::Round1, &mut report).await?,
            ContestState::Round2 => self.run_round(&contest, Round::Round2, &mut report).await?,
            ContestState::Vote => {
                self.poll_votes(&contest, &mut report).await?;
                contest = self.settle(&contest).await?;
                report.results = contest.results.clone();
            }
            ContestState::Done => {
                debug!(contest_id, "Contest already done");
                report.results = contest.results.clone();
                return Ok(report);
            }
        }

        if !contest.state.is_terminal() {
            let Some(next) = from.next() else {
                return Ok(report);
            };
            contest.state = from.transition(next)?;
            contest.updated_at = Utc::now();
            self.store.put_contest(&contest)?;
        }
        report.to = contest.state;

        info!(
            contest_id,
            from = %from,
            state = %contest.state,
            posts = report.posts_recorded,
            forfeits = report.forfeits,
            votes = report.votes_recorded,
            "Contest advanced"
        );
        Ok(report)
    }

    /// Advance until `done` and return the results.
    pub async fn run_to_completion(&self, contest_id: &str) -> EngineResult<ContestResults> {
        loop {
            let report = self.advance(contest_id).await?;
            if report.to.is_terminal() {
                return report.results.ok_or_else(|| {
                    EngineError::InvalidContest(format!("contest {contest_id} has no results"))
                });
            }
        }
    }

    /// Re-run the decision strategy over a finished contest's recorded
    /// results. Nothing is written.
    pub async fn review(&self, contest_id: &str) -> EngineResult<Decision> {
        let contest = self.load(contest_id)?;
        let Some(results) = contest.results.as_ref() else {
            return Err(EngineError::InvalidContest(format!(
                "contest {contest_id} is not resolved yet"
            )));
        };
        let board = Scoreboard {
            vote_totals: results.vote_totals,
            winning_option: results.vote_totals.winning_option(),
            tallies: results
                .tribes
                .iter()
                .map(|t| TribeTally {
                    tribe_id: t.tribe_id.clone(),
                    choice: t.choice,
                    neutral_votes: t.neutral_votes,
                    snitch_votes: t.snitch_votes,
                    outside_votes: t.outside_votes,
                    persuasion_score: t.persuasion_score,
                })
                .collect(),
        };
        let dossiers = self.dossiers(&contest)?;
        let ctx = DecisionContext::new(&contest, &dossiers, &board);
        Ok(self.strategy.decide(&ctx).await)
    }

    /// Recorded posts, ordered by round then by the contest's tribe order.
    pub fn transcript(&self, contest: &Contest) -> EngineResult<Vec<TranscriptEntry>> {
        let names: HashMap<TribeId, String> = self
            .participants(contest)?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect();
        let order = |tribe_id: &str| contest.tribe_ids.iter().position(|t| t == tribe_id);

        let mut posts = self.store.list_posts(&contest.id)?;
        posts.sort_by_key(|p| (p.round, order(&p.tribe_id)));

        Ok(posts
            .into_iter()
            .map(|p| TranscriptEntry {
                tribe_name: names.get(&p.tribe_id).cloned().unwrap_or_default(),
                tribe_id: p.tribe_id,
                round: p.round,
                message: p.message,
                choice: p.choice,
                forfeit: p.forfeit,
            })
            .collect())
    }

    fn load(&self, contest_id: &str) -> EngineResult<Contest> {
        self.store
            .get_contest(contest_id)?
            .ok_or_else(|| EngineError::ContestNotFound(contest_id.to_string()))
    }

    /// Contest tribes in contest order.
    fn participants(&self, contest: &Contest) -> EngineResult<Vec<Tribe>> {
        contest
            .tribe_ids
            .iter()
            .map(|id| {
                self.store
                    .get_tribe(id)?
                    .ok_or_else(|| EngineError::InvalidContest(format!("tribe {id} is gone")))
            })
            .collect()
    }

    fn brief(contest: &Contest) -> ContestBrief {
        ContestBrief {
            id: contest.id.clone(),
            title: contest.title.clone(),
        }
    }

    fn tribe_ref(tribe: &Tribe) -> TribeRef {
        TribeRef {
            id: tribe.id.clone(),
            name: tribe.name.clone(),
            color: tribe.color.clone(),
        }
    }

    fn round_request(
        contest: &Contest,
        tribe: &Tribe,
        tribes: &[Tribe],
        round: Round,
        transcript: Vec<TranscriptEntry>,
    ) -> CallbackRequest {
        let opponents = tribes
            .iter()
            .filter(|t| t.id != tribe.id)
            .map(Self::tribe_ref)
            .collect();
        let rules = RoundRules::for_round(round, contest.required_token());
        match round {
            Round::Round1 => CallbackRequest::Round1(Round1Request {
                joust: Self::brief(contest),
                tribe: Self::tribe_ref(tribe),
                opponents,
                transcript,
                rules,
            }),
            Round::Round2 => CallbackRequest::Round2(Round2Request {
                joust: Self::brief(contest),
                tribe: Self::tribe_ref(tribe),
                opponents,
                prompt: contest.prompt.clone(),
                transcript,
                rules,
            }),
        }
    }

    async fn call(
        &self,
        agent: &Agent,
        request: &CallbackRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallbackError> {
        tokio::time::timeout(timeout, self.channel.call(agent, request, timeout))
            .await
            .map_err(|_| CallbackError::Timeout(timeout))?
    }

    async fn run_round(
        &self,
        contest: &Contest,
        round: Round,
        report: &mut AdvanceReport,
    ) -> EngineResult<()> {
        let tribes = self.participants(contest)?;
        let token = contest.required_token();
        let timeout = self.config.callback_timeout();

        for tribe in &tribes {
            if self
                .store
                .get_post(&contest.id, &tribe.id, round)?
                .is_some()
            {
                continue;
            }

            let outcome = match self.store.get_agent(&tribe.leader_id)? {
                None => Err(Violation::Malformed(format!(
                    "leader {} is not registered",
                    tribe.leader_id
                ))),
                Some(leader) => {
                    let transcript = self.transcript(contest)?;
                    let request = Self::round_request(contest, tribe, &tribes, round, transcript);
                    debug!(
                        contest_id = %contest.id,
                        tribe_id = %tribe.id,
                        agent_id = %leader.id,
                        round = %round,
                        "Calling tribe leader"
                    );
                    let reply = self
                        .call(&leader, &request, timeout)
                        .await
                        .map_err(|source| EngineError::Callback {
                            agent_id: leader.id.clone(),
                            source,
                        })?;
                    match round {
                        Round::Round1 => rules::check_round1(&reply, &token).map(|m| (None, m)),
                        Round::Round2 => {
                            rules::check_round2(&reply, &token).map(|(c, m)| (Some(c), m))
                        }
                    }
                }
            };

            let (choice, message, forfeit) = match outcome {
                Ok((choice, message)) => (choice, message, false),
                Err(violation) => {
                    warn!(
                        contest_id = %contest.id,
                        tribe_id = %tribe.id,
                        agent_id = %tribe.leader_id,
                        round = %round,
                        reason = %violation,
                        "Round forfeited"
                    );
                    (None, rules::forfeit_message(&token), true)
                }
            };

            let post = RoundPost {
                contest_id: contest.id.clone(),
                tribe_id: tribe.id.clone(),
                round,
                agent_id: tribe.leader_id.clone(),
                message,
                choice,
                forfeit,
                created_at: Utc::now(),
            };
            if self.store.insert_post(&post)? {
                report.posts_recorded += 1;
                if forfeit {
                    report.forfeits += 1;
                }
            }
        }
        Ok(())
    }

    fn voters(&self, contest: &Contest) -> EngineResult<Vec<Agent>> {
        match self.config.vote_scope {
            VoteScope::All => Ok(self.store.list_agents()?),
            VoteScope::ContestTribes => {
                let mut voters = Vec::new();
                for tribe_id in &contest.tribe_ids {
                    for agent_id in self.store.list_members(tribe_id)? {
                        if let Some(agent) = self.store.get_agent(&agent_id)? {
                            voters.push(agent);
                        }
                    }
                }
                Ok(voters)
            }
        }
    }

    async fn poll_votes(&self, contest: &Contest, report: &mut AdvanceReport) -> EngineResult<()> {
        let timeout = self.config.vote_timeout();
        let request = CallbackRequest::Vote(VoteRequest {
            joust: Self::brief(contest),
            prompt: contest.prompt.clone(),
            transcript: self.transcript(contest)?,
        });

        for agent in self.voters(contest)? {
            if self.store.get_vote(&contest.id, &agent.id)?.is_some() {
                continue;
            }
            let reply = match self.call(&agent, &request, timeout).await {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(contest_id = %contest.id, agent_id = %agent.id, error = %e, "Vote callback failed");
                    continue;
                }
            };
            match serde_json::from_value::<VoteReply>(reply) {
                Ok(reply) => {
                    self.store
                        .put_vote(&Vote::new(&contest.id, &agent.id, reply.vote))?;
                    report.votes_recorded += 1;
                }
                Err(e) => {
                    debug!(contest_id = %contest.id, agent_id = %agent.id, error = %e, "Ignoring malformed vote");
                }
            }
        }
        Ok(())
    }

    fn dossiers(&self, contest: &Contest) -> EngineResult<Vec<TribeDossier>> {
        let posts = self.store.list_posts(&contest.id)?;
        let text = |tribe_id: &str, round: Round| {
            posts
                .iter()
                .find(|p| p.tribe_id == tribe_id && p.round == round && !p.forfeit)
        };
        Ok(self
            .participants(contest)?
            .into_iter()
            .map(|tribe| {
                let round1 = text(&tribe.id, Round::Round1);
                let round2 = text(&tribe.id, Round::Round2);
                TribeDossier {
                    round1_text: round1.map(|p| p.message.clone()),
                    round2_choice: round2.and_then(|p| p.choice),
                    round2_text: round2.map(|p| p.message.clone()),
                    id: tribe.id,
                    name: tribe.name,
                    color: tribe.color,
                    infamy: tribe.infamy,
                    wins: tribe.wins,
                    losses: tribe.losses,
                }
            })
            .collect())
    }

    /// Score, decide and resolve, then hand standings, conquest and the
    /// finished contest to the store as one settlement.
    ///
    /// Nothing is written before the settlement, so a failed settle leaves
    /// membership and infamy untouched and the next advance starts over.
    async fn settle(&self, contest: &Contest) -> EngineResult<Contest> {
        let dossiers = self.dossiers(contest)?;
        let choices: Vec<TribeChoice> = dossiers
            .iter()
            .map(|d| TribeChoice {
                tribe_id: d.id.clone(),
                choice: d.round2_choice,
            })
            .collect();

        let mut votes = Vec::new();
        for vote in self.store.list_votes(&contest.id)? {
            votes.push(CastVote {
                voter_tribe: self.store.tribe_of(&vote.agent_id)?,
                agent_id: vote.agent_id,
                choice: vote.choice,
            });
        }

        let board = score(&choices, &votes);
        let ctx = DecisionContext::new(contest, &dossiers, &board);
        let decision = self.strategy.decide(&ctx).await;

        let infamy: HashMap<TribeId, i64> =
            dossiers.iter().map(|d| (d.id.clone(), d.infamy)).collect();
        let resolution = resolve(&board, &infamy, decision.forced_winner.as_deref());

        let mut done = contest.clone();
        done.state = contest.state.transition(ContestState::Done)?;
        done.updated_at = Utc::now();
        done.results = Some(ContestResults {
            vote_totals: board.vote_totals,
            winning_option: resolution.winning_option,
            winner_tribe_id: resolution.winner_tribe_id.clone(),
            tribes: resolution.tribes.clone(),
            decision: decision.meta,
            migration: Migration::default(),
            resolved_at: Utc::now(),
        });
        let settlement = Settlement {
            contest: done,
            standings: conquest::standings(&resolution),
            conqueror: resolution.winner_tribe_id.clone(),
        };
        let settled = self.store.settle_contest(&settlement)?;

        if let Some(results) = &settled.results {
            info!(
                contest_id = %contest.id,
                winner_tribe_id = results.winner_tribe_id.as_deref().unwrap_or("none"),
                rule = resolution.rule.map_or("none", |r| r.as_str()),
                votes_a = results.vote_totals.a,
                votes_b = results.vote_totals.b,
                decision = %results.decision.mode,
                fallback = results.decision.fallback,
                moved = results.migration.moved_total,
                "Contest resolved"
            );
        }
        Ok(settled)
    }
}
