//! Shared fixtures for engine integration tests: an in-memory arena and a
//! scripted callback channel that records every call.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use joust::callback::{CallbackChannel, CallbackError, CallbackRequest};
use joust::config::{JoustConfig, VoteScope};
use joust::decision::{RulesStrategy, SharedStrategy};
use joust::store::{
    Agent, AgentId, Choice, Contest, Endpoint, JoustStore, MemoryStore, Outcome, Prompt, Round,
    RoundPost, Settlement, SharedStore, StoreError, StoreResult, Tribe, TribeId, TribeStanding,
    Vote,
};
use joust::JoustEngine;

/// One recorded callback: agent id, wire type and round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub agent_id: String,
    pub kind: &'static str,
    pub round: Option<Round>,
}

/// Channel answering from per-agent scripts.
///
/// Agents without a script for a round reply `null` (a forfeit); agents
/// without a vote script fail the vote callback.
#[derive(Default)]
pub struct ScriptedChannel {
    round1: Mutex<HashMap<String, Value>>,
    round2: Mutex<HashMap<String, Value>>,
    votes: Mutex<HashMap<String, Choice>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn round1(&self, agent_id: &str, message: &str) {
        self.round1
            .lock()
            .unwrap()
            .insert(agent_id.into(), json!({ "message": message }));
    }

    pub fn round2(&self, agent_id: &str, choice: Choice, message: &str) {
        self.round2
            .lock()
            .unwrap()
            .insert(agent_id.into(), json!({ "choice": choice, "message": message }));
    }

    pub fn raw_round2(&self, agent_id: &str, reply: Value) {
        self.round2.lock().unwrap().insert(agent_id.into(), reply);
    }

    pub fn vote(&self, agent_id: &str, choice: Choice) {
        self.votes.lock().unwrap().insert(agent_id.into(), choice);
    }

    /// The next call to `agent_id` fails with a transport error.
    pub fn fail_next(&self, agent_id: &str) {
        self.failing.lock().unwrap().insert(agent_id.into());
    }

    /// The next call to `agent_id` never answers.
    pub fn hang_next(&self, agent_id: &str) {
        self.hanging.lock().unwrap().insert(agent_id.into());
    }

    pub fn slow(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, agent_id: &str, round: Option<Round>) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.agent_id == agent_id && c.round == round)
            .count()
    }
}

#[async_trait]
impl CallbackChannel for ScriptedChannel {
    async fn call(
        &self,
        agent: &Agent,
        request: &CallbackRequest,
        _timeout: Duration,
    ) -> Result<Value, CallbackError> {
        self.calls.lock().unwrap().push(Call {
            agent_id: agent.id.clone(),
            kind: request.kind(),
            round: request.round(),
        });

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let hang = self.hanging.lock().unwrap().remove(&agent.id);
        if hang {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }

        if self.failing.lock().unwrap().remove(&agent.id) {
            return Err(CallbackError::Transport("connection refused".into()));
        }

        let reply = match request {
            CallbackRequest::Round1(_) => self.round1.lock().unwrap().get(&agent.id).cloned(),
            CallbackRequest::Round2(_) => self.round2.lock().unwrap().get(&agent.id).cloned(),
            CallbackRequest::Vote(_) => {
                let vote = self.votes.lock().unwrap().get(&agent.id).copied();
                match vote {
                    Some(choice) => Some(json!({ "vote": choice })),
                    None => return Err(CallbackError::Transport("no vote scripted".into())),
                }
            }
        };
        Ok(reply.unwrap_or(Value::Null))
    }
}

/// Memory store whose next `n` settlements fail before writing anything.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    failing_settles: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, failing_settles: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_settles: AtomicUsize::new(failing_settles),
        })
    }
}

impl JoustStore for FlakyStore {
    fn put_agent(&self, agent: &Agent) -> StoreResult<()> {
        self.inner.put_agent(agent)
    }
    fn get_agent(&self, agent_id: &str) -> StoreResult<Option<Agent>> {
        self.inner.get_agent(agent_id)
    }
    fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        self.inner.list_agents()
    }
    fn put_tribe(&self, tribe: &Tribe) -> StoreResult<()> {
        self.inner.put_tribe(tribe)
    }
    fn get_tribe(&self, tribe_id: &str) -> StoreResult<Option<Tribe>> {
        self.inner.get_tribe(tribe_id)
    }
    fn list_tribes(&self) -> StoreResult<Vec<Tribe>> {
        self.inner.list_tribes()
    }
    fn add_member(&self, tribe_id: &str, agent_id: &str) -> StoreResult<()> {
        self.inner.add_member(tribe_id, agent_id)
    }
    fn remove_member(&self, tribe_id: &str, agent_id: &str) -> StoreResult<()> {
        self.inner.remove_member(tribe_id, agent_id)
    }
    fn transfer_member(&self, agent_id: &str, from: &str, to: &str) -> StoreResult<()> {
        self.inner.transfer_member(agent_id, from, to)
    }
    fn list_members(&self, tribe_id: &str) -> StoreResult<Vec<AgentId>> {
        self.inner.list_members(tribe_id)
    }
    fn tribe_of(&self, agent_id: &str) -> StoreResult<Option<TribeId>> {
        self.inner.tribe_of(agent_id)
    }
    fn put_contest(&self, contest: &Contest) -> StoreResult<()> {
        self.inner.put_contest(contest)
    }
    fn get_contest(&self, contest_id: &str) -> StoreResult<Option<Contest>> {
        self.inner.get_contest(contest_id)
    }
    fn list_contests(&self) -> StoreResult<Vec<Contest>> {
        self.inner.list_contests()
    }
    fn insert_post(&self, post: &RoundPost) -> StoreResult<bool> {
        self.inner.insert_post(post)
    }
    fn get_post(
        &self,
        contest_id: &str,
        tribe_id: &str,
        round: Round,
    ) -> StoreResult<Option<RoundPost>> {
        self.inner.get_post(contest_id, tribe_id, round)
    }
    fn list_posts(&self, contest_id: &str) -> StoreResult<Vec<RoundPost>> {
        self.inner.list_posts(contest_id)
    }
    fn put_vote(&self, vote: &Vote) -> StoreResult<()> {
        self.inner.put_vote(vote)
    }
    fn get_vote(&self, contest_id: &str, agent_id: &str) -> StoreResult<Option<Vote>> {
        self.inner.get_vote(contest_id, agent_id)
    }
    fn list_votes(&self, contest_id: &str) -> StoreResult<Vec<Vote>> {
        self.inner.list_votes(contest_id)
    }
    fn apply_agent_delta(&self, agent_id: &str, delta: i64, outcome: Outcome) -> StoreResult<Agent> {
        self.inner.apply_agent_delta(agent_id, delta, outcome)
    }
    fn apply_tribe_delta(&self, tribe_id: &str, delta: i64, outcome: Outcome) -> StoreResult<Tribe> {
        self.inner.apply_tribe_delta(tribe_id, delta, outcome)
    }
    fn apply_tribe_standing(&self, standing: &TribeStanding) -> StoreResult<Vec<AgentId>> {
        self.inner.apply_tribe_standing(standing)
    }
    fn settle_contest(&self, settlement: &Settlement) -> StoreResult<Contest> {
        let fail = self
            .failing_settles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StoreError::Serialization("disk full".into()));
        }
        self.inner.settle_contest(settlement)
    }
}

/// In-memory arena with tribes and agents.
pub struct Arena {
    pub store: Arc<MemoryStore>,
    pub channel: Arc<ScriptedChannel>,
}

impl Arena {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            channel: ScriptedChannel::new(),
        }
    }

    pub fn agent(&self, id: &str) {
        self.store
            .put_agent(&Agent::new(id, id.to_uppercase(), Endpoint::Synthetic))
            .unwrap();
    }

    /// Register a tribe led by `members[0]`, creating its agents.
    pub fn tribe(&self, id: &str, members: &[&str]) {
        for member in members {
            self.agent(member);
        }
        self.store
            .put_tribe(&Tribe::new(id, format!("Tribe {id}"), "#334455", members[0]))
            .unwrap();
        for member in members {
            self.store.add_member(id, member).unwrap();
        }
    }

    pub fn config(scope: VoteScope) -> JoustConfig {
        JoustConfig {
            callback_timeout_ms: 2_000,
            vote_scope: scope,
            ..JoustConfig::default()
        }
    }

    pub fn engine(&self) -> JoustEngine {
        self.engine_with(Arc::new(RulesStrategy), Self::config(VoteScope::All))
    }

    pub fn engine_with(&self, strategy: SharedStrategy, config: JoustConfig) -> JoustEngine {
        JoustEngine::new(self.store.clone(), self.channel.clone(), strategy, config)
    }

    /// Rules engine over another view of this arena's store.
    pub fn engine_on(&self, store: SharedStore, config: JoustConfig) -> JoustEngine {
        JoustEngine::new(store, self.channel.clone(), Arc::new(RulesStrategy), config)
    }

    /// Create a draft contest over `tribes`.
    pub fn contest(&self, engine: &JoustEngine, tribes: &[&str]) -> Contest {
        engine
            .create_contest(Contest::new(
                "Lunch",
                Prompt::new("Soup or salad?", "Soup", "Salad"),
                tribes.iter().map(|t| t.to_string()).collect(),
            ))
            .unwrap()
    }
}
