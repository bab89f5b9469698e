//! In-memory store backend
//!
//! Everything lives behind one `RwLock`, so every trait method, including
//! the standing updates, is atomic with respect to every other.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::types::*;
use super::{JoustStore, Settlement, SharedStore, StoreError, StoreResult, TribeStanding};
use crate::conquest;

#[derive(Default)]
struct Inner {
    agents: BTreeMap<AgentId, Agent>,
    tribes: BTreeMap<TribeId, Tribe>,
    /// agent -> tribe
    memberships: BTreeMap<AgentId, TribeId>,
    contests: BTreeMap<ContestId, Contest>,
    posts: BTreeMap<(ContestId, TribeId, Round), RoundPost>,
    votes: BTreeMap<(ContestId, AgentId), Vote>,
}

impl Inner {
    fn members(&self, tribe_id: &str) -> Vec<AgentId> {
        self.memberships
            .iter()
            .filter(|(_, t)| t.as_str() == tribe_id)
            .map(|(a, _)| a.clone())
            .collect()
    }

    fn apply_standing(&mut self, standing: &TribeStanding) -> StoreResult<Vec<AgentId>> {
        if !self.tribes.contains_key(&standing.tribe_id) {
            return Err(StoreError::NotFound(format!("tribe {}", standing.tribe_id)));
        }

        // Members missing from the agent table are skipped.
        let members: Vec<AgentId> = self
            .members(&standing.tribe_id)
            .into_iter()
            .filter(|id| self.agents.contains_key(id))
            .collect();

        if let Some(tribe) = self.tribes.get_mut(&standing.tribe_id) {
            tribe.apply(standing.delta, standing.outcome);
        }
        for id in &members {
            if let Some(agent) = self.agents.get_mut(id) {
                agent.apply(standing.member_delta, standing.outcome);
            }
        }
        Ok(members)
    }
}

/// Store backend holding all state in process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl JoustStore for MemoryStore {
    fn put_agent(&self, agent: &Agent) -> StoreResult<()> {
        self.write()?.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    fn get_agent(&self, agent_id: &str) -> StoreResult<Option<Agent>> {
        Ok(self.read()?.agents.get(agent_id).cloned())
    }

    fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        Ok(self.read()?.agents.values().cloned().collect())
    }

    fn put_tribe(&self, tribe: &Tribe) -> StoreResult<()> {
        self.write()?.tribes.insert(tribe.id.clone(), tribe.clone());
        Ok(())
    }

    fn get_tribe(&self, tribe_id: &str) -> StoreResult<Option<Tribe>> {
        Ok(self.read()?.tribes.get(tribe_id).cloned())
    }

    fn list_tribes(&self) -> StoreResult<Vec<Tribe>> {
        Ok(self.read()?.tribes.values().cloned().collect())
    }

    fn add_member(&self, tribe_id: &str, agent_id: &str) -> StoreResult<()> {
        let mut inner = self.write()?;
        if let Some(existing) = inner.memberships.get(agent_id) {
            return Err(StoreError::AlreadyMember {
                agent_id: agent_id.to_string(),
                tribe_id: existing.clone(),
            });
        }
        inner
            .memberships
            .insert(agent_id.to_string(), tribe_id.to_string());
        Ok(())
    }

    fn remove_member(&self, tribe_id: &str, agent_id: &str) -> StoreResult<()> {
        let mut inner = self.write()?;
        let is_member = inner
            .memberships
            .get(agent_id)
            .is_some_and(|t| t == tribe_id);
        if !is_member {
            return Err(StoreError::NotMember {
                agent_id: agent_id.to_string(),
                tribe_id: tribe_id.to_string(),
            });
        }
        inner.memberships.remove(agent_id);
        Ok(())
    }

    fn transfer_member(&self, agent_id: &str, from: &str, to: &str) -> StoreResult<()> {
        let mut inner = self.write()?;
        match inner.memberships.get_mut(agent_id) {
            Some(t) if t.as_str() == from => {
                *t = to.to_string();
                Ok(())
            }
            _ => Err(StoreError::NotMember {
                agent_id: agent_id.to_string(),
                tribe_id: from.to_string(),
            }),
        }
    }

    fn list_members(&self, tribe_id: &str) -> StoreResult<Vec<AgentId>> {
        Ok(self.read()?.members(tribe_id))
    }

    fn tribe_of(&self, agent_id: &str) -> StoreResult<Option<TribeId>> {
        Ok(self.read()?.memberships.get(agent_id).cloned())
    }

    fn put_contest(&self, contest: &Contest) -> StoreResult<()> {
        self.write()?
            .contests
            .insert(contest.id.clone(), contest.clone());
        Ok(())
    }

    fn get_contest(&self, contest_id: &str) -> StoreResult<Option<Contest>> {
        Ok(self.read()?.contests.get(contest_id).cloned())
    }

    fn list_contests(&self) -> StoreResult<Vec<Contest>> {
        let mut contests: Vec<Contest> = self.read()?.contests.values().cloned().collect();
        contests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(contests)
    }

    fn insert_post(&self, post: &RoundPost) -> StoreResult<bool> {
        let mut inner = self.write()?;
        let key = (post.contest_id.clone(), post.tribe_id.clone(), post.round);
        if inner.posts.contains_key(&key) {
            return Ok(false);
        }
        inner.posts.insert(key, post.clone());
        Ok(true)
    }

    fn get_post(
        &self,
        contest_id: &str,
        tribe_id: &str,
        round: Round,
    ) -> StoreResult<Option<RoundPost>> {
        let key = (contest_id.to_string(), tribe_id.to_string(), round);
        Ok(self.read()?.posts.get(&key).cloned())
    }

    fn list_posts(&self, contest_id: &str) -> StoreResult<Vec<RoundPost>> {
        Ok(self
            .read()?
            .posts
            .values()
            .filter(|p| p.contest_id == contest_id)
            .cloned()
            .collect())
    }

    fn put_vote(&self, vote: &Vote) -> StoreResult<()> {
        let key = (vote.contest_id.clone(), vote.agent_id.clone());
        self.write()?.votes.insert(key, vote.clone());
        Ok(())
    }

    fn get_vote(&self, contest_id: &str, agent_id: &str) -> StoreResult<Option<Vote>> {
        let key = (contest_id.to_string(), agent_id.to_string());
        Ok(self.read()?.votes.get(&key).cloned())
    }

    fn list_votes(&self, contest_id: &str) -> StoreResult<Vec<Vote>> {
        Ok(self
            .read()?
            .votes
            .values()
            .filter(|v| v.contest_id == contest_id)
            .cloned()
            .collect())
    }

    fn apply_agent_delta(
        &self,
        agent_id: &str,
        delta: i64,
        outcome: Outcome,
    ) -> StoreResult<Agent> {
        let mut inner = self.write()?;
        let agent = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| StoreError::NotFound(format!("agent {agent_id}")))?;
        agent.apply(delta, outcome);
        Ok(agent.clone())
    }

    fn apply_tribe_delta(
        &self,
        tribe_id: &str,
        delta: i64,
        outcome: Outcome,
    ) -> StoreResult<Tribe> {
        let mut inner = self.write()?;
        let tribe = inner
            .tribes
            .get_mut(tribe_id)
            .ok_or_else(|| StoreError::NotFound(format!("tribe {tribe_id}")))?;
        tribe.apply(delta, outcome);
        Ok(tribe.clone())
    }

    fn apply_tribe_standing(&self, standing: &TribeStanding) -> StoreResult<Vec<AgentId>> {
        self.write()?.apply_standing(standing)
    }

    fn settle_contest(&self, settlement: &Settlement) -> StoreResult<Contest> {
        let mut inner = self.write()?;
        let contest_id = &settlement.contest.id;
        if let Some(stored) = inner.contests.get(contest_id) {
            if stored.state.is_terminal() {
                return Ok(stored.clone());
            }
        }

        // Check every tribe before touching anything.
        let tribes = settlement
            .standings
            .iter()
            .map(|s| &s.tribe_id)
            .chain(settlement.conqueror.as_ref());
        for tribe_id in tribes {
            if !inner.tribes.contains_key(tribe_id) {
                return Err(StoreError::NotFound(format!("tribe {tribe_id}")));
            }
        }

        for standing in &settlement.standings {
            inner.apply_standing(standing)?;
        }

        let (transfers, migration) = conquest::plan_migration(
            &settlement.contest.tribe_ids,
            settlement.conqueror.as_deref(),
            |tribe_id| Ok(inner.members(tribe_id)),
        )?;
        if let Some(conqueror) = &settlement.conqueror {
            for transfer in transfers {
                inner.memberships.insert(transfer.agent_id, conqueror.clone());
            }
        }

        let mut contest = settlement.contest.clone();
        if let Some(results) = contest.results.as_mut() {
            results.migration = migration;
        }
        inner.contests.insert(contest_id.clone(), contest.clone());
        Ok(contest)
    }
}
