//! RocksDB-backed store
//!
//! Provides persistent storage with column families for logical data separation.
//! Uses bincode for compact binary values. Read-modify-write operations take
//! the write half of the database lock and commit through a single
//! `WriteBatch`, which gives them the same atomicity as [`super::MemoryStore`].

use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, keys, ALL_CFS};
use super::types::*;
use super::{JoustStore, Settlement, SharedStore, StoreError, StoreResult, TribeStanding};
use crate::conquest;

/// RocksDB-backed persistent store
pub struct RocksStore {
    db: RwLock<DB>,
    path: PathBuf,
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Deserialization(e.to_string()))
}

fn cf<'a>(db: &'a DB, name: &str) -> StoreResult<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::ColumnFamilyNotFound(name.to_string()))
}

fn get<T: DeserializeOwned>(db: &DB, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
    match db.get_cf(cf(db, cf_name)?, key.as_bytes())? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

fn put<T: Serialize>(db: &DB, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
    db.put_cf(cf(db, cf_name)?, key.as_bytes(), encode(value)?)?;
    Ok(())
}

/// All values under a key prefix, in key order.
fn scan<T: DeserializeOwned>(db: &DB, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
    let mut values = Vec::new();
    for item in db.prefix_iterator_cf(cf(db, cf_name)?, prefix.as_bytes()) {
        let (key, value) = item?;
        if !key.starts_with(prefix.as_bytes()) {
            break; // Prefix no longer matches
        }
        values.push(decode(&value)?);
    }
    Ok(values)
}

/// All (key, value) pairs under a key prefix.
fn scan_keyed<T: DeserializeOwned>(
    db: &DB,
    cf_name: &str,
    prefix: &str,
) -> StoreResult<Vec<(String, T)>> {
    let mut pairs = Vec::new();
    for item in db.prefix_iterator_cf(cf(db, cf_name)?, prefix.as_bytes()) {
        let (key, value) = item?;
        if !key.starts_with(prefix.as_bytes()) {
            break;
        }
        let key = String::from_utf8(key.to_vec())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        pairs.push((key, decode(&value)?));
    }
    Ok(pairs)
}

fn members_of(db: &DB, tribe_id: &str) -> StoreResult<Vec<AgentId>> {
    let prefix = keys::member("");
    let mut members: Vec<AgentId> = scan_keyed::<TribeId>(db, schema::CF_MEMBERS, &prefix)?
        .into_iter()
        .filter(|(_, tribe)| tribe == tribe_id)
        .map(|(key, _)| key[prefix.len()..].to_string())
        .collect();
    members.sort();
    Ok(members)
}

/// Add a tribe's standing and its members' shares to `batch`.
fn stage_standing(
    db: &DB,
    batch: &mut WriteBatch,
    standing: &TribeStanding,
) -> StoreResult<Vec<AgentId>> {
    let tribe_key = keys::tribe(&standing.tribe_id);
    let mut tribe: Tribe = get(db, schema::CF_TRIBES, &tribe_key)?
        .ok_or_else(|| StoreError::NotFound(format!("tribe {}", standing.tribe_id)))?;
    tribe.apply(standing.delta, standing.outcome);
    batch.put_cf(cf(db, schema::CF_TRIBES)?, tribe_key.as_bytes(), encode(&tribe)?);

    let mut touched = Vec::new();
    for agent_id in members_of(db, &standing.tribe_id)? {
        let key = keys::agent(&agent_id);
        // Members missing from the agent table are skipped.
        let Some(mut agent) = get::<Agent>(db, schema::CF_AGENTS, &key)? else {
            continue;
        };
        agent.apply(standing.member_delta, standing.outcome);
        batch.put_cf(cf(db, schema::CF_AGENTS)?, key.as_bytes(), encode(&agent)?);
        touched.push(agent_id);
    }
    Ok(touched)
}

impl RocksStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, DB>> {
        self.db.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, DB>> {
        self.db.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl JoustStore for RocksStore {
    fn put_agent(&self, agent: &Agent) -> StoreResult<()> {
        let db = self.write()?;
        put(&db, schema::CF_AGENTS, &keys::agent(&agent.id), agent)
    }

    fn get_agent(&self, agent_id: &str) -> StoreResult<Option<Agent>> {
        let db = self.read()?;
        get(&db, schema::CF_AGENTS, &keys::agent(agent_id))
    }

    fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        let db = self.read()?;
        scan(&db, schema::CF_AGENTS, &keys::agent(""))
    }

    fn put_tribe(&self, tribe: &Tribe) -> StoreResult<()> {
        let db = self.write()?;
        put(&db, schema::CF_TRIBES, &keys::tribe(&tribe.id), tribe)
    }

    fn get_tribe(&self, tribe_id: &str) -> StoreResult<Option<Tribe>> {
        let db = self.read()?;
        get(&db, schema::CF_TRIBES, &keys::tribe(tribe_id))
    }

    fn list_tribes(&self) -> StoreResult<Vec<Tribe>> {
        let db = self.read()?;
        scan(&db, schema::CF_TRIBES, &keys::tribe(""))
    }

    fn add_member(&self, tribe_id: &str, agent_id: &str) -> StoreResult<()> {
        let db = self.write()?;
        let key = keys::member(agent_id);
        if let Some(existing) = get::<TribeId>(&db, schema::CF_MEMBERS, &key)? {
            return Err(StoreError::AlreadyMember {
                agent_id: agent_id.to_string(),
                tribe_id: existing,
            });
        }
        put(&db, schema::CF_MEMBERS, &key, &tribe_id.to_string())
    }

    fn remove_member(&self, tribe_id: &str, agent_id: &str) -> StoreResult<()> {
        let db = self.write()?;
        let key = keys::member(agent_id);
        match get::<TribeId>(&db, schema::CF_MEMBERS, &key)? {
            Some(current) if current == tribe_id => {
                db.delete_cf(cf(&db, schema::CF_MEMBERS)?, key.as_bytes())?;
                Ok(())
            }
            _ => Err(StoreError::NotMember {
                agent_id: agent_id.to_string(),
                tribe_id: tribe_id.to_string(),
            }),
        }
    }

    fn transfer_member(&self, agent_id: &str, from: &str, to: &str) -> StoreResult<()> {
        let db = self.write()?;
        let key = keys::member(agent_id);
        match get::<TribeId>(&db, schema::CF_MEMBERS, &key)? {
            Some(current) if current == from => {
                put(&db, schema::CF_MEMBERS, &key, &to.to_string())
            }
            _ => Err(StoreError::NotMember {
                agent_id: agent_id.to_string(),
                tribe_id: from.to_string(),
            }),
        }
    }

    fn list_members(&self, tribe_id: &str) -> StoreResult<Vec<AgentId>> {
        let db = self.read()?;
        members_of(&db, tribe_id)
    }

    fn tribe_of(&self, agent_id: &str) -> StoreResult<Option<TribeId>> {
        let db = self.read()?;
        get(&db, schema::CF_MEMBERS, &keys::member(agent_id))
    }

    fn put_contest(&self, contest: &Contest) -> StoreResult<()> {
        let db = self.write()?;
        put(&db, schema::CF_CONTESTS, &keys::contest(&contest.id), contest)
    }

    fn get_contest(&self, contest_id: &str) -> StoreResult<Option<Contest>> {
        let db = self.read()?;
        get(&db, schema::CF_CONTESTS, &keys::contest(contest_id))
    }

    fn list_contests(&self) -> StoreResult<Vec<Contest>> {
        let db = self.read()?;
        let mut contests: Vec<Contest> = scan(&db, schema::CF_CONTESTS, &keys::contest(""))?;
        contests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(contests)
    }

    fn insert_post(&self, post: &RoundPost) -> StoreResult<bool> {
        let db = self.write()?;
        let key = keys::post(&post.contest_id, &post.tribe_id, post.round);
        if db.get_cf(cf(&db, schema::CF_POSTS)?, key.as_bytes())?.is_some() {
            return Ok(false);
        }
        put(&db, schema::CF_POSTS, &key, post)?;
        Ok(true)
    }

    fn get_post(
        &self,
        contest_id: &str,
        tribe_id: &str,
        round: Round,
    ) -> StoreResult<Option<RoundPost>> {
        let db = self.read()?;
        get(&db, schema::CF_POSTS, &keys::post(contest_id, tribe_id, round))
    }

    fn list_posts(&self, contest_id: &str) -> StoreResult<Vec<RoundPost>> {
        let db = self.read()?;
        scan(&db, schema::CF_POSTS, &keys::posts_of(contest_id))
    }

    fn put_vote(&self, vote: &Vote) -> StoreResult<()> {
        let db = self.write()?;
        put(
            &db,
            schema::CF_VOTES,
            &keys::vote(&vote.contest_id, &vote.agent_id),
            vote,
        )
    }

    fn get_vote(&self, contest_id: &str, agent_id: &str) -> StoreResult<Option<Vote>> {
        let db = self.read()?;
        get(&db, schema::CF_VOTES, &keys::vote(contest_id, agent_id))
    }

    fn list_votes(&self, contest_id: &str) -> StoreResult<Vec<Vote>> {
        let db = self.read()?;
        scan(&db, schema::CF_VOTES, &keys::votes_of(contest_id))
    }

    fn apply_agent_delta(
        &self,
        agent_id: &str,
        delta: i64,
        outcome: Outcome,
    ) -> StoreResult<Agent> {
        let db = self.write()?;
        let key = keys::agent(agent_id);
        let mut agent: Agent = get(&db, schema::CF_AGENTS, &key)?
            .ok_or_else(|| StoreError::NotFound(format!("agent {agent_id}")))?;
        agent.apply(delta, outcome);
        put(&db, schema::CF_AGENTS, &key, &agent)?;
        Ok(agent)
    }

    fn apply_tribe_delta(
        &self,
        tribe_id: &str,
        delta: i64,
        outcome: Outcome,
    ) -> StoreResult<Tribe> {
        let db = self.write()?;
        let key = keys::tribe(tribe_id);
        let mut tribe: Tribe = get(&db, schema::CF_TRIBES, &key)?
            .ok_or_else(|| StoreError::NotFound(format!("tribe {tribe_id}")))?;
        tribe.apply(delta, outcome);
        put(&db, schema::CF_TRIBES, &key, &tribe)?;
        Ok(tribe)
    }

    fn apply_tribe_standing(&self, standing: &TribeStanding) -> StoreResult<Vec<AgentId>> {
        let db = self.write()?;
        let mut batch = WriteBatch::default();
        let touched = stage_standing(&db, &mut batch, standing)?;
        db.write(batch)?;
        Ok(touched)
    }

    fn settle_contest(&self, settlement: &Settlement) -> StoreResult<Contest> {
        let db = self.write()?;
        let contest_key = keys::contest(&settlement.contest.id);
        if let Some(stored) = get::<Contest>(&db, schema::CF_CONTESTS, &contest_key)? {
            if stored.state.is_terminal() {
                return Ok(stored);
            }
        }
        if let Some(conqueror) = &settlement.conqueror {
            if get::<Tribe>(&db, schema::CF_TRIBES, &keys::tribe(conqueror))?.is_none() {
                return Err(StoreError::NotFound(format!("tribe {conqueror}")));
            }
        }

        // Staging reads the committed state, so every standing sees the
        // membership from before the conquest.
        let mut batch = WriteBatch::default();
        for standing in &settlement.standings {
            stage_standing(&db, &mut batch, standing)?;
        }

        let (transfers, migration) = conquest::plan_migration(
            &settlement.contest.tribe_ids,
            settlement.conqueror.as_deref(),
            |tribe_id| members_of(&db, tribe_id),
        )?;
        if let Some(conqueror) = &settlement.conqueror {
            for transfer in &transfers {
                batch.put_cf(
                    cf(&db, schema::CF_MEMBERS)?,
                    keys::member(&transfer.agent_id).as_bytes(),
                    encode(conqueror)?,
                );
            }
        }

        let mut contest = settlement.contest.clone();
        if let Some(results) = contest.results.as_mut() {
            results.migration = migration;
        }
        batch.put_cf(
            cf(&db, schema::CF_CONTESTS)?,
            contest_key.as_bytes(),
            encode(&contest)?,
        );

        db.write(batch)?;
        Ok(contest)
    }
}
