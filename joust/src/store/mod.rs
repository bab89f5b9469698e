//! Persistence for agents, tribes, contests, round posts and votes
//!
//! The engine only talks to the [`JoustStore`] trait. Two backends implement
//! it with identical semantics:
//!
//! - [`MemoryStore`]: a single `RwLock`-guarded map set, the default
//! - `RocksStore`: RocksDB column families with bincode values, behind the
//!   `rocksdb-store` feature
//!
//! # Semantics every backend honours
//!
//! - an agent belongs to at most one tribe at a time
//! - a round post is written at most once per (contest, tribe, round);
//!   [`JoustStore::insert_post`] reports whether it wrote
//! - votes are keyed by (contest, agent), latest write wins
//! - [`JoustStore::apply_tribe_standing`] updates a tribe and all of its
//!   current members in one atomic step
//! - [`JoustStore::settle_contest`] writes every standing, the conquest and
//!   the finished contest in one atomic step, and does nothing for a contest
//!   that is already stored as done
//!
//! # Usage
//!
//! ```ignore
//! use joust::store::{JoustStore, MemoryStore};
//!
//! let store = MemoryStore::new().shared();
//! store.put_agent(&agent)?;
//! store.put_tribe(&tribe)?;
//! store.add_member(&tribe.id, &agent.id)?;
//! ```

pub mod memory;
#[cfg(feature = "rocksdb-store")]
pub mod rocks;
#[cfg(feature = "rocksdb-store")]
pub mod schema;
pub mod types;

use std::sync::Arc;

pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-store")]
pub use rocks::RocksStore;
pub use types::{
    Agent, AgentId, Choice, Contest, ContestId, ContestResults, DecisionMeta, DecisionMode,
    Endpoint, Migration, Outcome, Prompt, Round, RoundPost, Tribe, TribeId, TribeResult, Vote,
    VoteTotals,
};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "rocksdb-store")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Agent {agent_id} already belongs to tribe {tribe_id}")]
    AlreadyMember { agent_id: AgentId, tribe_id: TribeId },

    #[error("Agent {agent_id} is not a member of tribe {tribe_id}")]
    NotMember { agent_id: AgentId, tribe_id: TribeId },

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to any store backend
pub type SharedStore = Arc<dyn JoustStore>;

/// A tribe's settlement for one contest: its own delta plus the share each
/// current member receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TribeStanding {
    pub tribe_id: TribeId,
    pub delta: i64,
    pub member_delta: i64,
    pub outcome: Outcome,
}

/// Everything a resolved contest writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    /// The contest as stored once settled: state `done`, results set. The
    /// store fills in `results.migration`.
    pub contest: Contest,
    pub standings: Vec<TribeStanding>,
    /// Tribe absorbing the members of every other contest tribe.
    pub conqueror: Option<TribeId>,
}

/// Storage operations the joust engine requires
pub trait JoustStore: Send + Sync {
    // Agents
    fn put_agent(&self, agent: &Agent) -> StoreResult<()>;
    fn get_agent(&self, agent_id: &str) -> StoreResult<Option<Agent>>;
    fn list_agents(&self) -> StoreResult<Vec<Agent>>;

    // Tribes
    fn put_tribe(&self, tribe: &Tribe) -> StoreResult<()>;
    fn get_tribe(&self, tribe_id: &str) -> StoreResult<Option<Tribe>>;
    fn list_tribes(&self) -> StoreResult<Vec<Tribe>>;

    // Membership
    /// Add an agent that belongs to no tribe yet.
    fn add_member(&self, tribe_id: &str, agent_id: &str) -> StoreResult<()>;
    fn remove_member(&self, tribe_id: &str, agent_id: &str) -> StoreResult<()>;
    /// Move an agent from one tribe to another in one step.
    fn transfer_member(&self, agent_id: &str, from: &str, to: &str) -> StoreResult<()>;
    /// Member ids of a tribe, sorted.
    fn list_members(&self, tribe_id: &str) -> StoreResult<Vec<AgentId>>;
    fn tribe_of(&self, agent_id: &str) -> StoreResult<Option<TribeId>>;

    // Contests
    fn put_contest(&self, contest: &Contest) -> StoreResult<()>;
    fn get_contest(&self, contest_id: &str) -> StoreResult<Option<Contest>>;
    fn list_contests(&self) -> StoreResult<Vec<Contest>>;

    // Round posts
    /// Write a post unless one already exists for its key. Returns whether it wrote.
    fn insert_post(&self, post: &RoundPost) -> StoreResult<bool>;
    fn get_post(
        &self,
        contest_id: &str,
        tribe_id: &str,
        round: Round,
    ) -> StoreResult<Option<RoundPost>>;
    fn list_posts(&self, contest_id: &str) -> StoreResult<Vec<RoundPost>>;

    // Votes
    fn put_vote(&self, vote: &Vote) -> StoreResult<()>;
    fn get_vote(&self, contest_id: &str, agent_id: &str) -> StoreResult<Option<Vote>>;
    fn list_votes(&self, contest_id: &str) -> StoreResult<Vec<Vote>>;

    // Standings
    fn apply_agent_delta(&self, agent_id: &str, delta: i64, outcome: Outcome)
        -> StoreResult<Agent>;
    fn apply_tribe_delta(&self, tribe_id: &str, delta: i64, outcome: Outcome)
        -> StoreResult<Tribe>;
    /// Apply a tribe's delta and its members' share atomically.
    /// Returns the member ids that were updated.
    fn apply_tribe_standing(&self, standing: &TribeStanding) -> StoreResult<Vec<AgentId>>;

    /// Apply a settlement atomically and return the stored contest.
    ///
    /// Standings are applied to the members a tribe had before the conquest.
    /// A contest already stored as done is returned unchanged.
    fn settle_contest(&self, settlement: &Settlement) -> StoreResult<Contest>;
}
