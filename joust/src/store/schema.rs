//! Column family definitions for the RocksDB store
//!
//! Each column family provides logical separation of data types
//! while sharing the same RocksDB instance.

/// Column family for agents
pub const CF_AGENTS: &str = "agents";

/// Column family for tribes
pub const CF_TRIBES: &str = "tribes";

/// Column family for agent -> tribe membership
pub const CF_MEMBERS: &str = "members";

/// Column family for contests
pub const CF_CONTESTS: &str = "contests";

/// Column family for round posts
pub const CF_POSTS: &str = "posts";

/// Column family for votes
pub const CF_VOTES: &str = "votes";

/// All column family names
pub const ALL_CFS: &[&str] = &[
    CF_AGENTS,
    CF_TRIBES,
    CF_MEMBERS,
    CF_CONTESTS,
    CF_POSTS,
    CF_VOTES,
];

/// Key builders. Ids are opaque strings; `\x1f` separates compound parts so
/// that ids containing `:` cannot collide.
pub mod keys {
    use crate::store::Round;

    const SEP: char = '\u{1f}';

    pub fn agent(agent_id: &str) -> String {
        format!("agent:{}", agent_id)
    }

    pub fn tribe(tribe_id: &str) -> String {
        format!("tribe:{}", tribe_id)
    }

    pub fn member(agent_id: &str) -> String {
        format!("member:{}", agent_id)
    }

    pub fn contest(contest_id: &str) -> String {
        format!("contest:{}", contest_id)
    }

    /// Prefix covering every post of a contest
    pub fn posts_of(contest_id: &str) -> String {
        format!("post:{}{}", contest_id, SEP)
    }

    pub fn post(contest_id: &str, tribe_id: &str, round: Round) -> String {
        format!("{}{}{}{}", posts_of(contest_id), round, SEP, tribe_id)
    }

    /// Prefix covering every vote of a contest
    pub fn votes_of(contest_id: &str) -> String {
        format!("vote:{}{}", contest_id, SEP)
    }

    pub fn vote(contest_id: &str, agent_id: &str) -> String {
        format!("{}{}", votes_of(contest_id), agent_id)
    }
}
