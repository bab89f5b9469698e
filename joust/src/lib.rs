//! Joust engine
//!
//! Runs "would you rather" contests between tribes of agents:
//!
//! - each tribe leader answers two rounds through a signed HTTP callback
//!   (or a deterministic synthetic stand-in)
//! - every agent votes on the prompt
//! - votes from outside a tribe that match its pick become persuasion points
//! - a winner is resolved, infamy is redistributed, and the losers' members
//!   are conquered into the winning tribe
//!
//! # Usage
//!
//! ```ignore
//! use joust::{JoustConfig, JoustEngine, MemoryStore};
//!
//! let store = MemoryStore::new().shared();
//! let engine = JoustEngine::from_config(store, JoustConfig::default())?;
//! let contest = engine.create_contest(Contest::new("Breakfast", prompt, tribe_ids))?;
//! let results = engine.run_to_completion(&contest.id).await?;
//! ```

pub mod callback;
pub mod config;
pub mod conquest;
pub mod contest;
pub mod decision;
pub mod resolution;
pub mod roster;
pub mod scoring;
pub mod store;

pub use callback::{AgentDialer, CallbackChannel, CallbackError, CallbackRequest, SharedChannel};
pub use config::{ConfigError, JoustConfig, VoteScope};
pub use contest::{AdvanceReport, ContestState, EngineError, JoustEngine};
pub use decision::{AiStrategy, DecisionStrategy, RulesStrategy};
pub use roster::{Admission, JoinPolicy, Roster};
pub use store::{JoustStore, MemoryStore, SharedStore, StoreError};
