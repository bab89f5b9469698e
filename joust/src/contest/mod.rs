//! Contest lifecycle
//!
//! ```text
//! draft ─► round1 ─► round2 ─► vote ─► done
//!          (entrance)  (pick a side)  (poll, score, resolve, conquer)
//! ```
//!
//! [`JoustEngine::advance`] performs one step. Round failures leave the
//! state untouched and keep whatever posts were already recorded.

pub mod engine;
pub mod locks;
pub mod rules;
pub mod state;

pub use engine::{AdvanceReport, EngineError, EngineResult, JoustEngine};
pub use locks::ContestLocks;
pub use rules::Violation;
pub use state::{ContestState, TransitionError};
