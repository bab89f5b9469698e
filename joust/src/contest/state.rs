//! Contest states and the single forward transition.

use serde::{Deserialize, Serialize};

/// State of a contest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContestState {
    /// Created, nobody has been called yet.
    Draft,
    /// Tribe leaders deliver their entrance line.
    Round1,
    /// Tribe leaders pick a side and pitch it.
    Round2,
    /// Every participant is polled for a vote.
    Vote,
    /// Resolved; results are final.
    Done,
}

impl ContestState {
    /// Whether this is the terminal state.
    pub fn is_terminal(self) -> bool {
        self == Self::Done
    }

    /// The only state this one may advance to.
    pub fn next(self) -> Option<ContestState> {
        match self {
            Self::Draft => Some(Self::Round1),
            Self::Round1 => Some(Self::Round2),
            Self::Round2 => Some(Self::Vote),
            Self::Vote => Some(Self::Done),
            Self::Done => None,
        }
    }

    /// Forward-only transition check.
    pub fn transition(self, to: ContestState) -> Result<ContestState, TransitionError> {
        if self.next() == Some(to) {
            Ok(to)
        } else {
            Err(TransitionError { from: self, to })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Round1 => "round1",
            Self::Round2 => "round2",
            Self::Vote => "vote",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for ContestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} → {to}")]
pub struct TransitionError {
    pub from: ContestState,
    pub to: ContestState,
}
