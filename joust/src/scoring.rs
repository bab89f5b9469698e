//! Vote totals, winning option and per-tribe persuasion.
//!
//! Pure functions over already-persisted choices and votes. A vote earns a
//! tribe credit only when it matches that tribe's round-2 choice and comes
//! from outside the tribe:
//!
//! | Voter                                               | neutral | snitch | outside |
//! |-----------------------------------------------------|---------|--------|---------|
//! | in no tribe                                         | +1      |        | +1      |
//! | in another contest tribe whose choice differs       |         | +1     | +1      |
//! | in another contest tribe with the same choice       |         |        | +1      |
//! | in a tribe outside the contest                      |         |        | +1      |
//! | in the scored tribe itself                          |         |        |         |
//!
//! Persuasion score = neutral + 2 × snitch. `outside` is reported only.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::{AgentId, Choice, TribeId, VoteTotals};

/// A participating tribe and its recorded round-2 choice (`None` on forfeit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TribeChoice {
    pub tribe_id: TribeId,
    pub choice: Option<Choice>,
}

/// A vote together with the voter's tribe at scoring time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastVote {
    pub agent_id: AgentId,
    pub choice: Choice,
    pub voter_tribe: Option<TribeId>,
}

/// Persuasion tallies for one tribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TribeTally {
    pub tribe_id: TribeId,
    pub choice: Option<Choice>,
    pub neutral_votes: u32,
    pub snitch_votes: u32,
    pub outside_votes: u32,
    pub persuasion_score: i64,
}

/// Output of [`score`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scoreboard {
    pub vote_totals: VoteTotals,
    /// Option with strictly more votes; `None` on a tie.
    pub winning_option: Option<Choice>,
    /// One tally per tribe, in contest order.
    pub tallies: Vec<TribeTally>,
}

impl Scoreboard {
    pub fn tally(&self, tribe_id: &str) -> Option<&TribeTally> {
        self.tallies.iter().find(|t| t.tribe_id == tribe_id)
    }

    pub fn score_of(&self, tribe_id: &str) -> i64 {
        self.tally(tribe_id).map_or(0, |t| t.persuasion_score)
    }

    pub fn choice_of(&self, tribe_id: &str) -> Option<Choice> {
        self.tally(tribe_id).and_then(|t| t.choice)
    }
}

/// Score a contest from its tribes' choices and the votes cast.
pub fn score(tribes: &[TribeChoice], votes: &[CastVote]) -> Scoreboard {
    let mut vote_totals = VoteTotals::default();
    for vote in votes {
        vote_totals.record(vote.choice);
    }

    let choices: HashMap<&str, Option<Choice>> = tribes
        .iter()
        .map(|t| (t.tribe_id.as_str(), t.choice))
        .collect();

    let tallies = tribes
        .iter()
        .map(|tribe| tally(tribe, &choices, votes))
        .collect();

    Scoreboard {
        vote_totals,
        winning_option: vote_totals.winning_option(),
        tallies,
    }
}

fn tally(
    tribe: &TribeChoice,
    choices: &HashMap<&str, Option<Choice>>,
    votes: &[CastVote],
) -> TribeTally {
    let mut out = TribeTally {
        tribe_id: tribe.tribe_id.clone(),
        choice: tribe.choice,
        neutral_votes: 0,
        snitch_votes: 0,
        outside_votes: 0,
        persuasion_score: 0,
    };

    // Forfeited round 2: nobody's vote can persuade for this tribe.
    let Some(choice) = tribe.choice else {
        return out;
    };

    for vote in votes.iter().filter(|v| v.choice == choice) {
        match vote.voter_tribe.as_deref() {
            Some(own) if own == tribe.tribe_id => {}
            None => {
                out.outside_votes += 1;
                out.neutral_votes += 1;
            }
            Some(other) => {
                out.outside_votes += 1;
                if let Some(other_choice) = choices.get(other) {
                    if *other_choice != Some(choice) {
                        out.snitch_votes += 1;
                    }
                }
            }
        }
    }

    out.persuasion_score = i64::from(out.neutral_votes) + 2 * i64::from(out.snitch_votes);
    out
}
