//! Designate the winning tribe and compute infamy deltas.
//!
//! Winner selection, first match wins:
//!
//! 1. a forced winner from the decision strategy, if it is a contest tribe
//! 2. the single top persuasion score among tribes on the winning option
//! 3. a tie in 2, broken by infamy (desc) then tribe id (asc)
//! 4. no tribe on the winning option: rank every tribe by score (desc),
//!    infamy (desc), id (asc)

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::scoring::{Scoreboard, TribeTally};
use crate::store::{Choice, TribeId, TribeResult};

/// Base delta for tribes on / off the winning option.
pub const SIDE_BASE: i64 = 6;
/// Base delta when no option won (vote tie).
pub const NO_OPTION_BASE: i64 = 2;
/// Extra delta for the designated winner.
pub const WINNER_BONUS: i64 = 8;
/// Members receive this percentage of their tribe's delta.
pub const MEMBER_SHARE_PERCENT: i64 = 35;

/// How the winner was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinnerRule {
    Forced,
    TopEligible,
    EligibleTieBreak,
    RankAll,
}

impl WinnerRule {
    pub fn as_str(self) -> &'static str {
        match self {
            WinnerRule::Forced => "forced",
            WinnerRule::TopEligible => "top_eligible",
            WinnerRule::EligibleTieBreak => "eligible_tie_break",
            WinnerRule::RankAll => "rank_all",
        }
    }
}

impl std::fmt::Display for WinnerRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of [`resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub winner_tribe_id: Option<TribeId>,
    /// Effective winning option (a forced winner's choice overrides the vote).
    pub winning_option: Option<Choice>,
    pub rule: Option<WinnerRule>,
    /// One entry per tribe, in contest order.
    pub tribes: Vec<TribeResult>,
}

/// `round(delta × 0.35)` with halves rounded away from zero, in exact
/// integer arithmetic.
pub fn member_share(delta: i64) -> i64 {
    let scaled = delta * MEMBER_SHARE_PERCENT;
    let magnitude = (scaled.abs() + 50) / 100;
    magnitude * scaled.signum()
}

/// Ordering that puts the preferred tribe first: score desc, infamy desc, id asc.
fn rank(a: &TribeTally, b: &TribeTally, infamy: &HashMap<TribeId, i64>) -> Ordering {
    let infamy_of = |t: &TribeTally| infamy.get(&t.tribe_id).copied().unwrap_or(0);
    b.persuasion_score
        .cmp(&a.persuasion_score)
        .then_with(|| infamy_of(b).cmp(&infamy_of(a)))
        .then_with(|| a.tribe_id.cmp(&b.tribe_id))
}

fn pick_winner(
    board: &Scoreboard,
    infamy: &HashMap<TribeId, i64>,
    forced_winner: Option<&str>,
) -> (Option<TribeId>, Option<Choice>, Option<WinnerRule>) {
    if let Some(forced) = forced_winner.and_then(|id| board.tally(id)) {
        let option = forced.choice.or(board.winning_option);
        return (
            Some(forced.tribe_id.clone()),
            option,
            Some(WinnerRule::Forced),
        );
    }

    let mut eligible: Vec<&TribeTally> = match board.winning_option {
        Some(option) => board
            .tallies
            .iter()
            .filter(|t| t.choice == Some(option))
            .collect(),
        None => Vec::new(),
    };

    if !eligible.is_empty() {
        let top = eligible
            .iter()
            .map(|t| t.persuasion_score)
            .max()
            .unwrap_or(0);
        eligible.retain(|t| t.persuasion_score == top);
        let rule = if eligible.len() == 1 {
            WinnerRule::TopEligible
        } else {
            WinnerRule::EligibleTieBreak
        };
        eligible.sort_by(|a, b| rank(a, b, infamy));
        let winner = eligible.first().map(|t| t.tribe_id.clone());
        return (winner, board.winning_option, Some(rule));
    }

    let mut all: Vec<&TribeTally> = board.tallies.iter().collect();
    all.sort_by(|a, b| rank(a, b, infamy));
    let winner = all.first().map(|t| t.tribe_id.clone());
    let rule = winner.as_ref().map(|_| WinnerRule::RankAll);
    (winner, board.winning_option, rule)
}

/// Resolve a scored contest.
///
/// `infamy` holds each tribe's current stored infamy, used only for
/// tie-breaks. `forced_winner` is ignored unless it names a contest tribe.
pub fn resolve(
    board: &Scoreboard,
    infamy: &HashMap<TribeId, i64>,
    forced_winner: Option<&str>,
) -> Resolution {
    let (winner, winning_option, rule) = pick_winner(board, infamy, forced_winner);

    let tribes = board
        .tallies
        .iter()
        .map(|tally| {
            let is_winner = winner.as_deref() == Some(tally.tribe_id.as_str());
            let (base, on_winning_side) = match winning_option {
                Some(option) if tally.choice == Some(option) => (SIDE_BASE, true),
                Some(_) => (-SIDE_BASE, false),
                None if is_winner => (NO_OPTION_BASE, true),
                None => (-NO_OPTION_BASE, false),
            };
            let bonus = if is_winner { WINNER_BONUS } else { 0 };
            TribeResult {
                tribe_id: tally.tribe_id.clone(),
                choice: tally.choice,
                neutral_votes: tally.neutral_votes,
                snitch_votes: tally.snitch_votes,
                outside_votes: tally.outside_votes,
                persuasion_score: tally.persuasion_score,
                delta_infamy: base + bonus + tally.persuasion_score,
                on_winning_side,
                is_winner,
            }
        })
        .collect();

    Resolution {
        winner_tribe_id: winner,
        winning_option,
        rule,
        tribes,
    }
}
