//! Deterministic analysis that every `ai` decision
//! falls back to.

use super::DecisionContext;

/// Confidence reported when the heuristic names a winner.
pub const WINNER_CONFIDENCE: f64 = 0.62;
/// Confidence reported when it cannot.
pub const NO_WINNER_CONFIDENCE: f64 = 0.4;

const HIGHLIGHT_CHARS: usize = 120;
const MAX_HIGHLIGHTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicAnalysis {
    pub winner_tribe_id: Option<String>,
    pub confidence: f64,
    pub verdict: String,
    pub highlights: Vec<String>,
}

/// Collapse runs of whitespace and cut to `max_chars`.
pub fn squash(text: &str, max_chars: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

pub fn analyze(ctx: &DecisionContext<'_>) -> HeuristicAnalysis {
    let (winner, verdict) = match ctx.contest.persisted_winner() {
        Some(id) => (
            Some(id.to_string()),
            format!("{} keeps the recorded win", ctx.tribe_name(id)),
        ),
        None => match ctx.ranked().first() {
            Some(top) => (
                Some(top.id.clone()),
                format!(
                    "{} persuaded the most (score {})",
                    top.name,
                    ctx.board.score_of(&top.id)
                ),
            ),
            None => (None, "no tribe stood out".to_string()),
        },
    };

    let confidence = if winner.is_some() {
        WINNER_CONFIDENCE
    } else {
        NO_WINNER_CONFIDENCE
    };

    HeuristicAnalysis {
        winner_tribe_id: winner,
        confidence,
        verdict,
        highlights: highlights(ctx),
    }
}

fn highlights(ctx: &DecisionContext<'_>) -> Vec<String> {
    let with_pitch = ctx
        .dossiers
        .iter()
        .filter(|d| d.round2_text.is_some())
        .count();
    let use_round1 = with_pitch < MAX_HIGHLIGHTS;

    ctx.dossiers
        .iter()
        .filter_map(|d| {
            d.round2_text
                .as_deref()
                .or(if use_round1 {
                    d.round1_text.as_deref()
                } else {
                    None
                })
        })
        .map(|text| squash(text, HIGHLIGHT_CHARS))
        .filter(|text| !text.is_empty())
        .take(MAX_HIGHLIGHTS)
        .collect()
}
