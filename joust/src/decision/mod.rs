//! Decision strategies: who, if anyone, is forced as the contest winner.
//!
//! `rules` never forces a winner and lets resolution follow the votes.
//! `ai` asks an [`Analyst`] and always degrades to the [`heuristic`] when
//! the analyst is missing, fails, or names a tribe outside the contest.
//! Deciding is infallible.

pub mod analyst;
pub mod heuristic;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{info, warn};

pub use analyst::{AnalysisError, AnalysisRequest, Analyst, AnalystVerdict, ChatAnalyst};
pub use heuristic::HeuristicAnalysis;

use crate::config::JoustConfig;
use crate::scoring::Scoreboard;
use crate::store::{Choice, Contest, DecisionMeta, DecisionMode, TribeId};

/// What the strategy knows about one participating tribe.
#[derive(Debug, Clone, PartialEq)]
pub struct TribeDossier {
    pub id: TribeId,
    pub name: String,
    pub color: String,
    pub infamy: i64,
    pub wins: u32,
    pub losses: u32,
    pub round1_text: Option<String>,
    pub round2_choice: Option<Choice>,
    pub round2_text: Option<String>,
}

/// Everything a strategy may look at. Dossiers are in contest order.
pub struct DecisionContext<'a> {
    pub contest: &'a Contest,
    pub dossiers: &'a [TribeDossier],
    pub board: &'a Scoreboard,
}

impl<'a> DecisionContext<'a> {
    pub fn new(contest: &'a Contest, dossiers: &'a [TribeDossier], board: &'a Scoreboard) -> Self {
        Self {
            contest,
            dossiers,
            board,
        }
    }

    pub fn has_tribe(&self, tribe_id: &str) -> bool {
        self.contest.has_tribe(tribe_id)
    }

    pub fn tribe_name<'s>(&'s self, tribe_id: &'s str) -> &'s str {
        self.dossiers
            .iter()
            .find(|d| d.id == tribe_id)
            .map_or(tribe_id, |d| d.name.as_str())
    }

    /// Tribes by persuasion score desc, infamy desc, id asc.
    pub fn ranked(&self) -> Vec<&'a TribeDossier> {
        let mut ranked: Vec<&TribeDossier> = self.dossiers.iter().collect();
        ranked.sort_by(|a, b| {
            self.board
                .score_of(&b.id)
                .cmp(&self.board.score_of(&a.id))
                .then_with(|| b.infamy.cmp(&a.infamy))
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub forced_winner: Option<TribeId>,
    pub meta: DecisionMeta,
}

impl Decision {
    fn fallback(heuristic: HeuristicAnalysis, reason: &str) -> Self {
        Self {
            forced_winner: heuristic.winner_tribe_id,
            meta: DecisionMeta {
                mode: DecisionMode::Ai,
                source: "heuristic".to_string(),
                confidence: Some(heuristic.confidence),
                verdict: format!("{} (fallback: {reason})", heuristic.verdict),
                highlights: heuristic.highlights,
                fallback: true,
            },
        }
    }
}

#[async_trait]
pub trait DecisionStrategy: Send + Sync {
    fn mode(&self) -> DecisionMode;

    async fn decide(&self, ctx: &DecisionContext<'_>) -> Decision;
}

pub type SharedStrategy = Arc<dyn DecisionStrategy>;

/// Votes and persuasion alone decide.
#[derive(Debug, Clone, Copy, Default)]
pub struct RulesStrategy;

#[async_trait]
impl DecisionStrategy for RulesStrategy {
    fn mode(&self) -> DecisionMode {
        DecisionMode::Rules
    }

    async fn decide(&self, _ctx: &DecisionContext<'_>) -> Decision {
        Decision {
            forced_winner: None,
            meta: DecisionMeta {
                mode: DecisionMode::Rules,
                source: "rules".to_string(),
                confidence: None,
                verdict: "decided by votes and persuasion".to_string(),
                highlights: Vec::new(),
                fallback: false,
            },
        }
    }
}

/// Analyst-judged contests with heuristic fallback.
pub struct AiStrategy {
    analyst: Option<Arc<dyn Analyst>>,
}

impl AiStrategy {
    pub fn new(analyst: Option<Arc<dyn Analyst>>) -> Self {
        Self { analyst }
    }

    async fn consult(
        analyst: &dyn Analyst,
        ctx: &DecisionContext<'_>,
    ) -> Result<AnalystVerdict, AnalysisError> {
        let request = AnalysisRequest::for_contest(ctx);
        let verdict = AssertUnwindSafe(async { analyst.analyze(&request).await })
            .catch_unwind()
            .await
            .unwrap_or(Err(AnalysisError::Panicked))?
            .validate()?;
        if !ctx.has_tribe(&verdict.winner_tribe_id) {
            return Err(AnalysisError::UnknownWinner(verdict.winner_tribe_id));
        }
        Ok(verdict)
    }
}

#[async_trait]
impl DecisionStrategy for AiStrategy {
    fn mode(&self) -> DecisionMode {
        DecisionMode::Ai
    }

    async fn decide(&self, ctx: &DecisionContext<'_>) -> Decision {
        let heuristic = heuristic::analyze(ctx);
        let contest_id = ctx.contest.id.as_str();

        let Some(analyst) = self.analyst.as_deref() else {
            warn!(contest_id, "No analyst configured, using heuristic verdict");
            return Decision::fallback(heuristic, &AnalysisError::MissingCredential.to_string());
        };

        match Self::consult(analyst, ctx).await {
            Ok(verdict) => {
                info!(
                    contest_id,
                    winner = %verdict.winner_tribe_id,
                    confidence = verdict.confidence,
                    "Analyst verdict accepted"
                );
                let highlights = if verdict.highlights.is_empty() {
                    heuristic.highlights
                } else {
                    verdict.highlights
                };
                Decision {
                    forced_winner: Some(verdict.winner_tribe_id),
                    meta: DecisionMeta {
                        mode: DecisionMode::Ai,
                        source: format!("analyst:{}", analyst.name()),
                        confidence: Some(verdict.confidence),
                        verdict: verdict.verdict,
                        highlights,
                        fallback: false,
                    },
                }
            }
            Err(e) => {
                warn!(contest_id, error = %e, "Analyst failed, using heuristic verdict");
                Decision::fallback(heuristic, &e.to_string())
            }
        }
    }
}

/// Strategy selected by `config.decision_mode`.
pub fn strategy_for(config: &JoustConfig) -> SharedStrategy {
    match config.decision_mode {
        DecisionMode::Rules => Arc::new(RulesStrategy),
        DecisionMode::Ai => {
            let analyst = config.analyst.api_key.as_deref().and_then(|key| {
                ChatAnalyst::new(
                    config.analyst.url.as_str(),
                    key,
                    config.analyst.model.as_str(),
                    Duration::from_millis(config.analyst.timeout_ms),
                )
                .map_err(|e| warn!(error = %e, "Analyst unavailable"))
                .ok()
            });
            Arc::new(AiStrategy::new(
                analyst.map(|a| Arc::new(a) as Arc<dyn Analyst>),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::analyst::MockAnalyst;
    use super::*;
    use crate::scoring::{score, CastVote, TribeChoice};
    use crate::store::Prompt;

    struct Fixture {
        contest: Contest,
        dossiers: Vec<TribeDossier>,
        board: Scoreboard,
    }

    impl Fixture {
        /// t1 picks A, t2 picks B; one neutral vote for B makes t2 the heuristic winner.
        fn new() -> Self {
            let contest = Contest::with_id(
                "c1",
                "Mornings",
                Prompt::new("Coffee or tea?", "Coffee", "Tea"),
                vec!["t1".into(), "t2".into()],
            );
            let dossier = |id: &str, choice| TribeDossier {
                id: id.into(),
                name: id.to_uppercase(),
                color: "#123456".into(),
                infamy: 0,
                wins: 0,
                losses: 0,
                round1_text: Some(format!("{id} arrives")),
                round2_choice: Some(choice),
                round2_text: Some(format!("{id} argues")),
            };
            let dossiers = vec![dossier("t1", Choice::A), dossier("t2", Choice::B)];
            let board = score(
                &[
                    TribeChoice {
                        tribe_id: "t1".into(),
                        choice: Some(Choice::A),
                    },
                    TribeChoice {
                        tribe_id: "t2".into(),
                        choice: Some(Choice::B),
                    },
                ],
                &[CastVote {
                    agent_id: "n".into(),
                    choice: Choice::B,
                    voter_tribe: None,
                }],
            );
            Self {
                contest,
                dossiers,
                board,
            }
        }

        fn ctx(&self) -> DecisionContext<'_> {
            DecisionContext::new(&self.contest, &self.dossiers, &self.board)
        }
    }

    fn verdict(winner: &str) -> AnalystVerdict {
        AnalystVerdict {
            winner_tribe_id: winner.into(),
            confidence: 0.8,
            verdict: "Sharper pitch.".into(),
            highlights: vec!["t1 argues".into()],
        }
    }

    #[tokio::test]
    async fn test_rules_never_forces() {
        let fx = Fixture::new();
        let decision = RulesStrategy.decide(&fx.ctx()).await;
        assert_eq!(decision.forced_winner, None);
        assert_eq!(decision.meta.mode, DecisionMode::Rules);
        assert!(!decision.meta.fallback);
    }

    #[tokio::test]
    async fn test_analyst_winner_is_forced() {
        let fx = Fixture::new();
        let mut analyst = MockAnalyst::new();
        analyst.expect_name().return_const("judge".to_string());
        analyst
            .expect_analyze()
            .withf(|req| req.summary.contains("Coffee or tea?"))
            .times(1)
            .returning(|_| Ok(verdict("t1")));

        let strategy = AiStrategy::new(Some(Arc::new(analyst)));
        let decision = strategy.decide(&fx.ctx()).await;
        assert_eq!(decision.forced_winner.as_deref(), Some("t1"));
        assert_eq!(decision.meta.source, "analyst:judge");
        assert_eq!(decision.meta.confidence, Some(0.8));
        assert!(!decision.meta.fallback);
    }

    #[tokio::test]
    async fn test_unknown_winner_falls_back_to_heuristic() {
        let fx = Fixture::new();
        let mut analyst = MockAnalyst::new();
        analyst.expect_name().return_const("judge".to_string());
        analyst
            .expect_analyze()
            .returning(|_| Ok(verdict("t-unknown")));

        let decision = AiStrategy::new(Some(Arc::new(analyst)))
            .decide(&fx.ctx())
            .await;
        assert_eq!(decision.forced_winner.as_deref(), Some("t2"));
        assert!(decision.meta.fallback);
        assert_eq!(decision.meta.source, "heuristic");
        assert!(decision.meta.verdict.contains("t-unknown"));
    }

    #[tokio::test]
    async fn test_analyst_error_is_appended_to_verdict() {
        let fx = Fixture::new();
        let mut analyst = MockAnalyst::new();
        analyst.expect_name().return_const("judge".to_string());
        analyst.expect_analyze().returning(|_| {
            Err(AnalysisError::Status {
                status: 500,
                body: "boom".into(),
            })
        });

        let decision = AiStrategy::new(Some(Arc::new(analyst)))
            .decide(&fx.ctx())
            .await;
        assert_eq!(decision.forced_winner.as_deref(), Some("t2"));
        assert!(decision.meta.fallback);
        assert!(decision.meta.verdict.contains("status 500"));
        assert_eq!(decision.meta.confidence, Some(heuristic::WINNER_CONFIDENCE));
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_falls_back() {
        let fx = Fixture::new();
        let mut analyst = MockAnalyst::new();
        analyst.expect_name().return_const("judge".to_string());
        analyst.expect_analyze().returning(|_| {
            Ok(AnalystVerdict {
                confidence: 7.0,
                ..verdict("t1")
            })
        });

        let decision = AiStrategy::new(Some(Arc::new(analyst)))
            .decide(&fx.ctx())
            .await;
        assert_eq!(decision.forced_winner.as_deref(), Some("t2"));
        assert!(decision.meta.fallback);
    }

    struct PanickingAnalyst;

    #[async_trait]
    impl Analyst for PanickingAnalyst {
        fn name(&self) -> String {
            "wild".into()
        }

        async fn analyze(&self, _: &AnalysisRequest) -> Result<AnalystVerdict, AnalysisError> {
            panic!("analyst exploded")
        }
    }

    #[tokio::test]
    async fn test_panicking_analyst_falls_back() {
        let fx = Fixture::new();
        let decision = AiStrategy::new(Some(Arc::new(PanickingAnalyst)))
            .decide(&fx.ctx())
            .await;
        assert!(decision.meta.fallback);
        assert!(decision.meta.verdict.contains("panicked"));
        assert_eq!(decision.forced_winner.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn test_missing_analyst_explains_itself() {
        let fx = Fixture::new();
        let decision = AiStrategy::new(None).decide(&fx.ctx()).await;
        assert_eq!(decision.forced_winner.as_deref(), Some("t2"));
        assert!(decision.meta.fallback);
        assert!(decision.meta.verdict.contains("credential"));
    }

    #[test]
    fn test_strategy_for_config() {
        let mut config = JoustConfig::default();
        config.decision_mode = DecisionMode::Rules;
        assert_eq!(strategy_for(&config).mode(), DecisionMode::Rules);

        config.decision_mode = DecisionMode::Ai;
        config.analyst.api_key = None;
        assert_eq!(strategy_for(&config).mode(), DecisionMode::Ai);
    }
}
