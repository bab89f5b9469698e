//! End-to-end contest runs against the in-memory store with scripted
//! participants.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use common::{Arena, FlakyStore};
use joust::callback::CallbackError;
use joust::config::{JoustConfig, VoteScope};
use joust::contest::{ContestState, EngineError};
use joust::decision::{
    AiStrategy, AnalysisError, AnalysisRequest, Analyst, AnalystVerdict, RulesStrategy,
};
use joust::resolution::member_share;
use joust::store::{Choice, DecisionMode, JoustStore, Round, StoreError};

fn script_rounds(arena: &Arena, leader: &str, choice: Choice) {
    arena.channel.round1(leader, &format!("{leader} enters"));
    arena
        .channel
        .round2(leader, choice, &format!("{leader} picks {choice}"));
}

// ── Full round trip ────────────────────────────────────────────────

#[tokio::test]
async fn test_full_round_trip_totals_and_infamy() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1", "a2"]);
    arena.tribe("t2", &["b1", "b2"]);
    arena.tribe("t3", &["c1", "c2"]);
    arena.agent("n1");
    arena.agent("n2");
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    script_rounds(&arena, "c1", Choice::A);
    for (agent, choice) in [
        ("a1", Choice::A),
        ("a2", Choice::B),
        ("b1", Choice::B),
        ("b2", Choice::A),
        ("c1", Choice::A),
        ("n1", Choice::A),
        ("n2", Choice::B),
    ] {
        arena.channel.vote(agent, choice);
    }
    // c2 never answers the poll.

    let engine = arena.engine();
    let contest = arena.contest(&engine, &["t1", "t2", "t3"]);
    let members_before: Vec<(String, Vec<String>)> = ["t1", "t2", "t3"]
        .iter()
        .map(|t| (t.to_string(), arena.store.list_members(t).unwrap()))
        .collect();

    let results = engine.run_to_completion(&contest.id).await.unwrap();

    assert_eq!(results.vote_totals.a + results.vote_totals.b, 7);
    assert_eq!(arena.store.list_votes(&contest.id).unwrap().len(), 7);
    assert_eq!(results.tribes.len(), 3);
    assert_eq!(
        results.tribes.iter().filter(|t| t.is_winner).count(),
        1
    );

    for (tribe_id, members) in members_before {
        let entry = results.tribe(&tribe_id).unwrap();
        assert_eq!(
            entry.persuasion_score,
            i64::from(entry.neutral_votes) + 2 * i64::from(entry.snitch_votes)
        );
        let tribe = arena.store.get_tribe(&tribe_id).unwrap().unwrap();
        assert_eq!(tribe.infamy, entry.delta_infamy);
        for member in members {
            let agent = arena.store.get_agent(&member).unwrap().unwrap();
            assert_eq!(agent.infamy, member_share(entry.delta_infamy));
            assert_eq!(agent.wins + agent.losses, 1);
        }
    }

    let stored = arena.store.get_contest(&contest.id).unwrap().unwrap();
    assert_eq!(stored.state, ContestState::Done);
    assert_eq!(stored.results.as_ref(), Some(&results));
}

// ── Snitch scenario ────────────────────────────────────────────────

#[tokio::test]
async fn test_two_tribe_snitch_scenario() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1", "b2"]);
    arena.agent("n1");
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    arena.channel.vote("a1", Choice::A);
    arena.channel.vote("b1", Choice::B);
    arena.channel.vote("b2", Choice::A);
    arena.channel.vote("n1", Choice::A);

    let engine = arena.engine();
    let contest = arena.contest(&engine, &["t1", "t2"]);
    let results = engine.run_to_completion(&contest.id).await.unwrap();

    assert_eq!(results.winning_option, Some(Choice::A));
    assert_eq!(results.winner_tribe_id.as_deref(), Some("t1"));
    let t1 = results.tribe("t1").unwrap();
    assert_eq!((t1.neutral_votes, t1.snitch_votes, t1.outside_votes), (1, 1, 2));
    assert_eq!(t1.delta_infamy, 17);
    assert_eq!(results.tribe("t2").unwrap().delta_infamy, -6);

    let a1 = arena.store.get_agent("a1").unwrap().unwrap();
    assert_eq!((a1.infamy, a1.wins), (6, 1));
    let b2 = arena.store.get_agent("b2").unwrap().unwrap();
    assert_eq!((b2.infamy, b2.losses), (-2, 1));

    // Conquest: both t2 members now fight for t1.
    assert_eq!(results.migration.moved_total, 2);
    assert_eq!(arena.store.tribe_of("b2").unwrap().as_deref(), Some("t1"));
}

#[tokio::test]
async fn test_failed_settlement_retries_cleanly() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1", "b2"]);
    arena.agent("n1");
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    arena.channel.vote("a1", Choice::A);
    arena.channel.vote("b1", Choice::B);
    arena.channel.vote("b2", Choice::A);
    arena.channel.vote("n1", Choice::A);

    let store = FlakyStore::new(arena.store.clone(), 1);
    let engine = arena.engine_on(store, Arena::config(VoteScope::All));
    let contest = arena.contest(&engine, &["t1", "t2"]);
    for _ in 0..3 {
        engine.advance(&contest.id).await.unwrap();
    }

    let err = engine.advance(&contest.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::Serialization(_))));
    let stored = arena.store.get_contest(&contest.id).unwrap().unwrap();
    assert_eq!(stored.state, ContestState::Vote);
    assert!(stored.results.is_none());
    let t1 = arena.store.get_tribe("t1").unwrap().unwrap();
    assert_eq!((t1.infamy, t1.wins), (0, 0));
    assert_eq!(arena.store.tribe_of("b2").unwrap().as_deref(), Some("t2"));

    let report = engine.advance(&contest.id).await.unwrap();
    assert_eq!(report.to, ContestState::Done);
    let results = report.results.unwrap();
    // b2 still counts as a snitch: membership was untouched by the failure.
    assert_eq!(results.tribe("t1").unwrap().snitch_votes, 1);
    assert_eq!(results.tribe("t1").unwrap().delta_infamy, 17);
    assert_eq!(results.migration.moved_total, 2);

    let t1 = arena.store.get_tribe("t1").unwrap().unwrap();
    assert_eq!((t1.infamy, t1.wins), (17, 1));
    let b2 = arena.store.get_agent("b2").unwrap().unwrap();
    assert_eq!((b2.infamy, b2.losses), (-2, 1));
    assert_eq!(arena.store.list_members("t1").unwrap().len(), 3);
    // The retry polled nobody twice.
    assert_eq!(arena.channel.calls_to("n1", None), 1);
}

// ── Tie ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_one_one_tie_ranks_all_tribes() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1"]);
    arena.agent("n1");
    arena.agent("n2");
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    arena.channel.vote("n1", Choice::A);
    arena.channel.vote("n2", Choice::B);

    let engine = arena.engine();
    let contest = arena.contest(&engine, &["t1", "t2"]);
    let results = engine.run_to_completion(&contest.id).await.unwrap();

    assert_eq!(results.winning_option, None);
    assert_eq!(results.winner_tribe_id.as_deref(), Some("t1"));
    let t1 = results.tribe("t1").unwrap();
    assert!(t1.is_winner && t1.on_winning_side);
    assert_eq!(t1.delta_infamy, 2 + 8 + 1);
    let t2 = results.tribe("t2").unwrap();
    assert_eq!(t2.delta_infamy, -2 + 1);
    assert!(!t2.on_winning_side);
}

// ── Idempotent advance ─────────────────────────────────────────────

#[tokio::test]
async fn test_failed_round_keeps_posts_and_resumes() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1"]);
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    arena.channel.fail_next("b1");

    let engine = arena.engine();
    let contest = arena.contest(&engine, &["t1", "t2"]);
    engine.advance(&contest.id).await.unwrap();

    let err = engine.advance(&contest.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Callback { ref agent_id, .. } if agent_id == "b1"));
    let stored = arena.store.get_contest(&contest.id).unwrap().unwrap();
    assert_eq!(stored.state, ContestState::Round1);
    assert!(arena
        .store
        .get_post(&contest.id, "t1", Round::Round1)
        .unwrap()
        .is_some());

    let report = engine.advance(&contest.id).await.unwrap();
    assert_eq!(report.to, ContestState::Round2);
    assert_eq!(report.posts_recorded, 1);
    assert_eq!(arena.channel.calls_to("a1", Some(Round::Round1)), 1);
    assert_eq!(arena.channel.calls_to("b1", Some(Round::Round1)), 2);
}

#[tokio::test]
async fn test_done_contest_is_not_replayed() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1"]);
    arena.agent("n1");
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    arena.channel.vote("n1", Choice::B);

    let engine = arena.engine();
    let contest = arena.contest(&engine, &["t1", "t2"]);
    let results = engine.run_to_completion(&contest.id).await.unwrap();
    let calls = arena.channel.calls().len();
    let infamy = arena.store.get_tribe("t2").unwrap().unwrap().infamy;

    for _ in 0..3 {
        let report = engine.advance(&contest.id).await.unwrap();
        assert_eq!(report.to, ContestState::Done);
        assert_eq!(report.results.as_ref(), Some(&results));
    }
    assert_eq!(arena.channel.calls().len(), calls);
    assert_eq!(arena.store.get_tribe("t2").unwrap().unwrap().infamy, infamy);
}

// ── Timeouts ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_hung_leader_aborts_round_and_resumes() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1"]);
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    arena.channel.hang_next("b1");

    let engine = arena.engine();
    let contest = arena.contest(&engine, &["t1", "t2"]);
    engine.advance(&contest.id).await.unwrap();

    let err = engine.advance(&contest.id).await.unwrap_err();
    match err {
        EngineError::Callback { agent_id, source } => {
            assert_eq!(agent_id, "b1");
            assert!(matches!(source, CallbackError::Timeout(d) if d == Duration::from_secs(2)));
        }
        other => panic!("expected a callback timeout, got {other:?}"),
    }
    let stored = arena.store.get_contest(&contest.id).unwrap().unwrap();
    assert_eq!(stored.state, ContestState::Round1);
    assert!(arena
        .store
        .get_post(&contest.id, "t1", Round::Round1)
        .unwrap()
        .is_some());
    assert!(arena
        .store
        .get_post(&contest.id, "t2", Round::Round1)
        .unwrap()
        .is_none());

    let report = engine.advance(&contest.id).await.unwrap();
    assert_eq!(report.to, ContestState::Round2);
    assert_eq!(report.posts_recorded, 1);
    assert_eq!(arena.channel.calls_to("a1", Some(Round::Round1)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_voter_is_skipped_at_vote_timeout() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1"]);
    arena.agent("n1");
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    arena.channel.vote("a1", Choice::A);
    arena.channel.vote("b1", Choice::B);
    arena.channel.vote("n1", Choice::A);
    arena.channel.hang_next("n1");

    let config = JoustConfig {
        callback_timeout_ms: 10_000,
        ..Arena::config(VoteScope::All)
    };
    let engine = arena.engine_with(Arc::new(RulesStrategy), config);
    let contest = arena.contest(&engine, &["t1", "t2"]);
    for _ in 0..3 {
        engine.advance(&contest.id).await.unwrap();
    }

    let started = tokio::time::Instant::now();
    let report = engine.advance(&contest.id).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.to, ContestState::Done);
    assert_eq!(report.votes_recorded, 2);
    assert!(arena.store.get_vote(&contest.id, "n1").unwrap().is_none());
    assert_eq!(report.results.unwrap().vote_totals.total(), 2);
    // Capped at four seconds, not the ten-second round timeout.
    assert!(elapsed >= Duration::from_secs(4), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "{elapsed:?}");
}

// ── Forfeits ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_protocol_violations_forfeit() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1"]);
    arena.agent("n1");
    arena.channel.round1("a1", "come see www.example.com");
    arena.channel.round1("b1", "ready");
    arena.channel.round2("a1", Choice::A, "soup");
    arena
        .channel
        .raw_round2("b1", json!({ "message": "salad, no choice given" }));
    arena.channel.vote("n1", Choice::B);

    let engine = arena.engine();
    let contest = arena.contest(&engine, &["t1", "t2"]);
    let token = contest.required_token();
    engine.advance(&contest.id).await.unwrap();

    let round1 = engine.advance(&contest.id).await.unwrap();
    assert_eq!(round1.forfeits, 1);
    let post = arena
        .store
        .get_post(&contest.id, "t1", Round::Round1)
        .unwrap()
        .unwrap();
    assert!(post.forfeit);
    assert_eq!(post.message, format!("{token} (forfeit)"));
    let post = arena
        .store
        .get_post(&contest.id, "t2", Round::Round1)
        .unwrap()
        .unwrap();
    assert_eq!(post.message, format!("{token} ready"));

    let round2 = engine.advance(&contest.id).await.unwrap();
    assert_eq!(round2.forfeits, 1);

    let results = engine.run_to_completion(&contest.id).await.unwrap();
    let t2 = results.tribe("t2").unwrap();
    assert_eq!(t2.choice, None);
    assert_eq!(t2.persuasion_score, 0);
    // Nobody stands on B, so the ranking falls back to every tribe.
    assert_eq!(results.winning_option, Some(Choice::B));
    assert_eq!(results.winner_tribe_id.as_deref(), Some("t1"));
}

// ── Conquest ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_conquest_moves_four() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1", "a2"]);
    arena.tribe("t2", &["b1", "b2"]);
    arena.tribe("t3", &["c1", "c2"]);
    arena.agent("n1");
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    script_rounds(&arena, "c1", Choice::B);
    arena.channel.vote("n1", Choice::A);

    let engine = arena.engine();
    let contest = arena.contest(&engine, &["t1", "t2", "t3"]);
    let results = engine.run_to_completion(&contest.id).await.unwrap();

    assert_eq!(results.winner_tribe_id.as_deref(), Some("t1"));
    assert_eq!(results.migration.moved_total, 4);
    assert_eq!(results.migration.moved_from_tribes.get("t2"), Some(&2));
    assert_eq!(results.migration.moved_from_tribes.get("t3"), Some(&2));
    assert_eq!(arena.store.list_members("t1").unwrap().len(), 6);
    assert!(arena.store.list_members("t3").unwrap().is_empty());
}

// ── Decision strategies ────────────────────────────────────────────

struct FixedAnalyst(&'static str);

#[async_trait]
impl Analyst for FixedAnalyst {
    fn name(&self) -> String {
        "fixed".into()
    }

    async fn analyze(&self, _: &AnalysisRequest) -> Result<AnalystVerdict, AnalysisError> {
        Ok(AnalystVerdict {
            winner_tribe_id: self.0.into(),
            confidence: 0.9,
            verdict: "Bold.".into(),
            highlights: vec![],
        })
    }
}

fn ai_arena() -> Arena {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1"]);
    arena.agent("n1");
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    arena.channel.vote("n1", Choice::A);
    arena
}

#[tokio::test]
async fn test_unknown_analyst_winner_uses_heuristic() {
    let arena = ai_arena();
    let strategy = Arc::new(AiStrategy::new(Some(Arc::new(FixedAnalyst("t-ghost")))));
    let engine = arena.engine_with(strategy, Arena::config(VoteScope::All));
    let contest = arena.contest(&engine, &["t1", "t2"]);
    let results = engine.run_to_completion(&contest.id).await.unwrap();

    assert_eq!(results.decision.mode, DecisionMode::Ai);
    assert!(results.decision.fallback);
    assert_eq!(results.decision.source, "heuristic");
    assert_eq!(results.winner_tribe_id.as_deref(), Some("t1"));
}

#[tokio::test]
async fn test_analyst_can_crown_the_underdog() {
    let arena = ai_arena();
    let strategy = Arc::new(AiStrategy::new(Some(Arc::new(FixedAnalyst("t2")))));
    let engine = arena.engine_with(strategy, Arena::config(VoteScope::All));
    let contest = arena.contest(&engine, &["t1", "t2"]);
    let results = engine.run_to_completion(&contest.id).await.unwrap();

    assert!(!results.decision.fallback);
    assert_eq!(results.decision.confidence, Some(0.9));
    assert_eq!(results.winner_tribe_id.as_deref(), Some("t2"));
    assert_eq!(results.winning_option, Some(Choice::B));
    assert_eq!(results.tribe("t2").unwrap().delta_infamy, 6 + 8);
    assert_eq!(results.tribe("t1").unwrap().delta_infamy, -6 + 1);
}

#[tokio::test]
async fn test_ai_without_analyst_explains_fallback() {
    let arena = ai_arena();
    let engine = arena.engine_with(
        Arc::new(AiStrategy::new(None)),
        Arena::config(VoteScope::All),
    );
    let contest = arena.contest(&engine, &["t1", "t2"]);
    let results = engine.run_to_completion(&contest.id).await.unwrap();
    assert!(results.decision.fallback);
    assert!(results.decision.verdict.contains("credential"));
    assert_eq!(results.winner_tribe_id.as_deref(), Some("t1"));
}

// ── Vote scope ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_contest_tribes_scope_skips_outsiders() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1"]);
    arena.tribe("t9", &["z1"]);
    arena.agent("n1");
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    for agent in ["a1", "b1", "z1", "n1"] {
        arena.channel.vote(agent, Choice::A);
    }

    let engine = arena.engine_with(
        Arc::new(RulesStrategy),
        Arena::config(VoteScope::ContestTribes),
    );
    let contest = arena.contest(&engine, &["t1", "t2"]);
    let results = engine.run_to_completion(&contest.id).await.unwrap();

    assert_eq!(results.vote_totals.total(), 2);
    assert_eq!(arena.channel.calls_to("z1", None), 0);
    assert_eq!(arena.channel.calls_to("n1", None), 0);
}

#[tokio::test]
async fn test_prior_votes_are_not_polled_again() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1"]);
    arena.agent("n1");
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    arena.channel.vote("a1", Choice::A);
    arena.channel.vote("b1", Choice::B);

    let engine = arena.engine();
    let contest = arena.contest(&engine, &["t1", "t2"]);
    for _ in 0..3 {
        engine.advance(&contest.id).await.unwrap();
    }
    arena
        .store
        .put_vote(&joust::store::Vote::new(&contest.id, "n1", Choice::B))
        .unwrap();

    let results = engine.run_to_completion(&contest.id).await.unwrap();
    assert_eq!(arena.channel.calls_to("n1", None), 0);
    assert_eq!(results.vote_totals.b, 2);
    assert_eq!(results.winner_tribe_id.as_deref(), Some("t2"));
}

// ── Concurrency ────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_advances_serialize() {
    let arena = Arena::new();
    arena.tribe("t1", &["a1"]);
    arena.tribe("t2", &["b1"]);
    script_rounds(&arena, "a1", Choice::A);
    script_rounds(&arena, "b1", Choice::B);
    arena.channel.slow(Duration::from_millis(30));

    let engine = Arc::new(arena.engine());
    let contest = arena.contest(&engine, &["t1", "t2"]);
    engine.advance(&contest.id).await.unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            let id = contest.id.clone();
            tokio::spawn(async move { engine.advance(&id).await })
        })
        .collect();
    let mut transitions = Vec::new();
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        transitions.push((report.from, report.to));
    }
    transitions.sort_by_key(|(from, _)| from.as_str());

    assert!(transitions.contains(&(ContestState::Round1, ContestState::Round2)));
    assert!(transitions.contains(&(ContestState::Round2, ContestState::Vote)));
    for leader in ["a1", "b1"] {
        assert_eq!(arena.channel.calls_to(leader, Some(Round::Round1)), 1);
        assert_eq!(arena.channel.calls_to(leader, Some(Round::Round2)), 1);
    }
}
