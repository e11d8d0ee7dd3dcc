//! A full session persisted through the SQLite backend.

mod support;

use std::sync::Arc;

use mayhem::engine::Orchestrator;
use mayhem::providers::Providers;
use mayhem::replay::Matcher;
use mayhem::storage::{CaseRepository, SqliteStore};
use mayhem::types::{Decision, DecisionInput, SessionStatus};

use support::{seed_cases, test_config, two_position_request};

#[tokio::test]
async fn test_session_survives_a_fresh_orchestrator() {
    let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
    let seeded = seed_cases();
    assert_eq!(store.insert_cases(&seeded).await.unwrap(), seeded.len());
    // Seeding twice is a no-op.
    assert_eq!(store.insert_cases(&seeded).await.unwrap(), 0);

    let config = test_config(2_000);
    let cases = store.all_cases().await.unwrap();
    assert_eq!(cases.len(), seeded.len());

    let orch = Orchestrator::new(
        config.clone(),
        Providers::scripted(Some(11)),
        Matcher::new(cases.clone(), config.sectors.clone(), Some(11)),
        store.clone(),
        store.clone(),
    );
    let portfolio = orch.create_portfolio(two_position_request()).await.unwrap();
    let session = orch.create_session(portfolio.id, Some(2)).await.unwrap();

    orch.start_round(session.id).await.unwrap();
    orch.submit_decision(
        session.id,
        1,
        DecisionInput {
            decision: Decision::SellHalf,
            opened_data_panel: false,
            decision_latency_secs: 1.5,
        },
    )
    .await
    .unwrap();

    // Pick up where the first process stopped.
    let resumed = Orchestrator::new(
        config.clone(),
        Providers::scripted(Some(12)),
        Matcher::new(cases, config.sectors.clone(), Some(12)),
        store.clone(),
        store.clone(),
    );
    let payload = resumed.start_round(session.id).await.unwrap();
    assert_eq!(payload.round_number, 2);
    resumed
        .submit_decision(
            session.id,
            2,
            DecisionInput {
                decision: Decision::Hold,
                opened_data_panel: true,
                decision_latency_secs: 6.0,
            },
        )
        .await
        .unwrap();

    let stored = resumed.session(session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert!(stored.profile.is_some());
    assert!(resumed.portfolio(portfolio.id).await.unwrap().is_balanced());

    let history = store.decision_history(session.id).await.unwrap();
    assert_eq!(
        history,
        vec![(1, "SELL_HALF".to_string()), (2, "HOLD".to_string())]
    );
}
