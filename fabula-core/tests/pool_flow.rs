//! End-to-end pool flow against in-memory storage and a scripted gateway.

use fabula_core::config::PoolConfig;
use fabula_core::discovery::DiscoveryEngine;
use fabula_core::extract::EntityExtractor;
use fabula_core::gateway::PremiseSeed;
use fabula_core::model::{CompletionReason, NarrativeStatus, StyleProfile};
use fabula_core::notify::LifecycleEvent;
use fabula_core::store::NarrativeStore;
use fabula_core::testing::{assert_active, assert_completed, TestHarness};

fn seed(title: &str, premise: &str, themes: &[&str]) -> PremiseSeed {
    PremiseSeed {
        title: title.to_string(),
        premise: premise.to_string(),
        themes: themes.iter().map(|t| t.to_string()).collect(),
        style: StyleProfile::default(),
    }
}

#[tokio::test]
async fn test_pool_grows_generates_and_stays_bounded() {
    let config = PoolConfig {
        min_active_narratives: 2,
        max_active_narratives: 4,
        max_chapters_per_story: 3,
        chapter_interval_seconds: 10,
        ..PoolConfig::default()
    };
    let mut harness = TestHarness::new(config);

    harness.tick().await.unwrap();
    assert_eq!(harness.active().await.len(), 2);
    for narrative in &harness.active().await {
        assert_active(narrative);
    }

    // Three fast ticks push every narrative to its 3-installment cap; the
    // fourth completes them and respawns replacements.
    harness.tick_fast(4).await.unwrap();
    let completed = harness
        .store
        .list_by_status(NarrativeStatus::Completed)
        .await
        .unwrap();
    assert_eq!(completed.len(), 2);
    for narrative in &completed {
        assert_completed(narrative, CompletionReason::MaxLength);
        assert_eq!(narrative.installment_count, 3);
    }
    // The pool refilled to its floor.
    assert_eq!(harness.active().await.len(), 2);

    let events = harness.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, LifecycleEvent::NarrativeSpawned { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, LifecycleEvent::InstallmentAdded { order: 1, .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        LifecycleEvent::NarrativeCompleted {
            reason: CompletionReason::MaxLength,
            ..
        }
    )));
}

#[tokio::test]
async fn test_extraction_feeds_discovery() {
    let config = PoolConfig {
        min_active_narratives: 2,
        max_active_narratives: 4,
        chapter_interval_seconds: 10,
        ..PoolConfig::default()
    };
    let harness = TestHarness::new(config);

    harness.gateway.queue_premise(seed(
        "The Ferry Audit",
        "Tom audits a ferry that only docks in dreams.",
        &["bureaucracy", "water"],
    ));
    harness.gateway.queue_premise(seed(
        "The Ledger of Fog",
        "Tom balances a ledger written in fog.",
        &["bureaucracy", "weather"],
    ));
    // Both narratives mention the same two names repeatedly.
    for _ in 0..4 {
        harness
            .gateway
            .queue_installment("Tom consulted Doctor Voss. Doctor Voss consulted Tom.");
    }

    harness.tick().await.unwrap();
    harness.tick_fast(2).await.unwrap();

    let report = EntityExtractor::default().run(&*harness.store).await.unwrap();
    assert_eq!(report.narratives_scanned, 2);

    let discovery = DiscoveryEngine::new(2, 2).run(&*harness.store).await.unwrap();
    assert_eq!(discovery.connections_upserted, 1);

    let edges = harness.store.connection_graph(0.0).await.unwrap();
    assert_eq!(edges.len(), 1);
    // Two shared entities, a shared premise theme, and a shared keyword.
    assert!(edges[0].shared_entities.contains(&"tom".to_string()));
    assert!(edges[0]
        .shared_entities
        .contains(&"doctor voss".to_string()));
    assert!(edges[0].shared_themes.contains(&"bureaucracy".to_string()));
    assert!(edges[0].shared_themes.contains(&"consulted".to_string()));
    assert!((edges[0].weight - (2.0 * 0.6 + 2.0 * 0.4) / 10.0).abs() < 1e-9);

    let related = harness.store.list_relatedness().await.unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].co_occurrences, 2);
}
