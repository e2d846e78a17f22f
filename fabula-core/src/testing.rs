//! Test doubles for driving the orchestrator without a model behind it.
//!
//! [`MockGateway`] plays back scripted responses per operation and falls
//! back to sensible defaults when a queue runs dry, so a test only scripts
//! the calls it cares about.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::PoolConfig;
use crate::gateway::{
    ContentGateway, CoverBrief, EvaluationContext, EvaluationDraft, GatewayError,
    GenerationSettings, InstallmentContext, InstallmentDraft, PremiseSeed,
};
use crate::model::{CompletionReason, Narrative, NarrativeStatus, StyleProfile};
use crate::notify::{ChannelNotifier, LifecycleEvent};
use crate::orchestrator::{Orchestrator, TickError, TickSummary};
use crate::store::{MemoryStore, NarrativeStore};

/// Uniform evaluator verdict at the given 0..=10 score, continuing.
pub fn scores(value: f64) -> EvaluationDraft {
    EvaluationDraft {
        coherence: value,
        novelty: value,
        engagement: value,
        pacing: value,
        should_continue: true,
        reasoning: "Scripted verdict.".to_string(),
        issues: vec![],
    }
}

type Queue<T> = Mutex<VecDeque<Result<T, GatewayError>>>;

fn pop<T>(queue: &Queue<T>) -> Option<Result<T, GatewayError>> {
    queue.lock().expect("mock queue poisoned").pop_front()
}

fn push<T>(queue: &Queue<T>, item: Result<T, GatewayError>) {
    queue.lock().expect("mock queue poisoned").push_back(item);
}

/// Scripted [`ContentGateway`].
#[derive(Default)]
pub struct MockGateway {
    premises: Queue<PremiseSeed>,
    installments: Queue<InstallmentDraft>,
    evaluations: Queue<EvaluationDraft>,
    covers: Queue<String>,
    spawn_counter: AtomicU32,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_premise(&self, seed: PremiseSeed) {
        push(&self.premises, Ok(seed));
    }

    pub fn queue_installment(&self, body: impl Into<String>) {
        push(
            &self.installments,
            Ok(InstallmentDraft {
                body: body.into(),
                intensity: BTreeMap::new(),
                tokens_used: Some(120),
                latency_ms: Some(900),
                model: None,
            }),
        );
    }

    pub fn queue_evaluation(&self, mut draft: EvaluationDraft, should_continue: bool) {
        draft.should_continue = should_continue;
        push(&self.evaluations, Ok(draft));
    }

    pub fn fail_next_premise(&self, err: GatewayError) {
        push(&self.premises, Err(err));
    }

    pub fn fail_next_installment(&self, err: GatewayError) {
        push(&self.installments, Err(err));
    }

    pub fn fail_next_evaluation(&self, err: GatewayError) {
        push(&self.evaluations, Err(err));
    }

    pub fn fail_next_cover(&self, err: GatewayError) {
        push(&self.covers, Err(err));
    }

    fn default_premise(&self) -> PremiseSeed {
        let n = self.spawn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        PremiseSeed {
            title: format!("Untitled Drift {n}"),
            premise: format!("Tom takes job number {n} and regrets it in a new way."),
            themes: vec!["drift".to_string()],
            style: StyleProfile {
                style_authors: vec!["Scripted Author".to_string()],
                perspective: "third".to_string(),
                tone: "deadpan".to_string(),
                genre_tags: vec!["absurdist".to_string()],
                tom_variant: "Tom the Contractor".to_string(),
            },
        }
    }
}

#[async_trait]
impl ContentGateway for MockGateway {
    async fn generate_premise(
        &self,
        _settings: &GenerationSettings,
    ) -> Result<PremiseSeed, GatewayError> {
        pop(&self.premises).unwrap_or_else(|| Ok(self.default_premise()))
    }

    async fn generate_installment(
        &self,
        ctx: InstallmentContext<'_>,
    ) -> Result<InstallmentDraft, GatewayError> {
        pop(&self.installments).unwrap_or_else(|| {
            Ok(InstallmentDraft {
                body: format!("Installment {} finds Tom undeterred.", ctx.order),
                intensity: BTreeMap::from([("menace".to_string(), 0.4)]),
                tokens_used: Some(120),
                latency_ms: Some(900),
                model: None,
            })
        })
    }

    async fn generate_evaluation(
        &self,
        _ctx: EvaluationContext<'_>,
    ) -> Result<EvaluationDraft, GatewayError> {
        pop(&self.evaluations).unwrap_or_else(|| Ok(scores(8.0)))
    }

    async fn generate_cover_image(&self, brief: &CoverBrief) -> Result<String, GatewayError> {
        pop(&self.covers)
            .unwrap_or_else(|| Ok(format!("https://images.test/{}.png", brief.narrative_id)))
    }
}

/// A pool wired to in-memory storage and a scripted gateway, with the
/// event stream captured.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub orchestrator: Orchestrator<MemoryStore, MockGateway, ChannelNotifier>,
    pub events: UnboundedReceiver<LifecycleEvent>,
}

impl TestHarness {
    pub fn new(config: PoolConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let (notifier, events) = ChannelNotifier::pair();
        let orchestrator = Orchestrator::new(store.clone(), gateway.clone(), config)
            .with_notifier(Arc::new(notifier));
        Self {
            store,
            gateway,
            orchestrator,
            events,
        }
    }

    pub async fn tick(&self) -> Result<TickSummary, TickError> {
        self.orchestrator.run_tick().await
    }

    pub async fn active(&self) -> Vec<Narrative> {
        self.store
            .list_by_status(NarrativeStatus::Active)
            .await
            .expect("in-memory store cannot fail")
    }

    /// Run N ticks, rewinding every active narrative's installment clock
    /// between them so interval gating never blocks.
    pub async fn tick_fast(&self, ticks: usize) -> Result<(), TickError> {
        for _ in 0..ticks {
            self.tick().await?;
            for narrative in self.active().await {
                self.store
                    .backdate_last_installment(
                        narrative.id,
                        self.orchestrator.config().chapter_interval_seconds as i64 + 1,
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// Drain events captured so far.
    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Assert a narrative finished for the expected reason.
#[track_caller]
pub fn assert_completed(narrative: &Narrative, reason: CompletionReason) {
    assert_eq!(
        narrative.status,
        NarrativeStatus::Completed,
        "narrative {} is {}, expected completed",
        narrative.id,
        narrative.status
    );
    assert_eq!(
        narrative.completion_reason,
        Some(reason),
        "narrative {} completed for {:?}, expected {reason}",
        narrative.id,
        narrative.completion_reason
    );
}

/// Assert a narrative is still active.
#[track_caller]
pub fn assert_active(narrative: &Narrative) {
    assert_eq!(
        narrative.status,
        NarrativeStatus::Active,
        "narrative {} is {}, expected active",
        narrative.id,
        narrative.status
    );
}
