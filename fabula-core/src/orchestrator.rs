//! Pool and lifecycle orchestration.
//!
//! Each tick does three things, in order: bring the active population back
//! inside its configured floor and ceiling, write an installment for every
//! narrative that is due one, and evaluate narratives that hit an
//! evaluation checkpoint. Narratives spawned during a tick are not
//! processed until the next tick; the tick works from a snapshot of the
//! active set taken at entry.
//!
//! Per-narrative failures never abort a tick. A transient gateway error
//! simply leaves the narrative due again next tick.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{info, warn};

use crate::chaos::{ChaosRanges, ChaosVector};
use crate::config::{ConfigError, ConfigUpdate, PoolConfig};
use crate::gateway::{
    ContentGateway, CoverBrief, EvaluationContext, GatewayError, GatewaySettings,
    InstallmentContext, ObjectStorage, PassthroughStorage,
};
use crate::model::{
    CompletionReason, Evaluation, EvaluationId, Installment, InstallmentId, Narrative,
    NarrativeId, NarrativeStatus,
};
use crate::notify::{EventNotifier, LifecycleEvent, NullNotifier};
use crate::score::{score_evaluation, RawScores};
use crate::store::{NarrativeStore, StoreError};

/// How many narratives are processed concurrently within a tick.
const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
enum ProcessError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counts of what one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub spawned: u32,
    pub generated: u32,
    pub evaluated: u32,
    pub completed: u32,
    pub failed: u32,
}

/// Counts from a cover backfill pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoverReport {
    pub stored: u32,
    pub failed: u32,
}

#[derive(Debug, Default)]
struct NarrativeOutcome {
    generated: bool,
    evaluated: bool,
    completed: bool,
    failed: bool,
}

/// Drives the narrative pool against a store and a content gateway.
pub struct Orchestrator<S, G, N = NullNotifier> {
    store: Arc<S>,
    gateway: Arc<G>,
    notifier: Arc<N>,
    storage: Arc<dyn ObjectStorage>,
    config: PoolConfig,
    settings: GatewaySettings,
    concurrency: usize,
}

impl<S, G> Orchestrator<S, G, NullNotifier>
where
    S: NarrativeStore,
    G: ContentGateway,
{
    pub fn new(store: Arc<S>, gateway: Arc<G>, config: PoolConfig) -> Self {
        Self {
            store,
            gateway,
            notifier: Arc::new(NullNotifier),
            storage: Arc::new(PassthroughStorage),
            config,
            settings: GatewaySettings::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl<S, G, N> Orchestrator<S, G, N>
where
    S: NarrativeStore,
    G: ContentGateway,
    N: EventNotifier,
{
    pub fn with_notifier<M: EventNotifier>(self, notifier: Arc<M>) -> Orchestrator<S, G, M> {
        Orchestrator {
            store: self.store,
            gateway: self.gateway,
            notifier,
            storage: self.storage,
            config: self.config,
            settings: self.settings,
            concurrency: self.concurrency,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_settings(mut self, settings: GatewaySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Apply a validated partial config update. Takes effect next tick.
    pub fn update_config(&mut self, update: &ConfigUpdate) -> Result<(), ConfigError> {
        self.config = self.config.apply(update)?;
        Ok(())
    }

    /// Run one tick: pool maintenance, then generation and evaluation over
    /// the active snapshot.
    pub async fn run_tick(&self) -> Result<TickSummary, TickError> {
        let now = Utc::now();
        let active = self
            .store
            .list_by_status(NarrativeStatus::Active)
            .await?;
        let mut summary = TickSummary::default();
        let mut excluded: HashSet<NarrativeId> = HashSet::new();

        let count = active.len() as u32;
        if count < self.config.min_active_narratives {
            let deficit = self.config.min_active_narratives - count;
            for _ in 0..deficit {
                match self.spawn_narrative(now).await {
                    Ok(id) => {
                        info!(narrative = %id, "narrative spawned");
                        summary.spawned += 1;
                    }
                    Err(err) => {
                        warn!(error = %err, "spawn failed");
                        summary.failed += 1;
                    }
                }
            }
        } else if count > self.config.max_active_narratives {
            // Oldest first; list_by_status already sorts by creation time.
            let excess = (count - self.config.max_active_narratives) as usize;
            for victim in active.iter().take(excess) {
                excluded.insert(victim.id);
                match self
                    .complete(victim.id, CompletionReason::PoolCeiling, now)
                    .await
                {
                    Ok(true) => summary.completed += 1,
                    Ok(false) => {}
                    Err(err) => {
                        warn!(narrative = %victim.id, error = %err, "ceiling completion failed");
                        summary.failed += 1;
                    }
                }
            }
        }

        let work: Vec<Narrative> = active
            .into_iter()
            .filter(|n| !excluded.contains(&n.id))
            .collect();
        let outcomes: Vec<NarrativeOutcome> = stream::iter(work)
            .map(|narrative| self.process_narrative(narrative.id, now))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        for outcome in outcomes {
            summary.generated += outcome.generated as u32;
            summary.evaluated += outcome.evaluated as u32;
            summary.completed += outcome.completed as u32;
            summary.failed += outcome.failed as u32;
        }

        info!(
            spawned = summary.spawned,
            generated = summary.generated,
            evaluated = summary.evaluated,
            completed = summary.completed,
            failed = summary.failed,
            "tick finished"
        );
        Ok(summary)
    }

    /// Tick forever on a fixed cadence. Only returns on store failure.
    pub async fn run_forever(
        &self,
        tick_interval: std::time::Duration,
    ) -> Result<(), TickError> {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            self.run_tick().await?;
        }
    }

    /// Terminate a narrative by operator request.
    pub async fn kill(&self, id: NarrativeId) -> Result<(), StoreError> {
        self.store
            .mark_terminal(id, NarrativeStatus::Killed, CompletionReason::Killed, Utc::now())
            .await?;
        self.notifier.publish(LifecycleEvent::NarrativeCompleted {
            narrative_id: id,
            reason: CompletionReason::Killed,
        });
        Ok(())
    }

    /// Generate and store cover images for completed narratives that lack
    /// one.
    pub async fn backfill_covers(&self) -> Result<CoverReport, TickError> {
        let completed = self
            .store
            .list_by_status(NarrativeStatus::Completed)
            .await?;
        let mut report = CoverReport::default();
        for narrative in completed.iter().filter(|n| n.cover_image_url.is_none()) {
            let brief = CoverBrief {
                narrative_id: narrative.id,
                title: narrative.title.clone(),
                premise: narrative.premise.clone(),
            };
            let provider_url = match self.gateway.generate_cover_image(&brief).await {
                Ok(url) => url,
                Err(err) => {
                    warn!(narrative = %narrative.id, error = %err, "cover generation failed");
                    report.failed += 1;
                    continue;
                }
            };
            match self.storage.store_image(narrative.id, &provider_url).await {
                Ok(stored_url) => {
                    self.store.set_cover_image(narrative.id, &stored_url).await?;
                    self.notifier.publish(LifecycleEvent::CoverImageReady {
                        narrative_id: narrative.id,
                        url: stored_url,
                    });
                    report.stored += 1;
                }
                Err(err) => {
                    warn!(narrative = %narrative.id, error = %err, "cover upload failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Per-narrative processing
    // ------------------------------------------------------------------

    async fn process_narrative(&self, id: NarrativeId, now: DateTime<Utc>) -> NarrativeOutcome {
        let mut outcome = NarrativeOutcome::default();
        let narrative = match self.store.get_narrative(id).await {
            Ok(n) => n,
            Err(err) => {
                warn!(narrative = %id, error = %err, "narrative vanished mid-tick");
                outcome.failed = true;
                return outcome;
            }
        };
        if !narrative.is_active() {
            return outcome;
        }

        // A narrative carried past the cap (after a config change, say)
        // completes before anything else happens to it.
        if narrative.installment_count >= self.config.max_chapters_per_story {
            self.finish(&mut outcome, id, CompletionReason::MaxLength, now)
                .await;
            return outcome;
        }

        let narrative = if narrative
            .due_for_installment(now, self.config.chapter_interval_seconds)
        {
            match self.generate_installment(narrative, now).await {
                Ok(updated) => {
                    outcome.generated = true;
                    updated
                }
                Err(err) => {
                    warn!(narrative = %id, error = %err, "installment generation failed");
                    outcome.failed = true;
                    return outcome;
                }
            }
        } else {
            narrative
        };

        if narrative.installment_count >= self.config.max_chapters_per_story {
            self.finish(&mut outcome, id, CompletionReason::MaxLength, now)
                .await;
            return outcome;
        }

        match self.evaluation_due(&narrative).await {
            Ok(false) => {}
            Ok(true) => match self.evaluate(&narrative, now).await {
                Ok(below_floor) => {
                    outcome.evaluated = true;
                    if below_floor {
                        self.finish(&mut outcome, id, CompletionReason::QualityThreshold, now)
                            .await;
                    }
                }
                Err(err) => {
                    warn!(narrative = %id, error = %err, "evaluation failed");
                    outcome.failed = true;
                }
            },
            Err(err) => {
                warn!(narrative = %id, error = %err, "evaluation lookup failed");
                outcome.failed = true;
            }
        }
        outcome
    }

    async fn finish(
        &self,
        outcome: &mut NarrativeOutcome,
        id: NarrativeId,
        reason: CompletionReason,
        now: DateTime<Utc>,
    ) {
        match self.complete(id, reason, now).await {
            Ok(true) => outcome.completed = true,
            Ok(false) => {}
            Err(err) => {
                warn!(narrative = %id, error = %err, "completion failed");
                outcome.failed = true;
            }
        }
    }

    /// Mark a narrative completed. Returns false when it was already
    /// terminal, which is not an error here: another path got there first.
    async fn complete(
        &self,
        id: NarrativeId,
        reason: CompletionReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self
            .store
            .mark_terminal(id, NarrativeStatus::Completed, reason, now)
            .await
        {
            Ok(()) => {
                info!(narrative = %id, reason = %reason, "narrative completed");
                self.notifier.publish(LifecycleEvent::NarrativeCompleted {
                    narrative_id: id,
                    reason,
                });
                Ok(true)
            }
            Err(StoreError::Terminal { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    async fn spawn_narrative(&self, now: DateTime<Utc>) -> Result<NarrativeId, ProcessError> {
        let seed = self.gateway.generate_premise(&self.settings.premise).await?;
        let mut rng = StdRng::from_entropy();
        let narrative = Narrative {
            id: NarrativeId::new(),
            title: seed.title.clone(),
            premise: seed.premise,
            premise_themes: seed.themes,
            style: seed.style,
            status: NarrativeStatus::Active,
            chaos_initial: ChaosVector::sample_initial(self.config.chaos_initial, &mut rng),
            chaos_ranges: ChaosRanges::uniform(self.config.chaos_increment),
            installment_count: 0,
            total_tokens: 0,
            cover_image_url: None,
            created_at: now,
            last_installment_at: None,
            completed_at: None,
            completion_reason: None,
        };
        let id = narrative.id;
        self.store.create_narrative(narrative).await?;
        self.notifier.publish(LifecycleEvent::NarrativeSpawned {
            narrative_id: id,
            title: seed.title,
        });
        Ok(id)
    }

    async fn generate_installment(
        &self,
        mut narrative: Narrative,
        now: DateTime<Utc>,
    ) -> Result<Narrative, ProcessError> {
        let recent = self
            .store
            .recent_installments(narrative.id, self.config.context_window)
            .await?;
        let order = narrative.installment_count + 1;

        // Installment 1 gets the spawn-time initial vector verbatim; later
        // installments advance from the last persisted vector so stored
        // increments are never resampled.
        let chaos = if order == 1 {
            narrative.chaos_initial
        } else {
            let mut rng = StdRng::from_entropy();
            let last = recent
                .last()
                .map(|i| i.chaos)
                .unwrap_or(narrative.chaos_initial);
            last.advance(&narrative.chaos_ranges, &mut rng)
        };

        let draft = self
            .gateway
            .generate_installment(InstallmentContext {
                narrative: &narrative,
                recent: &recent,
                order,
                chaos,
                settings: &self.settings.installment,
            })
            .await?;

        let installment = Installment {
            id: InstallmentId::new(),
            narrative_id: narrative.id,
            order,
            body: draft.body,
            chaos,
            intensity: draft.intensity,
            tokens_used: draft.tokens_used,
            latency_ms: draft.latency_ms,
            model: draft.model,
            created_at: now,
        };
        self.store
            .append_installment(narrative.id, installment)
            .await?;
        self.notifier.publish(LifecycleEvent::InstallmentAdded {
            narrative_id: narrative.id,
            order,
        });

        narrative.installment_count = order;
        narrative.last_installment_at = Some(now);
        Ok(narrative)
    }

    async fn evaluation_due(&self, narrative: &Narrative) -> Result<bool, StoreError> {
        let count = narrative.installment_count;
        if count < self.config.min_chapters_before_eval {
            return Ok(false);
        }
        if count == 0 || count % self.config.evaluation_interval_chapters != 0 {
            return Ok(false);
        }
        Ok(!self.store.has_evaluation(narrative.id, count).await?)
    }

    /// Evaluate a narrative at its current installment count. Returns true
    /// when the verdict says to stop, either by score or explicitly.
    async fn evaluate(
        &self,
        narrative: &Narrative,
        now: DateTime<Utc>,
    ) -> Result<bool, ProcessError> {
        let recent = self
            .store
            .recent_installments(narrative.id, self.config.context_window)
            .await?;
        let draft = self
            .gateway
            .generate_evaluation(EvaluationContext {
                narrative,
                recent: &recent,
                quality_floor: self.config.quality_score_min,
                settings: &self.settings.evaluation,
            })
            .await?;

        let scored = score_evaluation(
            RawScores {
                coherence: draft.coherence,
                novelty: draft.novelty,
                engagement: draft.engagement,
                pacing: draft.pacing,
            },
            draft.issues.len(),
            &self.config.weights,
        );

        let evaluation = Evaluation {
            id: EvaluationId::new(),
            narrative_id: narrative.id,
            installment_order: narrative.installment_count,
            scores: scored.scores,
            overall: scored.overall,
            should_continue: draft.should_continue,
            reasoning: draft.reasoning,
            issues: draft.issues,
            evaluated_at: now,
        };
        self.store
            .append_evaluation(narrative.id, evaluation)
            .await?;
        self.notifier.publish(LifecycleEvent::NarrativeEvaluated {
            narrative_id: narrative.id,
            installment_order: narrative.installment_count,
            overall: scored.overall,
        });

        Ok(scored.overall < self.config.quality_score_min || !draft.should_continue)
    }
}
