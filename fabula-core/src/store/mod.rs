//! Persistence seam for narratives and the discovery graph.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    CompletionReason, ConnectionEdge, Entity, EntityOverride, Evaluation, Installment,
    MentionEdge, Narrative, NarrativeId, NarrativeStatus, RelatednessEdge, Theme,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("narrative {0} not found")]
    NotFound(NarrativeId),
    #[error("narrative {narrative_id} is {status}; no further writes accepted")]
    Terminal {
        narrative_id: NarrativeId,
        status: NarrativeStatus,
    },
    #[error("narrative {narrative_id} already evaluated at installment {order}")]
    DuplicateEvaluation {
        narrative_id: NarrativeId,
        order: u32,
    },
    #[error("narrative {narrative_id} expected installment order {expected}, got {got}")]
    OrderGap {
        narrative_id: NarrativeId,
        expected: u32,
        got: u32,
    },
    #[error("entity {0:?} not found")]
    UnknownEntity(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A narrative with everything attached to it, for detail views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeDetail {
    pub narrative: Narrative,
    pub installments: Vec<Installment>,
    pub evaluations: Vec<Evaluation>,
    pub mentions: Vec<MentionEdge>,
    pub themes: Vec<String>,
}

/// Storage operations the orchestrator and discovery engine need.
///
/// Installment orders within a narrative are contiguous from 1; the store
/// enforces that, along with terminal-state immutability and evaluation
/// uniqueness per order.
#[async_trait]
pub trait NarrativeStore: Send + Sync {
    async fn create_narrative(&self, narrative: Narrative) -> Result<(), StoreError>;

    async fn get_narrative(&self, id: NarrativeId) -> Result<Narrative, StoreError>;

    /// All narratives in the given status, oldest first.
    async fn list_by_status(&self, status: NarrativeStatus)
        -> Result<Vec<Narrative>, StoreError>;

    /// The last `limit` installments, ascending by order.
    async fn recent_installments(
        &self,
        id: NarrativeId,
        limit: u32,
    ) -> Result<Vec<Installment>, StoreError>;

    /// Append the next installment. Fails on terminal narratives and on any
    /// order other than `installment_count + 1`.
    async fn append_installment(
        &self,
        id: NarrativeId,
        installment: Installment,
    ) -> Result<(), StoreError>;

    /// Record an evaluation. Fails on terminal narratives and on a second
    /// evaluation for the same installment order.
    async fn append_evaluation(
        &self,
        id: NarrativeId,
        evaluation: Evaluation,
    ) -> Result<(), StoreError>;

    async fn has_evaluation(&self, id: NarrativeId, order: u32) -> Result<bool, StoreError>;

    async fn list_evaluations(&self, id: NarrativeId) -> Result<Vec<Evaluation>, StoreError>;

    /// Move a narrative out of the active pool. Fails if it is already
    /// terminal.
    async fn mark_terminal(
        &self,
        id: NarrativeId,
        status: NarrativeStatus,
        reason: CompletionReason,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_cover_image(&self, id: NarrativeId, url: &str) -> Result<(), StoreError>;

    async fn fetch_detail(&self, id: NarrativeId) -> Result<NarrativeDetail, StoreError>;

    /// Remove a narrative and everything hanging off it: installments,
    /// evaluations, mention edges, connection edges, and its contribution
    /// to theme counts and relatedness records.
    async fn delete_narrative(&self, id: NarrativeId) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Discovery graph
    // ------------------------------------------------------------------

    /// Insert or merge an entity record keyed by canonical name.
    async fn upsert_entity(&self, entity: Entity) -> Result<(), StoreError>;

    async fn get_entity(&self, canonical: &str) -> Result<Option<Entity>, StoreError>;

    async fn list_entities(&self) -> Result<Vec<Entity>, StoreError>;

    async fn set_entity_importance(
        &self,
        canonical: &str,
        importance: f64,
    ) -> Result<(), StoreError>;

    /// Insert or merge a narrative-to-entity mention edge.
    async fn upsert_mention(&self, mention: MentionEdge) -> Result<(), StoreError>;

    /// Replace every mention edge of a narrative with a fresh set, then
    /// recompute the total mention count of each entity touched (old set
    /// or new) from the edges that remain. Extraction recounts from the
    /// full text each sweep, so its writes must not stack.
    async fn replace_mentions(
        &self,
        id: NarrativeId,
        mentions: Vec<MentionEdge>,
    ) -> Result<(), StoreError>;

    async fn list_mentions(&self, id: NarrativeId) -> Result<Vec<MentionEdge>, StoreError>;

    /// Attach a theme to a narrative, creating the theme if new.
    async fn upsert_theme(
        &self,
        id: NarrativeId,
        name: &str,
        category: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Canonical theme names on a narrative, sorted.
    async fn list_themes(&self, id: NarrativeId) -> Result<Vec<String>, StoreError>;

    async fn list_all_themes(&self) -> Result<Vec<Theme>, StoreError>;

    /// Insert or replace a curation rule, keyed by scope and name.
    async fn put_override(&self, rule: EntityOverride) -> Result<(), StoreError>;

    /// Rules applying to a narrative: its own plus the global ones.
    async fn list_overrides(&self, id: NarrativeId) -> Result<Vec<EntityOverride>, StoreError>;

    /// Overwrite the connection record for the edge's narrative pair.
    async fn upsert_connection(&self, edge: ConnectionEdge) -> Result<(), StoreError>;

    /// All connections with weight >= `min_weight`, strongest first.
    async fn connection_graph(&self, min_weight: f64) -> Result<Vec<ConnectionEdge>, StoreError>;

    /// Overwrite the relatedness record for the edge's entity pair.
    async fn upsert_relatedness(&self, edge: RelatednessEdge) -> Result<(), StoreError>;

    async fn list_relatedness(&self) -> Result<Vec<RelatednessEdge>, StoreError>;
}
