//! Domain types for the narrative pool.
//!
//! Narratives, installments, evaluations, and the graph records (entities,
//! mentions, themes, connections, relatedness) that the discovery engine
//! maintains across narratives.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chaos::{ChaosRanges, ChaosVector};

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NarrativeId(pub Uuid);

impl NarrativeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NarrativeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NarrativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for an installment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallmentId(pub Uuid);

impl InstallmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstallmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstallmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationId(pub Uuid);

impl EvaluationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EvaluationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EvaluationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Narrative lifecycle
// ============================================================================

/// Lifecycle state of a narrative. `Completed` and `Killed` are terminal:
/// the store rejects installments and evaluations against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeStatus {
    Active,
    Completed,
    Killed,
}

impl NarrativeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NarrativeStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NarrativeStatus::Active => "active",
            NarrativeStatus::Completed => "completed",
            NarrativeStatus::Killed => "killed",
        }
    }
}

impl fmt::Display for NarrativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a narrative left the active pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionReason {
    /// Completed to bring the pool back under its ceiling.
    PoolCeiling,
    /// Reached the configured maximum installment count.
    MaxLength,
    /// Scored below the quality floor, or the evaluator said to stop.
    QualityThreshold,
    /// Terminated by an operator.
    Killed,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::PoolCeiling => "pool-ceiling",
            CompletionReason::MaxLength => "max-length",
            CompletionReason::QualityThreshold => "quality-threshold",
            CompletionReason::Killed => "killed",
        }
    }
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrative voice settings fixed at spawn time and threaded through every
/// installment prompt.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StyleProfile {
    /// Blend of author voices, one to three names.
    pub style_authors: Vec<String>,
    pub perspective: String,
    pub tone: String,
    pub genre_tags: Vec<String>,
    /// Which incarnation of the recurring protagonist this narrative uses.
    pub tom_variant: String,
}

/// A narrative in the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub id: NarrativeId,
    pub title: String,
    pub premise: String,
    /// Themes declared by the premise, before any are discovered from text.
    pub premise_themes: Vec<String>,
    pub style: StyleProfile,
    pub status: NarrativeStatus,
    /// Chaos vector of the first installment, sampled at spawn.
    pub chaos_initial: ChaosVector,
    /// Per-dimension increment ranges, fixed at spawn.
    pub chaos_ranges: ChaosRanges,
    pub installment_count: u32,
    pub total_tokens: u64,
    pub cover_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_installment_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_reason: Option<CompletionReason>,
}

impl Narrative {
    pub fn is_active(&self) -> bool {
        self.status == NarrativeStatus::Active
    }

    /// Whether this narrative is owed an installment: narratives with no
    /// installments yet are always due, otherwise the configured interval
    /// must have elapsed since the last one.
    pub fn due_for_installment(&self, now: DateTime<Utc>, interval_seconds: u64) -> bool {
        if self.installment_count == 0 {
            return true;
        }
        match self.last_installment_at {
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed.num_seconds() >= interval_seconds as i64
            }
            None => true,
        }
    }
}

/// One installment of a narrative. `order` is 1-indexed and contiguous
/// within a narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub narrative_id: NarrativeId,
    pub order: u32,
    pub body: String,
    /// Chaos vector this installment was generated at. Persisted once and
    /// never recomputed.
    pub chaos: ChaosVector,
    /// Named 0..=1 intensity dimensions reported by the generator.
    pub intensity: BTreeMap<String, f64>,
    pub tokens_used: Option<u32>,
    pub latency_ms: Option<u64>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Normalized per-dimension evaluation scores, each in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub coherence: f64,
    pub novelty: f64,
    pub engagement: f64,
    pub pacing: f64,
}

impl EvaluationScores {
    pub fn as_array(&self) -> [f64; 4] {
        [self.coherence, self.novelty, self.engagement, self.pacing]
    }
}

/// A quality evaluation taken at a specific installment order. At most one
/// evaluation exists per (narrative, order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub narrative_id: NarrativeId,
    /// Installment count of the narrative when this evaluation ran.
    pub installment_order: u32,
    pub scores: EvaluationScores,
    /// Composite score in 0..=1 after penalties and bonuses.
    pub overall: f64,
    pub should_continue: bool,
    pub reasoning: String,
    pub issues: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

// ============================================================================
// Graph records
// ============================================================================

/// Kind of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Character,
    Place,
    Object,
    Concept,
    Organization,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Character => "character",
            EntityKind::Place => "place",
            EntityKind::Object => "object",
            EntityKind::Concept => "concept",
            EntityKind::Organization => "organization",
        }
    }
}

/// Lowercase, whitespace-collapsed form of an entity name. All graph
/// records key entities by this form.
pub fn canonical_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// An entity known to the graph, keyed by canonical name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical (lowercased) name, the identity of this record.
    pub name: String,
    /// Name as it appeared in text.
    pub display_name: String,
    pub kind: EntityKind,
    pub aliases: Vec<String>,
    /// Total mention count across all narratives.
    pub mention_count: u64,
    /// Derived 0..=1 weight from mention volume and narrative spread.
    pub importance: f64,
}

impl Entity {
    pub fn new(display_name: impl Into<String>, kind: EntityKind) -> Self {
        let display_name = display_name.into();
        Self {
            name: canonical_name(&display_name),
            display_name,
            kind,
            aliases: Vec::new(),
            mention_count: 0,
            importance: 0.0,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_mentions(mut self, count: u64) -> Self {
        self.mention_count = count;
        self
    }
}

/// What an [`EntityOverride`] does to a matching extracted name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OverrideAction {
    /// Drop the name entirely; it is noise, not an entity.
    Suppress,
    /// Fold the name into `target`, accumulating counts and recording
    /// both names as aliases on the merged entity.
    Merge { target: String },
}

/// A curation rule applied during extraction, matched against display
/// names as the scanner produces them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityOverride {
    /// `None` applies the rule to every narrative.
    pub narrative_id: Option<NarrativeId>,
    pub name: String,
    pub action: OverrideAction,
}

/// Sentiment a narrative holds toward a mentioned entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

/// Narrative-to-entity edge: how a narrative mentions an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionEdge {
    pub narrative_id: NarrativeId,
    /// Canonical entity name.
    pub entity_name: String,
    pub count: u64,
    pub first_order: u32,
    pub last_order: u32,
    pub importance: f64,
    pub sentiment: Sentiment,
}

/// A theme attached to one or more narratives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    /// Canonical (lowercased) theme name.
    pub name: String,
    pub category: Option<String>,
    /// How many narratives carry this theme.
    pub narrative_count: u32,
}

/// Undirected narrative-to-narrative connection. `source` and `target` are
/// stored in canonical order (lower id first) so each unordered pair has
/// exactly one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEdge {
    pub source: NarrativeId,
    pub target: NarrativeId,
    pub weight: f64,
    pub shared_entities: Vec<String>,
    pub shared_themes: Vec<String>,
    pub discovered_at: DateTime<Utc>,
}

impl ConnectionEdge {
    /// Build an edge with the pair in canonical order.
    pub fn new(
        a: NarrativeId,
        b: NarrativeId,
        weight: f64,
        shared_entities: Vec<String>,
        shared_themes: Vec<String>,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        let (source, target) = canonical_pair(a, b);
        Self {
            source,
            target,
            weight,
            shared_entities,
            shared_themes,
            discovered_at,
        }
    }
}

/// Put a narrative pair in canonical order, lower id first.
pub fn canonical_pair(a: NarrativeId, b: NarrativeId) -> (NarrativeId, NarrativeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Undirected entity-to-entity edge from co-mention across narratives.
/// `source` and `target` are canonical entity names in lexicographic order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatednessEdge {
    pub source: String,
    pub target: String,
    /// Number of distinct narratives mentioning both.
    pub co_occurrences: u32,
    pub narratives: Vec<NarrativeId>,
    pub strength: f64,
}

impl RelatednessEdge {
    pub fn new(
        a: impl Into<String>,
        b: impl Into<String>,
        co_occurrences: u32,
        narratives: Vec<NarrativeId>,
        strength: f64,
    ) -> Self {
        let a = a.into();
        let b = b.into();
        let (source, target) = if a <= b { (a, b) } else { (b, a) };
        Self {
            source,
            target,
            co_occurrences,
            narratives,
            strength,
        }
    }
}
