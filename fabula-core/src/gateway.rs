//! Content generation seam.
//!
//! The orchestrator talks to the language model through [`ContentGateway`]
//! and to image hosting through [`ObjectStorage`]. Both are traits so tests
//! run against scripted fakes and production wires in an HTTP client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chaos::ChaosVector;
use crate::model::{Installment, Narrative, NarrativeId, StyleProfile};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network trouble or a rate limit. Worth retrying on a later tick.
    #[error("transient gateway failure: {0}")]
    Transient(String),
    /// The model answered but the payload could not be understood.
    #[error("malformed gateway response: {0}")]
    Malformed(String),
    /// The provider refused the request outright.
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    /// Missing credentials or bad settings.
    #[error("gateway configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// Per-operation model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 2048,
            temperature: None,
        }
    }
}

/// Model settings per gateway operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewaySettings {
    pub premise: GenerationSettings,
    pub installment: GenerationSettings,
    pub evaluation: GenerationSettings,
}

/// A freshly generated premise, everything needed to spawn a narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PremiseSeed {
    pub title: String,
    pub premise: String,
    pub themes: Vec<String>,
    pub style: StyleProfile,
}

/// Context handed to the gateway when generating the next installment.
#[derive(Debug)]
pub struct InstallmentContext<'a> {
    pub narrative: &'a Narrative,
    /// Most recent installments, oldest first, bounded by the context window.
    pub recent: &'a [Installment],
    /// 1-indexed order of the installment being written.
    pub order: u32,
    /// Chaos vector the new installment must be written at.
    pub chaos: ChaosVector,
    pub settings: &'a GenerationSettings,
}

/// What the gateway returns for an installment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentDraft {
    pub body: String,
    /// Named 0..=1 intensity dimensions the model reported for this text.
    pub intensity: BTreeMap<String, f64>,
    pub tokens_used: Option<u32>,
    pub latency_ms: Option<u64>,
    pub model: Option<String>,
}

/// Context handed to the gateway when evaluating a narrative.
#[derive(Debug)]
pub struct EvaluationContext<'a> {
    pub narrative: &'a Narrative,
    pub recent: &'a [Installment],
    /// The floor the composite will be judged against, included so the
    /// evaluator prompt can state the stakes.
    pub quality_floor: f64,
    pub settings: &'a GenerationSettings,
}

/// Raw evaluator verdict. Dimension scores are on the model's native
/// 0..=10 scale; [`crate::score::score_evaluation`] normalizes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDraft {
    pub coherence: f64,
    pub novelty: f64,
    pub engagement: f64,
    pub pacing: f64,
    pub should_continue: bool,
    pub reasoning: String,
    pub issues: Vec<String>,
}

/// What a cover image request needs to know about the narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverBrief {
    pub narrative_id: NarrativeId,
    pub title: String,
    pub premise: String,
}

/// Language-model operations the pool depends on.
#[async_trait]
pub trait ContentGateway: Send + Sync {
    /// Invent a premise for a brand-new narrative.
    async fn generate_premise(
        &self,
        settings: &GenerationSettings,
    ) -> Result<PremiseSeed, GatewayError>;

    /// Write the next installment of a narrative.
    async fn generate_installment(
        &self,
        ctx: InstallmentContext<'_>,
    ) -> Result<InstallmentDraft, GatewayError>;

    /// Judge recent installments of a narrative.
    async fn generate_evaluation(
        &self,
        ctx: EvaluationContext<'_>,
    ) -> Result<EvaluationDraft, GatewayError>;

    /// Produce a cover image, returning a URL to the provider-hosted result.
    async fn generate_cover_image(&self, brief: &CoverBrief) -> Result<String, GatewayError>;
}

#[derive(Debug, Error)]
#[error("object storage error: {0}")]
pub struct StorageError(pub String);

/// Durable home for generated images. Provider URLs expire, so completed
/// covers are re-uploaded somewhere owned.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Copy the image at `source_url` into storage, returning the durable
    /// URL.
    async fn store_image(
        &self,
        narrative_id: NarrativeId,
        source_url: &str,
    ) -> Result<String, StorageError>;
}

/// Storage that keeps the provider URL as-is. Used when no bucket is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughStorage;

#[async_trait]
impl ObjectStorage for PassthroughStorage {
    async fn store_image(
        &self,
        _narrative_id: NarrativeId,
        source_url: &str,
    ) -> Result<String, StorageError> {
        Ok(source_url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Transient("timeout".into()).is_transient());
        assert!(!GatewayError::Malformed("not json".into()).is_transient());
        assert!(!GatewayError::Config("no api key".into()).is_transient());
    }

    #[tokio::test]
    async fn test_passthrough_storage_returns_source_url() {
        let storage = PassthroughStorage;
        let url = storage
            .store_image(NarrativeId::new(), "https://img.example/cover.png")
            .await
            .unwrap();
        assert_eq!(url, "https://img.example/cover.png");
    }
}
