//! Core engine for an autonomous narrative pool.
//!
//! A bounded population of serialized narratives is driven by a tick-based
//! orchestrator: it spawns premises to keep the pool at its floor, retires
//! the oldest narratives past the ceiling, writes installments on a
//! cadence, and completes narratives that run too long or score too low.
//! Each installment carries a monotonically drifting four-dimension chaos
//! vector, and a discovery engine links narratives that share entities and
//! themes.
//!
//! Model access sits behind [`gateway::ContentGateway`]; persistence sits
//! behind [`store::NarrativeStore`] with an in-memory default. The
//! `fabula-gateway` crate provides the HTTP-backed gateway.

pub mod chaos;
pub mod config;
pub mod discovery;
pub mod extract;
pub mod gateway;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod score;
pub mod store;
pub mod testing;

pub use chaos::{ChaosRange, ChaosRanges, ChaosVector};
pub use config::{ConfigError, ConfigUpdate, PoolConfig};
pub use discovery::{DiscoveryEngine, DiscoveryReport, NarrativeCluster};
pub use extract::{EntityExtractor, ExtractionReport};
pub use gateway::{ContentGateway, GatewayError, GatewaySettings, ObjectStorage};
pub use model::{
    CompletionReason, Entity, EntityOverride, Evaluation, Installment, Narrative, NarrativeId,
    NarrativeStatus, OverrideAction,
};
pub use notify::{ChannelNotifier, EventNotifier, LifecycleEvent, NullNotifier};
pub use orchestrator::{Orchestrator, TickError, TickSummary};
pub use score::{score_evaluation, EvaluationWeights, RawScores};
pub use store::{MemoryStore, NarrativeStore, StoreError};
