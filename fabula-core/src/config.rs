//! Pool configuration.
//!
//! All knobs the orchestrator, evaluator, and discovery engine read, with
//! range validation so a bad update can never leave the pool in an
//! unsatisfiable state (for example a floor above the ceiling).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chaos::ChaosRange;
use crate::score::{EvaluationWeights, WeightsError};

pub const DEFAULT_CHAPTER_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_EVALUATION_INTERVAL: u32 = 3;
pub const DEFAULT_MIN_CHAPTERS_BEFORE_EVAL: u32 = 3;
pub const DEFAULT_QUALITY_SCORE_MIN: f64 = 0.6;
pub const DEFAULT_MAX_CHAPTERS: u32 = 20;
pub const DEFAULT_MIN_ACTIVE: u32 = 3;
pub const DEFAULT_MAX_ACTIVE: u32 = 10;
pub const DEFAULT_CONTEXT_WINDOW: u32 = 5;
pub const DEFAULT_MIN_SHARED_ITEMS: u32 = 2;
pub const DEFAULT_MIN_COAPPEARANCES: u32 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be between {min} and {max}, got {got}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        got: f64,
    },
    #[error("min_active_narratives ({min_active}) must not exceed max_active_narratives ({max_active})")]
    FloorAboveCeiling { min_active: u32, max_active: u32 },
    #[error("{field} range is invalid: min {min} must not exceed max {max}, both non-negative")]
    BadChaosRange {
        field: &'static str,
        min: f64,
        max: f64,
    },
    #[error(transparent)]
    Weights(#[from] WeightsError),
}

/// The full configuration surface of the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Seconds between installments of the same narrative.
    pub chapter_interval_seconds: u64,
    /// Evaluate every N installments.
    pub evaluation_interval_chapters: u32,
    /// Skip evaluation until a narrative has at least this many installments.
    pub min_chapters_before_eval: u32,
    /// Composite score below which a narrative is completed.
    pub quality_score_min: f64,
    /// Hard cap on installments per narrative.
    pub max_chapters_per_story: u32,
    /// Spawn until at least this many narratives are active.
    pub min_active_narratives: u32,
    /// Complete oldest narratives when more than this many are active.
    pub max_active_narratives: u32,
    /// How many recent installments feed generation and evaluation prompts.
    pub context_window: u32,
    /// Range initial chaos dimensions are sampled from at spawn.
    pub chaos_initial: ChaosRange,
    /// Range per-installment chaos increments are sampled from.
    pub chaos_increment: ChaosRange,
    /// Minimum shared entities plus themes before a connection is recorded.
    pub min_shared_items: u32,
    /// Minimum distinct co-mentioning narratives before entity relatedness
    /// is recorded.
    pub min_coappearances: u32,
    pub weights: EvaluationWeights,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            chapter_interval_seconds: DEFAULT_CHAPTER_INTERVAL_SECONDS,
            evaluation_interval_chapters: DEFAULT_EVALUATION_INTERVAL,
            min_chapters_before_eval: DEFAULT_MIN_CHAPTERS_BEFORE_EVAL,
            quality_score_min: DEFAULT_QUALITY_SCORE_MIN,
            max_chapters_per_story: DEFAULT_MAX_CHAPTERS,
            min_active_narratives: DEFAULT_MIN_ACTIVE,
            max_active_narratives: DEFAULT_MAX_ACTIVE,
            context_window: DEFAULT_CONTEXT_WINDOW,
            chaos_initial: ChaosRange::new(0.05, 0.2),
            chaos_increment: ChaosRange::new(0.02, 0.08),
            min_shared_items: DEFAULT_MIN_SHARED_ITEMS,
            min_coappearances: DEFAULT_MIN_COAPPEARANCES,
            weights: EvaluationWeights::default(),
        }
    }
}

impl PoolConfig {
    /// Validate every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "chapter_interval_seconds",
            self.chapter_interval_seconds as f64,
            10.0,
            3600.0,
        )?;
        check_range(
            "evaluation_interval_chapters",
            self.evaluation_interval_chapters as f64,
            1.0,
            50.0,
        )?;
        check_range(
            "min_chapters_before_eval",
            self.min_chapters_before_eval as f64,
            1.0,
            50.0,
        )?;
        check_range("quality_score_min", self.quality_score_min, 0.0, 1.0)?;
        check_range(
            "max_chapters_per_story",
            self.max_chapters_per_story as f64,
            1.0,
            500.0,
        )?;
        check_range(
            "min_active_narratives",
            self.min_active_narratives as f64,
            0.0,
            100.0,
        )?;
        check_range(
            "max_active_narratives",
            self.max_active_narratives as f64,
            1.0,
            200.0,
        )?;
        check_range("context_window", self.context_window as f64, 1.0, 50.0)?;
        check_range("min_shared_items", self.min_shared_items as f64, 1.0, 20.0)?;
        check_range(
            "min_coappearances",
            self.min_coappearances as f64,
            1.0,
            20.0,
        )?;
        if self.min_active_narratives > self.max_active_narratives {
            return Err(ConfigError::FloorAboveCeiling {
                min_active: self.min_active_narratives,
                max_active: self.max_active_narratives,
            });
        }
        check_chaos_range("chaos_initial", self.chaos_initial)?;
        check_chaos_range("chaos_increment", self.chaos_increment)?;
        self.weights.validate()?;
        Ok(())
    }

    /// Apply a partial update, returning the new config. The current config
    /// is untouched when validation fails.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<PoolConfig, ConfigError> {
        let mut next = self.clone();
        if let Some(v) = update.chapter_interval_seconds {
            next.chapter_interval_seconds = v;
        }
        if let Some(v) = update.evaluation_interval_chapters {
            next.evaluation_interval_chapters = v;
        }
        if let Some(v) = update.min_chapters_before_eval {
            next.min_chapters_before_eval = v;
        }
        if let Some(v) = update.quality_score_min {
            next.quality_score_min = v;
        }
        if let Some(v) = update.max_chapters_per_story {
            next.max_chapters_per_story = v;
        }
        if let Some(v) = update.min_active_narratives {
            next.min_active_narratives = v;
        }
        if let Some(v) = update.max_active_narratives {
            next.max_active_narratives = v;
        }
        if let Some(v) = update.context_window {
            next.context_window = v;
        }
        if let Some(v) = update.chaos_initial {
            next.chaos_initial = v;
        }
        if let Some(v) = update.chaos_increment {
            next.chaos_increment = v;
        }
        if let Some(v) = update.min_shared_items {
            next.min_shared_items = v;
        }
        if let Some(v) = update.min_coappearances {
            next.min_coappearances = v;
        }
        if let Some(v) = update.weights {
            next.weights = v;
        }
        next.validate()?;
        Ok(next)
    }

    /// Factory-default configuration.
    pub fn reset() -> PoolConfig {
        PoolConfig::default()
    }
}

fn check_range(field: &'static str, got: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if got < min || got > max {
        return Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            got,
        });
    }
    Ok(())
}

fn check_chaos_range(field: &'static str, range: ChaosRange) -> Result<(), ConfigError> {
    if !range.is_non_negative() {
        return Err(ConfigError::BadChaosRange {
            field,
            min: range.min,
            max: range.max,
        });
    }
    Ok(())
}

/// Partial configuration update. `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub chapter_interval_seconds: Option<u64>,
    pub evaluation_interval_chapters: Option<u32>,
    pub min_chapters_before_eval: Option<u32>,
    pub quality_score_min: Option<f64>,
    pub max_chapters_per_story: Option<u32>,
    pub min_active_narratives: Option<u32>,
    pub max_active_narratives: Option<u32>,
    pub context_window: Option<u32>,
    pub chaos_initial: Option<ChaosRange>,
    pub chaos_increment: Option<ChaosRange>,
    pub min_shared_items: Option<u32>,
    pub min_coappearances: Option<u32>,
    pub weights: Option<EvaluationWeights>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        PoolConfig::default().validate().unwrap();
    }

    #[test]
    fn test_interval_bounds() {
        let mut config = PoolConfig::default();
        config.chapter_interval_seconds = 9;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "chapter_interval_seconds",
                ..
            })
        ));
        config.chapter_interval_seconds = 3601;
        assert!(config.validate().is_err());
        config.chapter_interval_seconds = 10;
        config.validate().unwrap();
    }

    #[test]
    fn test_floor_must_not_exceed_ceiling() {
        let mut config = PoolConfig::default();
        config.min_active_narratives = 12;
        config.max_active_narratives = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FloorAboveCeiling {
                min_active: 12,
                max_active: 10
            })
        ));
    }

    #[test]
    fn test_negative_chaos_increment_rejected() {
        let mut config = PoolConfig::default();
        config.chaos_increment = ChaosRange::new(-0.05, 0.05);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadChaosRange {
                field: "chaos_increment",
                ..
            })
        ));
    }

    #[test]
    fn test_apply_returns_new_config_and_keeps_original() {
        let base = PoolConfig::default();
        let update = ConfigUpdate {
            quality_score_min: Some(0.75),
            max_active_narratives: Some(20),
            ..Default::default()
        };
        let next = base.apply(&update).unwrap();
        assert_eq!(next.quality_score_min, 0.75);
        assert_eq!(next.max_active_narratives, 20);
        assert_eq!(base.quality_score_min, DEFAULT_QUALITY_SCORE_MIN);
    }

    #[test]
    fn test_apply_rejects_invalid_update() {
        let base = PoolConfig::default();
        let update = ConfigUpdate {
            quality_score_min: Some(1.5),
            ..Default::default()
        };
        assert!(base.apply(&update).is_err());
    }

    #[test]
    fn test_apply_rejects_inconsistent_combination() {
        let base = PoolConfig::default();
        // Each value is individually in range; together they are not.
        let update = ConfigUpdate {
            min_active_narratives: Some(50),
            max_active_narratives: Some(5),
            ..Default::default()
        };
        assert!(base.apply(&update).is_err());
    }

    #[test]
    fn test_reset_restores_defaults() {
        assert_eq!(PoolConfig::reset(), PoolConfig::default());
    }
}
