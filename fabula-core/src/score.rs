//! Composite quality scoring.
//!
//! The evaluator model reports raw 0..=10 dimension scores; this module
//! normalizes them and folds in penalties so that one weak dimension or an
//! inconsistent profile drags the composite down harder than a plain
//! weighted average would.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::EvaluationScores;

/// Penalty applied per reported issue.
const ISSUE_PENALTY: f64 = 0.03;
/// Cap on the total issue penalty.
const ISSUE_PENALTY_CAP: f64 = 0.15;
/// Dimensions below this threshold incur the weak-dimension penalty.
const WEAK_THRESHOLD: f64 = 0.85;
/// Every dimension above this threshold earns the excellence bonus.
const EXCELLENCE_THRESHOLD: f64 = 0.92;

#[derive(Debug, Error)]
pub enum WeightsError {
    #[error("evaluation weights must sum to 1.0, got {0}")]
    BadSum(f64),
    #[error("evaluation weight {field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },
}

/// Relative weight of each evaluation dimension. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationWeights {
    pub coherence: f64,
    pub novelty: f64,
    pub engagement: f64,
    pub pacing: f64,
}

impl Default for EvaluationWeights {
    fn default() -> Self {
        Self {
            coherence: 0.3,
            novelty: 0.2,
            engagement: 0.3,
            pacing: 0.2,
        }
    }
}

impl EvaluationWeights {
    pub fn validate(&self) -> Result<(), WeightsError> {
        for (field, value) in [
            ("coherence", self.coherence),
            ("novelty", self.novelty),
            ("engagement", self.engagement),
            ("pacing", self.pacing),
        ] {
            if value < 0.0 {
                return Err(WeightsError::Negative { field, value });
            }
        }
        let sum = self.coherence + self.novelty + self.engagement + self.pacing;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(WeightsError::BadSum(sum));
        }
        Ok(())
    }
}

/// Raw dimension scores as reported by the evaluator, each in 0..=10.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawScores {
    pub coherence: f64,
    pub novelty: f64,
    pub engagement: f64,
    pub pacing: f64,
}

/// Result of scoring: normalized dimensions plus the composite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredEvaluation {
    pub scores: EvaluationScores,
    pub overall: f64,
}

/// Normalize raw scores and compute the composite:
/// weighted average, minus a superlinear penalty on the weakest dimension,
/// minus a consistency penalty proportional to the population standard
/// deviation, minus a capped per-issue penalty, plus a small bonus when
/// every dimension is excellent. The result is clamped to 0..=1.
pub fn score_evaluation(
    raw: RawScores,
    issue_count: usize,
    weights: &EvaluationWeights,
) -> ScoredEvaluation {
    let scores = EvaluationScores {
        coherence: normalize(raw.coherence),
        novelty: normalize(raw.novelty),
        engagement: normalize(raw.engagement),
        pacing: normalize(raw.pacing),
    };
    let dims = scores.as_array();

    let weighted = scores.coherence * weights.coherence
        + scores.novelty * weights.novelty
        + scores.engagement * weights.engagement
        + scores.pacing * weights.pacing;

    let lowest = dims.iter().copied().fold(f64::INFINITY, f64::min);
    let weak_penalty = if lowest < WEAK_THRESHOLD {
        (WEAK_THRESHOLD - lowest).powf(1.2) * 1.2
    } else {
        0.0
    };

    let consistency_penalty = pstdev(&dims) * 0.2;

    let issue_penalty = (issue_count as f64 * ISSUE_PENALTY).min(ISSUE_PENALTY_CAP);

    let excellence_bonus = if lowest > EXCELLENCE_THRESHOLD {
        (lowest - EXCELLENCE_THRESHOLD) * 0.1
    } else {
        0.0
    };

    let overall = (weighted - weak_penalty - consistency_penalty - issue_penalty
        + excellence_bonus)
        .clamp(0.0, 1.0);

    ScoredEvaluation { scores, overall }
}

fn normalize(raw: f64) -> f64 {
    (raw / 10.0).clamp(0.0, 1.0)
}

/// Population standard deviation.
fn pstdev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
