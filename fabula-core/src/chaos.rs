//! Chaos evolution model.
//!
//! Every narrative carries four numeric "chaos" dimensions that drift
//! upward as installments accumulate. Increments are sampled once, when an
//! installment is generated, and persisted on that installment forever —
//! they are never recomputed retroactively. Values may exceed 1.0 on a
//! long-running narrative; that is accepted behavior.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A closed interval from which chaos values are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChaosRange {
    pub min: f64,
    pub max: f64,
}

impl ChaosRange {
    /// Create a new range. `min` and `max` may be equal (degenerate range).
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Sample a value uniformly from the range.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.max <= self.min {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }

    /// True when the whole range is non-negative.
    pub fn is_non_negative(&self) -> bool {
        self.min >= 0.0 && self.max >= self.min
    }
}

/// Per-dimension increment ranges for one narrative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChaosRanges {
    pub absurdity: ChaosRange,
    pub surrealism: ChaosRange,
    pub ridiculousness: ChaosRange,
    pub insanity: ChaosRange,
}

impl ChaosRanges {
    /// Use the same range for all four dimensions.
    pub fn uniform(range: ChaosRange) -> Self {
        Self {
            absurdity: range,
            surrealism: range,
            ridiculousness: range,
            insanity: range,
        }
    }
}

/// The four chaos dimensions at a point in a narrative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChaosVector {
    pub absurdity: f64,
    pub surrealism: f64,
    pub ridiculousness: f64,
    pub insanity: f64,
}

impl ChaosVector {
    pub fn new(absurdity: f64, surrealism: f64, ridiculousness: f64, insanity: f64) -> Self {
        Self {
            absurdity,
            surrealism,
            ridiculousness,
            insanity,
        }
    }

    /// Sample an initial vector, each dimension drawn independently.
    pub fn sample_initial<R: Rng + ?Sized>(range: ChaosRange, rng: &mut R) -> Self {
        Self {
            absurdity: range.sample(rng),
            surrealism: range.sample(rng),
            ridiculousness: range.sample(rng),
            insanity: range.sample(rng),
        }
    }

    /// Advance one installment: add an independently sampled increment per
    /// dimension. Increments are non-negative by config validation, so the
    /// result is monotonically non-decreasing.
    pub fn advance<R: Rng + ?Sized>(&self, ranges: &ChaosRanges, rng: &mut R) -> Self {
        Self {
            absurdity: self.absurdity + ranges.absurdity.sample(rng),
            surrealism: self.surrealism + ranges.surrealism.sample(rng),
            ridiculousness: self.ridiculousness + ranges.ridiculousness.sample(rng),
            insanity: self.insanity + ranges.insanity.sample(rng),
        }
    }

    /// Check that every dimension of `self` is >= the same dimension of
    /// `earlier`.
    pub fn dominates(&self, earlier: &ChaosVector) -> bool {
        self.absurdity >= earlier.absurdity
            && self.surrealism >= earlier.surrealism
            && self.ridiculousness >= earlier.ridiculousness
            && self.insanity >= earlier.insanity
    }
}

/// Compute the chaos vector for installment `order` (1-indexed) by folding
/// freshly sampled increments for k = 2..=order. Installment 1 is the
/// initial vector verbatim.
///
/// This is the from-scratch form of the model; the orchestrator normally
/// calls [`ChaosVector::advance`] on the last persisted vector instead, so
/// that already-stored installments keep the increments they were born
/// with.
pub fn chaos_at<R: Rng + ?Sized>(
    initial: ChaosVector,
    ranges: &ChaosRanges,
    order: u32,
    rng: &mut R,
) -> ChaosVector {
    let mut current = initial;
    for _ in 2..=order {
        current = current.advance(ranges, rng);
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_first_installment_is_initial_verbatim() {
        let mut rng = StdRng::seed_from_u64(7);
        let initial = ChaosVector::new(0.1, 0.2, 0.3, 0.4);
        let ranges = ChaosRanges::uniform(ChaosRange::new(0.02, 0.08));

        let at_one = chaos_at(initial, &ranges, 1, &mut rng);
        assert_eq!(at_one, initial);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut rng = StdRng::seed_from_u64(42);
        let ranges = ChaosRanges::uniform(ChaosRange::new(0.0, 0.1));
        let mut current = ChaosVector::new(0.1, 0.1, 0.1, 0.1);

        for _ in 0..50 {
            let next = current.advance(&ranges, &mut rng);
            assert!(next.dominates(&current));
            current = next;
        }
    }

    #[test]
    fn test_values_may_exceed_one() {
        let mut rng = StdRng::seed_from_u64(3);
        let ranges = ChaosRanges::uniform(ChaosRange::new(0.05, 0.05));
        let initial = ChaosVector::new(0.9, 0.9, 0.9, 0.9);

        let far = chaos_at(initial, &ranges, 10, &mut rng);
        assert!(far.absurdity > 1.0);
    }

    #[test]
    fn test_degenerate_range_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(0);
        let range = ChaosRange::new(0.05, 0.05);
        assert_eq!(range.sample(&mut rng), 0.05);

        let ranges = ChaosRanges::uniform(range);
        let initial = ChaosVector::new(0.1, 0.1, 0.1, 0.1);
        let at_three = chaos_at(initial, &ranges, 3, &mut rng);
        let expected = 0.1 + 2.0 * 0.05;
        assert!((at_three.absurdity - expected).abs() < 1e-12);
        assert!((at_three.insanity - expected).abs() < 1e-12);
    }

    #[test]
    fn test_initial_sampling_within_range() {
        let mut rng = StdRng::seed_from_u64(11);
        let range = ChaosRange::new(0.05, 0.2);
        for _ in 0..100 {
            let v = ChaosVector::sample_initial(range, &mut rng);
            for dim in [v.absurdity, v.surrealism, v.ridiculousness, v.insanity] {
                assert!((0.05..=0.2).contains(&dim));
            }
        }
    }
}
