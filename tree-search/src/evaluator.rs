//! How much better a candidate is than the model it came from.

use tree_em::Estimate;

pub trait Evaluator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Positive when `candidate` is better than `base`
    fn improvement(&self, base: &Estimate, candidate: &Estimate) -> f64;

    fn accepts(&self, base: &Estimate, candidate: &Estimate, threshold: f64) -> bool {
        self.improvement(base, candidate) > threshold
    }
}

/// BIC difference
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreEvaluator;

impl Evaluator for ScoreEvaluator {
    fn name(&self) -> &'static str {
        "score"
    }

    fn improvement(&self, base: &Estimate, candidate: &Estimate) -> f64 {
        candidate.score - base.score
    }
}

/// BIC difference per additional free parameter.
///
/// Candidates that do not add parameters are ranked by the plain
/// difference.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitImprovementEvaluator;

impl Evaluator for UnitImprovementEvaluator {
    fn name(&self) -> &'static str {
        "unit improvement"
    }

    fn improvement(&self, base: &Estimate, candidate: &Estimate) -> f64 {
        let diff = candidate.score - base.score;
        let extra = candidate.dimension as f64 - base.dimension as f64;
        if extra > 0.0 {
            diff / extra
        } else {
            diff
        }
    }
}
