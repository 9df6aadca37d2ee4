//! A proposed model produced by one structural edit.

use crate::evaluator::Evaluator;
use std::fmt;
use std::sync::Arc;
use tree_em::Estimate;
use tree_model::{LatentTreeModel, Variable};

/// Mutated copy of a base model plus what the edit touched.
///
/// The base is shared, the model is owned. Once an estimator has filled
/// in the estimate the candidate is not changed again.
#[derive(Clone)]
pub struct Candidate {
    base: Arc<Estimate>,
    model: LatentTreeModel,
    changed: Vec<Variable>,
    removed: Vec<Variable>,
    created: Vec<Variable>,
    description: String,
    operator: &'static str,
    estimate: Option<Arc<Estimate>>,
    unchanged: bool,
}

impl Candidate {
    /// * `base` - estimate of the model the edit was applied to
    /// * `model` - the edited copy
    /// * `operator` - name of the operator that made it
    /// * `description` - what the edit did, e.g. `Z1: 2 -> 3 states`
    pub fn new(
        base: &Arc<Estimate>,
        model: LatentTreeModel,
        operator: &'static str,
        description: String,
    ) -> Self {
        Candidate {
            base: base.clone(),
            model,
            changed: vec![],
            removed: vec![],
            created: vec![],
            description,
            operator,
            estimate: None,
            unchanged: false,
        }
    }

    /// The "no improvement" result: the base model and its own estimate
    pub fn unchanged(base: &Arc<Estimate>, operator: &'static str) -> Self {
        Candidate {
            base: base.clone(),
            model: base.model.clone(),
            changed: vec![],
            removed: vec![],
            created: vec![],
            description: "no change".to_string(),
            operator,
            estimate: Some(base.clone()),
            unchanged: true,
        }
    }

    /// Variables whose parameters must be re-estimated
    pub fn with_changed(mut self, changed: Vec<Variable>) -> Self {
        self.changed = changed;
        self
    }

    pub fn with_removed(mut self, removed: Vec<Variable>) -> Self {
        self.removed = removed;
        self
    }

    pub fn with_created(mut self, created: Vec<Variable>) -> Self {
        self.created = created;
        self
    }

    pub fn with_estimate(mut self, estimate: Estimate) -> Self {
        self.estimate = Some(Arc::new(estimate));
        self
    }

    /// Gain over the base model by `evaluator`, once estimated
    pub fn improvement(&self, evaluator: &dyn Evaluator) -> Option<f64> {
        let estimate = self.estimate.as_ref()?;
        Some(evaluator.improvement(&self.base, estimate))
    }

    /// The estimated model when available, otherwise the edited structure
    pub fn model(&self) -> &LatentTreeModel {
        match &self.estimate {
            Some(e) => &e.model,
            None => &self.model,
        }
    }

    pub fn changed(&self) -> &[Variable] {
        &self.changed
    }

    pub fn removed(&self) -> &[Variable] {
        &self.removed
    }

    pub fn created(&self) -> &[Variable] {
        &self.created
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn operator(&self) -> &'static str {
        self.operator
    }

    pub fn estimate(&self) -> Option<&Arc<Estimate>> {
        self.estimate.as_ref()
    }

    pub fn is_unchanged(&self) -> bool {
        self.unchanged
    }

    /// BIC of the estimate; `-inf` before estimation
    pub fn score(&self) -> f64 {
        self.estimate
            .as_ref()
            .map(|e| e.score)
            .unwrap_or(f64::NEG_INFINITY)
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.operator, self.description)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.estimate {
            Some(e) => write!(
                f,
                "[{}] {} (BIC {:.3}, dim {})",
                self.operator, self.description, e.score, e.dimension
            ),
            None => write!(f, "[{}] {}", self.operator, self.description),
        }
    }
}
