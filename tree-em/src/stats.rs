//! Expected sufficient statistics and the M-step.

use crate::inference::CompiledTree;
use nalgebra::{DMatrix, DVector};
use std::collections::HashSet;
use tree_model::{GaussianComponent, LatentTreeModel, Potential, VarId};

/// Added to every expected count before normalisation
pub const COUNT_SMOOTHING: f64 = 1e-8;

/// Lower bound on the diagonal of an estimated covariance
pub const VARIANCE_FLOOR: f64 = 1e-6;

/// Weighted first and second moments per parent state
#[derive(Debug, Clone)]
pub struct GaussianStats {
    pub weight: DVector<f64>,
    pub sum: Vec<DVector<f64>>,
    pub sum_sq: Vec<DMatrix<f64>>,
}

impl GaussianStats {
    pub fn zeros(parent_states: usize, dim: usize) -> Self {
        GaussianStats {
            weight: DVector::zeros(parent_states),
            sum: vec![DVector::zeros(dim); parent_states],
            sum_sq: vec![DMatrix::zeros(dim, dim); parent_states],
        }
    }

    /// * `parent_post` - posterior over the parent states
    /// * `x` - a complete observation
    /// * `weight` - case weight
    pub fn add(&mut self, parent_post: &DVector<f64>, x: &DVector<f64>, weight: f64) {
        for (z, &p) in parent_post.iter().enumerate() {
            let w = p * weight;
            if w <= 0.0 {
                continue;
            }
            self.weight[z] += w;
            self.sum[z].axpy(w, x, 1.0);
            self.sum_sq[z].ger(w, x, x, 1.0);
        }
    }

    fn merge(mut self, other: GaussianStats) -> Self {
        self.weight += other.weight;
        for (a, b) in self.sum.iter_mut().zip(other.sum) {
            *a += b;
        }
        for (a, b) in self.sum_sq.iter_mut().zip(other.sum_sq) {
            *a += b;
        }
        self
    }
}

/// Expected statistics for every slot of a compiled tree
#[derive(Debug, Clone)]
pub struct SufficientStats {
    /// Expected family counts (parent states x own states) of discrete slots
    pub(crate) counts: Vec<Option<DMatrix<f64>>>,
    pub(crate) gaussian: Vec<Option<GaussianStats>>,
    pub loglikelihood: f64,
}

impl SufficientStats {
    pub fn zeros(tree: &CompiledTree) -> Self {
        let counts = tree
            .slots
            .iter()
            .map(|s| {
                if s.is_discrete() {
                    Some(DMatrix::zeros(s.parent_states, s.states))
                } else {
                    None
                }
            })
            .collect();
        let gaussian = (0..tree.slots.len())
            .map(|s| tree.empty_gaussian(s))
            .collect();
        SufficientStats {
            counts,
            gaussian,
            loglikelihood: 0.0,
        }
    }

    pub fn merge(mut self, other: SufficientStats) -> Self {
        for (a, b) in self.counts.iter_mut().zip(other.counts) {
            if let (Some(a), Some(b)) = (a.as_mut(), b) {
                *a += b;
            }
        }
        for (a, b) in self.gaussian.iter_mut().zip(other.gaussian) {
            if let (Some(x), Some(y)) = (a.take(), b) {
                *a = Some(x.merge(y));
            }
        }
        self.loglikelihood += other.loglikelihood;
        self
    }

    /// Maximisation step: write new potentials into `model`.
    ///
    /// * `free` - variables whose potentials may change; `None` means all
    pub fn maximize(
        &self,
        tree: &CompiledTree,
        model: &mut LatentTreeModel,
        free: Option<&HashSet<VarId>>,
    ) -> anyhow::Result<()> {
        for (s, slot) in tree.slots.iter().enumerate() {
            if let Some(free) = free {
                if !free.contains(&slot.variable.id()) {
                    continue;
                }
            }

            let potential = if let Some(counts) = &self.counts[s] {
                Potential::Categorical(normalize_counts(counts))
            } else if let Some(g) = &self.gaussian[s] {
                let old = model
                    .potential(&slot.variable)
                    .and_then(|p| p.components())
                    .map(|c| c.to_vec())
                    .ok_or_else(|| anyhow::anyhow!("{} has no parameters", slot.variable.name()))?;
                Potential::Gaussian(gaussian_components(g, &old))
            } else {
                continue;
            };
            model.set_potential(&slot.variable, potential)?;
        }
        Ok(())
    }
}

fn normalize_counts(counts: &DMatrix<f64>) -> DMatrix<f64> {
    let mut table = counts.add_scalar(COUNT_SMOOTHING);
    for mut row in table.row_iter_mut() {
        let tot = row.sum();
        if tot > 0.0 && tot.is_finite() {
            row /= tot;
        } else {
            row.fill(1.0 / row.len() as f64);
        }
    }
    table
}

/// Parent states with next to no weight keep their previous parameters
fn gaussian_components(g: &GaussianStats, old: &[GaussianComponent]) -> Vec<GaussianComponent> {
    (0..g.weight.len())
        .map(|z| {
            let w = g.weight[z];
            if w < 1e-10 {
                return old[z].clone();
            }
            let mean = &g.sum[z] / w;
            let mut covariance = &g.sum_sq[z] / w - &mean * mean.transpose();
            covariance = (&covariance + covariance.transpose()) * 0.5;
            for k in 0..covariance.nrows() {
                if covariance[(k, k)] < VARIANCE_FLOOR {
                    covariance[(k, k)] = VARIANCE_FLOOR;
                }
            }
            if covariance.clone().cholesky().is_none() {
                // collapse to the diagonal
                covariance = DMatrix::from_diagonal(&covariance.diagonal());
            }
            GaussianComponent { mean, covariance }
        })
        .collect()
}
