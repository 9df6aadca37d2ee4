//! Random starting points for EM.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Exp1, StandardNormal};
use tree_model::{GaussianComponent, LatentTreeModel, MixedData, Potential, Variable};

use crate::stats::VARIANCE_FLOOR;

/// Draws parameters for uninitialized nodes
pub struct ParameterGenerator<'a> {
    data: &'a MixedData,
}

impl<'a> ParameterGenerator<'a> {
    pub fn new(data: &'a MixedData) -> Self {
        ParameterGenerator { data }
    }

    /// Each row ~ Dirichlet(1, ..., 1)
    pub fn categorical<R: Rng>(
        &self,
        parent_states: usize,
        states: usize,
        rng: &mut R,
    ) -> DMatrix<f64> {
        let mut table = DMatrix::<f64>::zeros(parent_states, states);
        for mut row in table.row_iter_mut() {
            for x in row.iter_mut() {
                let e: f64 = rng.sample(Exp1);
                *x = e + 1e-12;
            }
            let tot = row.sum();
            row /= tot;
        }
        table
    }

    /// Means scattered around the data mean by one standard deviation;
    /// covariance from the data
    pub fn gaussian<R: Rng>(
        &self,
        parent_states: usize,
        variable: &Variable,
        rng: &mut R,
    ) -> anyhow::Result<Vec<GaussianComponent>> {
        let (mean, mut covariance) = self.data.moments(&variable.manifest())?;
        for k in 0..covariance.nrows() {
            covariance[(k, k)] = covariance[(k, k)].max(VARIANCE_FLOOR);
        }
        let sd = covariance.diagonal().map(|v| v.sqrt());
        Ok((0..parent_states)
            .map(|_| {
                let noise = DVector::<f64>::from_fn(mean.len(), |_, _| rng.sample(StandardNormal));
                GaussianComponent {
                    mean: &mean + sd.component_mul(&noise),
                    covariance: covariance.clone(),
                }
            })
            .collect())
    }

    /// Fill in the given variables' potentials
    pub fn initialize<R: Rng>(
        &self,
        model: &mut LatentTreeModel,
        variables: &[Variable],
        rng: &mut R,
    ) -> anyhow::Result<()> {
        for v in variables {
            let id = model
                .node_of(v)
                .ok_or_else(|| anyhow::anyhow!("{} is not in model {}", v.name(), model.name()))?;
            let p = model.parent_states(id);
            let potential = match v.cardinality() {
                Some(k) => Potential::Categorical(self.categorical(p, k, rng)),
                None => Potential::Gaussian(self.gaussian(p, v, rng)?),
            };
            model.set_potential(v, potential)?;
        }
        Ok(())
    }
}
