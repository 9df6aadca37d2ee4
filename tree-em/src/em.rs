//! EM parameter estimation with random restarts and local updates.

use crate::inference::CompiledTree;
use crate::init::ParameterGenerator;
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tree_model::{LatentTreeModel, MixedData, VarId, Variable};

/// EM settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmConfig {
    /// Random starting points for uninitialized parameters. Default: 4
    pub restarts: usize,
    /// EM steps run on every restart before the best is kept. Default: 10
    pub initial_steps: usize,
    /// Maximum EM steps after the restarts. Default: 100
    pub max_steps: usize,
    /// Stop when the log-likelihood gains less than this. Default: 0.01
    pub convergence: f64,
    /// Only re-estimate changed and uninitialized variables. Default: false
    pub local: bool,
    /// Split the E-step over cases on the current rayon pool. Default: true
    pub parallel_cases: bool,
}

impl Default for EmConfig {
    fn default() -> Self {
        EmConfig {
            restarts: 4,
            initial_steps: 10,
            max_steps: 100,
            convergence: 0.01,
            local: false,
            parallel_cases: true,
        }
    }
}

impl EmConfig {
    /// Cheap local EM for ranking many candidates
    pub fn screening() -> Self {
        EmConfig {
            restarts: 1,
            initial_steps: 0,
            max_steps: 10,
            convergence: 0.1,
            local: true,
            parallel_cases: false,
        }
    }

    /// Local EM with restarts for the shortlist
    pub fn selection() -> Self {
        EmConfig {
            restarts: 4,
            initial_steps: 5,
            max_steps: 50,
            convergence: 0.01,
            local: true,
            parallel_cases: false,
        }
    }

    /// Full EM on the winning candidate
    pub fn estimation() -> Self {
        EmConfig {
            restarts: 1,
            initial_steps: 0,
            max_steps: 200,
            convergence: 0.001,
            local: false,
            parallel_cases: true,
        }
    }
}

/// A fitted model with its score
#[derive(Debug, Clone)]
pub struct Estimate {
    pub model: LatentTreeModel,
    pub loglikelihood: f64,
    /// BIC
    pub score: f64,
    pub dimension: usize,
    /// EM steps taken after initialization
    pub steps: usize,
}

impl Estimate {
    fn new(model: LatentTreeModel, loglikelihood: f64, total_weight: f64, steps: usize) -> Self {
        let dimension = model.dimension();
        Estimate {
            score: bic(loglikelihood, dimension, total_weight),
            model,
            loglikelihood,
            dimension,
            steps,
        }
    }
}

/// `loglik - dim / 2 * ln(n)`
pub fn bic(loglikelihood: f64, dimension: usize, total_weight: f64) -> f64 {
    loglikelihood - 0.5 * dimension as f64 * total_weight.ln()
}

/// Named EM estimator
#[derive(Debug, Clone)]
pub struct EmEstimator {
    name: Box<str>,
    config: EmConfig,
}

impl EmEstimator {
    pub fn new(name: &str, config: EmConfig) -> Self {
        EmEstimator {
            name: name.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EmConfig {
        &self.config
    }

    /// Score a fully parameterized model without changing it
    pub fn evaluate(&self, data: &MixedData, model: &LatentTreeModel) -> anyhow::Result<Estimate> {
        let tree = CompiledTree::new(model, data)?;
        let ll = tree.loglikelihood(data, self.config.parallel_cases)?;
        Ok(Estimate::new(model.clone(), ll, data.total_weight(), 0))
    }

    /// Fit the parameters of `model`.
    ///
    /// * `data` - synchronized with the model
    /// * `changed` - variables the structural edit touched; with local EM
    ///   only these and the uninitialized ones are re-estimated
    /// * `rng` - source for random starting points
    pub fn estimate<R: Rng>(
        &self,
        data: &MixedData,
        model: &LatentTreeModel,
        changed: &[Variable],
        rng: &mut R,
    ) -> anyhow::Result<Estimate> {
        let mut model = model.clone();
        model.prune_potentials();

        let uninitialized = model.uninitialized();
        let free: Option<HashSet<VarId>> = if self.config.local {
            Some(
                changed
                    .iter()
                    .chain(uninitialized.iter())
                    .map(|v| v.id())
                    .collect(),
            )
        } else {
            None
        };

        if !uninitialized.is_empty() {
            let generator = ParameterGenerator::new(data);
            let restarts = self.config.restarts.max(1);
            if restarts == 1 {
                generator.initialize(&mut model, &uninitialized, rng)?;
            } else {
                let mut best: Option<(f64, LatentTreeModel)> = None;
                for r in 0..restarts {
                    let mut trial = model.clone();
                    generator.initialize(&mut trial, &uninitialized, rng)?;
                    let (trial, ll, _) =
                        self.iterate(data, trial, free.as_ref(), self.config.initial_steps)?;
                    debug!("{}: restart {} loglik {:.4}", self.name, r, ll);
                    if best.as_ref().map_or(true, |(b, _)| ll > *b) {
                        best = Some((ll, trial));
                    }
                }
                if let Some((_, m)) = best {
                    model = m;
                }
            }
        }

        let (model, ll, steps) = self.iterate(data, model, free.as_ref(), self.config.max_steps)?;
        Ok(Estimate::new(model, ll, data.total_weight(), steps))
    }

    /// Run EM steps; returns the model, its log-likelihood and the
    /// number of M-steps taken
    fn iterate(
        &self,
        data: &MixedData,
        mut model: LatentTreeModel,
        free: Option<&HashSet<VarId>>,
        max_steps: usize,
    ) -> anyhow::Result<(LatentTreeModel, f64, usize)> {
        let mut prev = f64::NEG_INFINITY;
        let mut steps = 0;
        loop {
            let tree = CompiledTree::new(&model, data)?;
            let stats = tree.expected_statistics(data, self.config.parallel_cases)?;
            let ll = stats.loglikelihood;
            if steps >= max_steps || ll - prev < self.config.convergence {
                return Ok((model, ll, steps));
            }
            prev = ll;
            stats.maximize(&tree, &mut model, free)?;
            steps += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use tree_model::variable::default_state_names;

    fn toy_data() -> (Vec<Variable>, MixedData) {
        let vars: Vec<Variable> = (0..3)
            .map(|i| Variable::discrete(&format!("x{}", i), default_state_names(2)))
            .collect();
        let mut values = vec![];
        for i in 0..60 {
            let z = (i % 3 == 0) as usize as f64;
            values.extend([z, z, (i % 2) as f64]);
        }
        let data = MixedData::from_values(vars.clone(), DMatrix::from_row_slice(60, 3, &values))
            .unwrap();
        (vars, data)
    }

    #[test]
    fn test_em_does_not_decrease_loglik() {
        let (vars, data) = toy_data();
        let model = LatentTreeModel::latent_class("m", &vars, 2).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let one_step = EmEstimator::new(
            "a",
            EmConfig {
                restarts: 1,
                max_steps: 1,
                ..EmConfig::default()
            },
        );
        let first = one_step.estimate(&data, &model, &[], &mut rng).unwrap();
        let more = EmEstimator::new("b", EmConfig::estimation());
        let second = more.estimate(&data, &first.model, &[], &mut rng).unwrap();
        assert!(second.loglikelihood >= first.loglikelihood - 1e-9);
        assert!(second.model.is_initialized());
    }

    #[test]
    fn test_local_em_leaves_others() {
        let (vars, data) = toy_data();
        let model = LatentTreeModel::latent_class("m", &vars, 2).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let fit = EmEstimator::new("full", EmConfig::estimation())
            .estimate(&data, &model, &[], &mut rng)
            .unwrap();

        let local = EmEstimator::new("local", EmConfig::selection());
        let out = local
            .estimate(&data, &fit.model, &[vars[2].clone()], &mut rng)
            .unwrap();

        for v in &vars[..2] {
            let a = fit.model.potential(v).unwrap().table().unwrap();
            let b = out.model.potential(v).unwrap().table().unwrap();
            assert_eq!(a, b);
        }
        let z = out.model.latent_variables()[0].clone();
        assert_eq!(
            fit.model.potential(&z).unwrap().table().unwrap(),
            out.model.potential(&z).unwrap().table().unwrap()
        );
    }

    #[test]
    fn test_score_is_bic() {
        let (vars, data) = toy_data();
        let model = LatentTreeModel::latent_class("m", &vars, 2).unwrap();
        let mut rng = SmallRng::seed_from_u64(5);
        let est = EmEstimator::new("e", EmConfig::default())
            .estimate(&data, &model, &[], &mut rng)
            .unwrap();
        let expected = est.loglikelihood - 0.5 * est.dimension as f64 * 60f64.ln();
        approx::assert_abs_diff_eq!(est.score, expected, epsilon = 1e-9);
        assert_eq!(est.dimension, 1 + 3 * 2);

        let again = EmEstimator::new("e", EmConfig::default())
            .evaluate(&data, &est.model)
            .unwrap();
        approx::assert_abs_diff_eq!(again.loglikelihood, est.loglikelihood, epsilon = 1e-8);
    }
}
