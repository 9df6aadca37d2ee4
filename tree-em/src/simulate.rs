//! Ancestral sampling from a fully parameterized model.

use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use std::collections::HashMap;
use tree_model::{LatentTreeModel, MixedData, NodeId, Potential};

enum Sampler {
    Categorical(DMatrix<f64>),
    Gaussian {
        columns: Vec<usize>,
        means: Vec<DVector<f64>>,
        factors: Vec<DMatrix<f64>>,
    },
}

struct Step {
    node: NodeId,
    parent: Option<NodeId>,
    column: Option<usize>,
    sampler: Sampler,
}

fn sample_row<R: Rng>(table: &DMatrix<f64>, row: usize, rng: &mut R) -> usize {
    let u: f64 = rng.random();
    let mut acc = 0.0;
    let k = table.ncols();
    for x in 0..k {
        acc += table[(row, x)];
        if u < acc {
            return x;
        }
    }
    k - 1
}

/// Draw `num_cases` cases over the manifest variables of `model`.
///
/// Latent values are not reported. Each case has its own generator
/// seeded from `seed` and the case index, so the output does not depend
/// on the number of threads.
pub fn simulate(model: &LatentTreeModel, num_cases: usize, seed: u64) -> anyhow::Result<MixedData> {
    model.validate()?;
    let manifest = model.manifest_variables();
    let columns: HashMap<_, _> = manifest
        .iter()
        .enumerate()
        .map(|(j, v)| (v.id(), j))
        .collect();

    let graph = model.graph();
    let mut steps = vec![];
    for id in graph.pre_order() {
        let v = graph.variable(id);
        let potential = model
            .potential(v)
            .ok_or_else(|| anyhow::anyhow!("{} has no parameters", v.name()))?;
        let sampler = match potential {
            Potential::Categorical(t) => Sampler::Categorical(t.clone()),
            Potential::Gaussian(comps) => {
                let factors = comps
                    .iter()
                    .map(|c| {
                        c.covariance
                            .clone()
                            .cholesky()
                            .map(|ch| ch.l())
                            .ok_or_else(|| {
                                anyhow::anyhow!("covariance of {} is not positive definite", v.name())
                            })
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Sampler::Gaussian {
                    columns: v.manifest().iter().map(|c| columns[&c.id()]).collect(),
                    means: comps.iter().map(|c| c.mean.clone()).collect(),
                    factors,
                }
            }
        };
        steps.push(Step {
            node: id,
            parent: graph.parent(id),
            column: columns.get(&v.id()).copied(),
            sampler,
        });
    }

    let m = manifest.len();
    let rows: Vec<Vec<f64>> = (0..num_cases)
        .into_par_iter()
        .map(|i| {
            let mut rng = SmallRng::seed_from_u64(seed ^ (i as u64).wrapping_mul(2654435761));
            let mut state: HashMap<NodeId, usize> = HashMap::new();
            let mut row = vec![0.0; m];
            for step in &steps {
                let z = step.parent.and_then(|p| state.get(&p).copied()).unwrap_or(0);
                match &step.sampler {
                    Sampler::Categorical(t) => {
                        let x = sample_row(t, z, &mut rng);
                        state.insert(step.node, x);
                        if let Some(j) = step.column {
                            row[j] = x as f64;
                        }
                    }
                    Sampler::Gaussian {
                        columns,
                        means,
                        factors,
                    } => {
                        let e = DVector::<f64>::from_fn(columns.len(), |_, _| {
                            rng.sample(StandardNormal)
                        });
                        let x = &means[z] + &factors[z] * e;
                        for (k, &j) in columns.iter().enumerate() {
                            row[j] = x[k];
                        }
                    }
                }
            }
            row
        })
        .collect();

    let values = DMatrix::from_fn(num_cases, m, |i, j| rows[i][j]);
    MixedData::from_values(manifest, values)
}
