//! Exact inference on a latent tree by two-pass message passing.
//!
//! 1. **Upward pass** (children before parents): every node sends its
//!    parent a message over the parent's states. Messages are rescaled
//!    by their maximum and the log scales are summed, so deep trees and
//!    Gaussian densities do not underflow.
//! 2. **Downward pass** (parents before children): outside messages give
//!    the posterior of every discrete node and the family posteriors
//!    used as expected sufficient statistics.
//!
//! A model is compiled once per parameter setting; the compiled tree
//! is read-only and shared across threads.

use crate::stats::{GaussianStats, SufficientStats};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::collections::HashMap;
use tree_model::{LatentTreeModel, MixedData, Potential, VarId, Variable};

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// A Gaussian with its Cholesky factor precomputed
#[derive(Debug, Clone)]
pub(crate) struct CompiledGaussian {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
    chol_l: DMatrix<f64>,
    log_norm: f64,
}

impl CompiledGaussian {
    fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> anyhow::Result<Self> {
        let chol = covariance
            .clone()
            .cholesky()
            .ok_or_else(|| anyhow::anyhow!("covariance is not positive definite"))?;
        let chol_l = chol.l();
        let log_det: f64 = chol_l.diagonal().iter().map(|x| 2.0 * x.ln()).sum();
        let log_norm = -0.5 * (mean.len() as f64 * LN_2PI + log_det);
        Ok(CompiledGaussian {
            mean,
            covariance,
            chol_l,
            log_norm,
        })
    }

    fn log_density(&self, x: &DVector<f64>) -> anyhow::Result<f64> {
        let diff = x - &self.mean;
        let y = self
            .chol_l
            .solve_lower_triangular(&diff)
            .ok_or_else(|| anyhow::anyhow!("singular covariance factor"))?;
        Ok(self.log_norm - 0.5 * y.norm_squared())
    }

    /// Density of the marginal over a subset of components
    fn marginal_log_density(&self, observed: &[usize], x: &DVector<f64>) -> anyhow::Result<f64> {
        let mean = DVector::from_iterator(observed.len(), observed.iter().map(|&k| self.mean[k]));
        let cov = DMatrix::from_fn(observed.len(), observed.len(), |a, b| {
            self.covariance[(observed[a], observed[b])]
        });
        CompiledGaussian::new(mean, cov)?.log_density(x)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum SlotKind {
    Latent,
    Observed { column: usize },
    Gaussian {
        columns: Vec<usize>,
        components: Vec<CompiledGaussian>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub variable: Variable,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub states: usize,
    pub parent_states: usize,
    pub table: DMatrix<f64>,
    pub kind: SlotKind,
}

impl Slot {
    pub fn is_discrete(&self) -> bool {
        !matches!(self.kind, SlotKind::Gaussian { .. })
    }
}

/// Per-thread scratch space
pub(crate) struct Workspace {
    lambda: Vec<DVector<f64>>,
    up: Vec<DVector<f64>>,
    pi: Vec<DVector<f64>>,
    post: Vec<DVector<f64>>,
    x: Vec<DVector<f64>>,
}

/// A model compiled against a synchronized data set
pub struct CompiledTree {
    pub(crate) slots: Vec<Slot>,
    index: HashMap<VarId, usize>,
}

impl CompiledTree {
    /// Every potential must be initialized and every manifest variable
    /// must have a data column.
    pub fn new(model: &LatentTreeModel, data: &MixedData) -> anyhow::Result<Self> {
        let graph = model.graph();
        let order = graph.post_order();
        if order.is_empty() {
            anyhow::bail!("model {} is empty", model.name());
        }
        let position: HashMap<_, _> = order.iter().enumerate().map(|(s, &id)| (id, s)).collect();

        let column = |v: &Variable| {
            data.column_of(v).ok_or_else(|| {
                anyhow::anyhow!("structural mismatch: {} is not bound to a data column", v.name())
            })
        };

        let mut slots = Vec::with_capacity(order.len());
        for &id in &order {
            let variable = graph.variable(id).clone();
            let potential = model
                .potential(&variable)
                .ok_or_else(|| anyhow::anyhow!("{} has no parameters", variable.name()))?;
            let parent = graph.parent(id).map(|p| position[&p]);
            let children = graph.children(id).iter().map(|c| position[c]).collect();
            let parent_states = model.parent_states(id);
            let states = variable.cardinality().unwrap_or(0);

            let (table, kind) = match potential {
                Potential::Categorical(t) => {
                    let kind = if variable.is_latent() {
                        SlotKind::Latent
                    } else {
                        SlotKind::Observed {
                            column: column(&variable)?,
                        }
                    };
                    (t.clone(), kind)
                }
                Potential::Gaussian(comps) => {
                    let columns = variable
                        .manifest()
                        .iter()
                        .map(&column)
                        .collect::<anyhow::Result<Vec<_>>>()?;
                    let components = comps
                        .iter()
                        .map(|c| CompiledGaussian::new(c.mean.clone(), c.covariance.clone()))
                        .collect::<anyhow::Result<Vec<_>>>()
                        .map_err(|e| anyhow::anyhow!("{}: {}", variable.name(), e))?;
                    (DMatrix::zeros(0, 0), SlotKind::Gaussian { columns, components })
                }
            };

            slots.push(Slot {
                variable,
                parent,
                children,
                states,
                parent_states,
                table,
                kind,
            });
        }

        let index = slots
            .iter()
            .enumerate()
            .map(|(s, slot)| (slot.variable.id(), s))
            .collect();

        Ok(CompiledTree { slots, index })
    }

    pub(crate) fn slot_of(&self, variable: &Variable) -> Option<usize> {
        self.index.get(&variable.id()).copied()
    }

    pub(crate) fn workspace(&self) -> Workspace {
        let vec_of = |f: &dyn Fn(&Slot) -> usize| -> Vec<DVector<f64>> {
            self.slots.iter().map(|s| DVector::zeros(f(s))).collect()
        };
        Workspace {
            lambda: vec_of(&|s| s.states),
            up: vec_of(&|s| s.parent_states),
            pi: vec_of(&|s| s.states),
            post: vec_of(&|s| s.states),
            x: self
                .slots
                .iter()
                .map(|s| match &s.kind {
                    SlotKind::Gaussian { columns, .. } => DVector::zeros(columns.len()),
                    _ => DVector::zeros(0),
                })
                .collect(),
        }
    }

    /// Upward pass; returns the log-likelihood of one case
    fn upward(&self, data: &MixedData, case: usize, ws: &mut Workspace) -> anyhow::Result<f64> {
        let mut log_scale = 0.0;

        for (s, slot) in self.slots.iter().enumerate() {
            if slot.is_discrete() {
                ws.lambda[s].fill(1.0);
            }
        }

        for (s, slot) in self.slots.iter().enumerate() {
            match &slot.kind {
                SlotKind::Observed { column } => {
                    let x = data.value(case, *column);
                    if !x.is_nan() {
                        ws.lambda[s].fill(0.0);
                        ws.lambda[s][x as usize] = 1.0;
                    }
                }
                SlotKind::Latent => {
                    let m = ws.lambda[s].max();
                    if !(m > 0.0 && m.is_finite()) {
                        anyhow::bail!(
                            "case {} has zero likelihood at {}",
                            case,
                            slot.variable.name()
                        );
                    }
                    ws.lambda[s].unscale_mut(m);
                    log_scale += m.ln();
                }
                SlotKind::Gaussian {
                    columns,
                    components,
                } => {
                    let observed: Vec<usize> = (0..columns.len())
                        .filter(|&k| !data.is_missing(case, columns[k]))
                        .collect();
                    if observed.is_empty() {
                        ws.up[s].fill(1.0);
                    } else if observed.len() == columns.len() {
                        for (k, &j) in columns.iter().enumerate() {
                            ws.x[s][k] = data.value(case, j);
                        }
                        for (z, comp) in components.iter().enumerate() {
                            ws.up[s][z] = comp.log_density(&ws.x[s])?;
                        }
                    } else {
                        let x = DVector::from_iterator(
                            observed.len(),
                            observed.iter().map(|&k| data.value(case, columns[k])),
                        );
                        for (z, comp) in components.iter().enumerate() {
                            ws.up[s][z] = comp.marginal_log_density(&observed, &x)?;
                        }
                    }
                    if !observed.is_empty() {
                        let m = ws.up[s].max();
                        if !m.is_finite() {
                            anyhow::bail!("non-finite density at {}", slot.variable.name());
                        }
                        ws.up[s].apply(|v| *v = (*v - m).exp());
                        log_scale += m;
                    }
                }
            }

            if let Some(p) = slot.parent {
                if slot.is_discrete() {
                    ws.up[s].gemv(1.0, &slot.table, &ws.lambda[s], 0.0);
                }
                let (lambda, up) = (&mut ws.lambda, &ws.up);
                lambda[p].component_mul_assign(&up[s]);
            }
        }

        let root = self.slots.len() - 1;
        let lik = self.slots[root].table.row(0).transpose().dot(&ws.lambda[root]);
        if !(lik > 0.0 && lik.is_finite()) {
            anyhow::bail!("case {} has zero likelihood", case);
        }
        Ok(lik.ln() + log_scale)
    }

    /// Downward pass after `upward`; fills posteriors of discrete nodes
    /// and optionally accumulates weighted family statistics
    fn downward(
        &self,
        data: &MixedData,
        case: usize,
        ws: &mut Workspace,
        weight: f64,
        mut stats: Option<&mut SufficientStats>,
    ) {
        let root = self.slots.len() - 1;
        ws.pi[root] = self.slots[root].table.row(0).transpose();

        for s in (0..self.slots.len()).rev() {
            let slot = &self.slots[s];
            if !slot.is_discrete() {
                continue;
            }

            let mut post = ws.pi[s].component_mul(&ws.lambda[s]);
            normalize(&mut post);
            if s == root {
                if let Some(st) = stats.as_deref_mut() {
                    if let Some(c) = st.counts[s].as_mut() {
                        for (v, p) in post.iter().enumerate() {
                            c[(0, v)] += weight * p;
                        }
                    }
                }
            }
            ws.post[s] = post;

            let children = &slot.children;
            if children.is_empty() {
                continue;
            }

            // exclusion products: prefix[i] * suffix[i + 1]
            let k = slot.states;
            let mut prefix = vec![DVector::from_element(k, 1.0); children.len() + 1];
            for (i, &c) in children.iter().enumerate() {
                prefix[i + 1] = prefix[i].component_mul(&ws.up[c]);
            }
            let mut suffix = vec![DVector::from_element(k, 1.0); children.len() + 1];
            for i in (0..children.len()).rev() {
                suffix[i] = suffix[i + 1].component_mul(&ws.up[children[i]]);
            }

            for (i, &c) in children.iter().enumerate() {
                let outside = ws.pi[s]
                    .component_mul(&prefix[i])
                    .component_mul(&suffix[i + 1]);
                let child = &self.slots[c];

                match &child.kind {
                    SlotKind::Gaussian { columns, .. } => {
                        if let Some(st) = stats.as_deref_mut() {
                            if columns.iter().all(|&j| !data.is_missing(case, j)) {
                                let mut parent_post = outside.component_mul(&ws.up[c]);
                                normalize(&mut parent_post);
                                for (kk, &j) in columns.iter().enumerate() {
                                    ws.x[c][kk] = data.value(case, j);
                                }
                                if let Some(g) = st.gaussian[c].as_mut() {
                                    g.add(&parent_post, &ws.x[c], weight);
                                }
                            }
                        }
                    }
                    _ => {
                        if let Some(st) = stats.as_deref_mut() {
                            if let Some(counts) = st.counts[c].as_mut() {
                                let mut joint = DMatrix::<f64>::zeros(k, child.states);
                                for v in 0..k {
                                    for x in 0..child.states {
                                        joint[(v, x)] = outside[v]
                                            * child.table[(v, x)]
                                            * ws.lambda[c][x];
                                    }
                                }
                                let tot = joint.sum();
                                if tot > 0.0 {
                                    *counts += joint * (weight / tot);
                                }
                            }
                        }
                        let mut pi = child.table.transpose() * &outside;
                        normalize(&mut pi);
                        ws.pi[c] = pi;
                    }
                }
            }
        }
    }

    fn accumulate(
        &self,
        data: &MixedData,
        case: usize,
        ws: &mut Workspace,
        stats: &mut SufficientStats,
    ) -> anyhow::Result<()> {
        let w = data.weight(case);
        let ll = self.upward(data, case, ws)?;
        stats.loglikelihood += w * ll;
        self.downward(data, case, ws, w, Some(stats));
        Ok(())
    }

    /// Expected sufficient statistics (E-step) and the log-likelihood of
    /// the compiled parameters
    ///
    /// * `parallel` - split cases over the current rayon pool
    pub fn expected_statistics(
        &self,
        data: &MixedData,
        parallel: bool,
    ) -> anyhow::Result<SufficientStats> {
        let n = data.num_cases();
        let fold = |(mut stats, mut ws): (SufficientStats, Workspace),
                    i: usize|
         -> anyhow::Result<(SufficientStats, Workspace)> {
            self.accumulate(data, i, &mut ws, &mut stats)?;
            Ok((stats, ws))
        };

        if parallel {
            (0..n)
                .into_par_iter()
                .try_fold(|| (SufficientStats::zeros(self), self.workspace()), fold)
                .map(|r| r.map(|(s, _)| s))
                .try_reduce(|| SufficientStats::zeros(self), |a, b| Ok(a.merge(b)))
        } else {
            (0..n)
                .try_fold((SufficientStats::zeros(self), self.workspace()), fold)
                .map(|(s, _)| s)
        }
    }

    /// Weighted log-likelihood of the data
    pub fn loglikelihood(&self, data: &MixedData, parallel: bool) -> anyhow::Result<f64> {
        let n = data.num_cases();
        if parallel {
            (0..n)
                .into_par_iter()
                .map_init(
                    || self.workspace(),
                    |ws, i| -> anyhow::Result<f64> { Ok(data.weight(i) * self.upward(data, i, ws)?) },
                )
                .try_reduce(|| 0.0, |a, b| Ok(a + b))
        } else {
            let mut ws = self.workspace();
            let mut tot = 0.0;
            for i in 0..n {
                tot += data.weight(i) * self.upward(data, i, &mut ws)?;
            }
            Ok(tot)
        }
    }

    /// Posterior marginals of the latent variables for every case,
    /// in node order of the compiled slots
    pub fn latent_posteriors(
        &self,
        data: &MixedData,
    ) -> anyhow::Result<Vec<(Variable, Vec<DVector<f64>>)>> {
        let latent: Vec<usize> = (0..self.slots.len())
            .filter(|&s| matches!(self.slots[s].kind, SlotKind::Latent))
            .collect();
        let per_case = (0..data.num_cases())
            .into_par_iter()
            .map_init(
                || self.workspace(),
                |ws, i| -> anyhow::Result<Vec<DVector<f64>>> {
                    self.upward(data, i, ws)?;
                    self.downward(data, i, ws, 1.0, None);
                    Ok(latent.iter().map(|&s| ws.post[s].clone()).collect())
                },
            )
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(latent
            .iter()
            .enumerate()
            .map(|(k, &s)| {
                (
                    self.slots[s].variable.clone(),
                    per_case.iter().map(|p| p[k].clone()).collect(),
                )
            })
            .collect())
    }

    /// Empty Gaussian statistics for a slot
    pub(crate) fn empty_gaussian(&self, s: usize) -> Option<GaussianStats> {
        match &self.slots[s].kind {
            SlotKind::Gaussian { columns, .. } => {
                Some(GaussianStats::zeros(self.slots[s].parent_states, columns.len()))
            }
            _ => None,
        }
    }
}

fn normalize(v: &mut DVector<f64>) {
    let tot = v.sum();
    if tot > 0.0 {
        v.unscale_mut(tot);
    } else {
        v.fill(1.0 / v.len().max(1) as f64);
    }
}

/// Log-likelihood of a fully parameterized model
pub fn loglikelihood(model: &LatentTreeModel, data: &MixedData) -> anyhow::Result<f64> {
    CompiledTree::new(model, data)?.loglikelihood(data, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tree_model::variable::default_state_names;
    use tree_model::GaussianComponent;

    /// z -> {a, b}, all binary, fully parameterized
    fn binary_lcm() -> (LatentTreeModel, Vec<Variable>) {
        let a = Variable::discrete("a", default_state_names(2));
        let b = Variable::discrete("b", default_state_names(2));
        let mut m = LatentTreeModel::latent_class("m", &[a.clone(), b.clone()], 2).unwrap();
        let z = m.latent_variables()[0].clone();
        m.set_potential(&z, Potential::Categorical(DMatrix::from_row_slice(1, 2, &[0.4, 0.6])))
            .unwrap();
        m.set_potential(
            &a,
            Potential::Categorical(DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.2, 0.8])),
        )
        .unwrap();
        m.set_potential(
            &b,
            Potential::Categorical(DMatrix::from_row_slice(2, 2, &[0.7, 0.3, 0.1, 0.9])),
        )
        .unwrap();
        (m, vec![z, a, b])
    }

    #[test]
    fn test_matches_enumeration() -> anyhow::Result<()> {
        let (m, vars) = binary_lcm();
        let values = DMatrix::from_row_slice(3, 2, &[0.0, 1.0, 1.0, 1.0, f64::NAN, 0.0]);
        let data = MixedData::from_values(vec![vars[1].clone(), vars[2].clone()], values)?;

        let pz = [0.4, 0.6];
        let pa = [[0.9, 0.1], [0.2, 0.8]];
        let pb = [[0.7, 0.3], [0.1, 0.9]];
        let brute = |a: Option<usize>, b: Option<usize>| -> f64 {
            (0..2)
                .map(|z| {
                    pz[z]
                        * a.map(|x| pa[z][x]).unwrap_or(1.0)
                        * b.map(|x| pb[z][x]).unwrap_or(1.0)
                })
                .sum::<f64>()
                .ln()
        };
        let expected = brute(Some(0), Some(1)) + brute(Some(1), Some(1)) + brute(None, Some(0));

        let compiled = CompiledTree::new(&m, &data)?;
        assert_abs_diff_eq!(compiled.loglikelihood(&data, false)?, expected, epsilon = 1e-10);
        assert_abs_diff_eq!(compiled.loglikelihood(&data, true)?, expected, epsilon = 1e-10);

        let stats = compiled.expected_statistics(&data, false)?;
        assert_abs_diff_eq!(stats.loglikelihood, expected, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn test_posterior_of_latent() -> anyhow::Result<()> {
        let (m, vars) = binary_lcm();
        let values = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        let data = MixedData::from_values(vec![vars[1].clone(), vars[2].clone()], values)?;
        let compiled = CompiledTree::new(&m, &data)?;
        let post = compiled.latent_posteriors(&data)?;
        assert_eq!(post.len(), 1);
        let p0 = 0.4 * 0.9 * 0.7;
        let p1 = 0.6 * 0.2 * 0.1;
        assert_abs_diff_eq!(post[0].1[0][0], p0 / (p0 + p1), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_gaussian_leaf_density() -> anyhow::Result<()> {
        let x = Variable::continuous("x");
        let mut m = LatentTreeModel::latent_class("g", &[x.clone()], 1)?;
        let z = m.latent_variables()[0].clone();
        m.set_potential(&z, Potential::Categorical(DMatrix::from_element(1, 1, 1.0)))?;
        m.set_potential(
            &x,
            Potential::Gaussian(vec![GaussianComponent {
                mean: DVector::from_element(1, 1.0),
                covariance: DMatrix::from_element(1, 1, 4.0),
            }]),
        )?;
        let data = MixedData::from_values(vec![x], DMatrix::from_row_slice(2, 1, &[3.0, f64::NAN]))?;
        let ll = loglikelihood(&m, &data)?;
        let expected = -0.5 * (LN_2PI + 4.0_f64.ln() + 1.0);
        assert_abs_diff_eq!(ll, expected, epsilon = 1e-12);
        Ok(())
    }
}
