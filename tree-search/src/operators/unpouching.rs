use super::{admissible, latent_nodes, SearchOperator};
use crate::candidate::Candidate;
use log::debug;
use std::sync::Arc;
use tree_em::Estimate;
use tree_model::{GaussianComponent, LatentTreeModel, NodeId, Potential, Variable, VariableKind};

/// Split one component off a joint continuous leaf
#[derive(Debug, Clone, Default)]
pub struct Unpouching;

/// Marginal of every component over the coordinates in `keep`
fn marginal(components: &[GaussianComponent], keep: &[usize]) -> Vec<GaussianComponent> {
    components
        .iter()
        .map(|c| GaussianComponent {
            mean: c.mean.select_rows(keep),
            covariance: c.covariance.select_rows(keep).select_columns(keep),
        })
        .collect()
}

/// Replace joint leaf `j` under `z` with scalar `parts[k]` and the joint
/// of the rest
fn separate(
    base: &LatentTreeModel,
    z: NodeId,
    j: NodeId,
    parts: &[Variable],
    k: usize,
) -> anyhow::Result<(LatentTreeModel, Vec<Variable>)> {
    let mut model = base.clone();
    let joint = model.variable(j).clone();

    let rest: Vec<usize> = (0..parts.len()).filter(|&i| i != k).collect();
    let rest_var = if rest.len() == 1 {
        parts[rest[0]].clone()
    } else {
        let vars: Vec<Variable> = rest.iter().map(|&i| parts[i].clone()).collect();
        Variable::joint(&vars)?
    };
    let created = vec![parts[k].clone(), rest_var];

    let graph = model.graph_mut();
    graph.remove_edge(z, j)?;
    graph.remove_node(j)?;
    for v in &created {
        graph.add_child(z, v.clone())?;
    }
    model.invalidate(&joint);

    if let Some(comps) = base.potential(&joint).and_then(|p| p.components()) {
        model.set_potential(&created[0], Potential::Gaussian(marginal(comps, &[k])))?;
        model.set_potential(&created[1], Potential::Gaussian(marginal(comps, &rest)))?;
    }
    Ok((model, created))
}

impl SearchOperator for Unpouching {
    fn name(&self) -> &'static str {
        "unpouching"
    }

    fn generate_candidates(&self, base: &Arc<Estimate>) -> Vec<Candidate> {
        let model = &base.model;
        let mut out = vec![];
        for z in latent_nodes(model) {
            for &j in model.graph().children(z) {
                let joint = model.variable(j);
                let VariableKind::ContinuousJoint { components } = joint.kind() else {
                    continue;
                };
                // both splits of a pair give the same two scalars
                let splits = if components.len() == 2 { 1 } else { components.len() };
                for k in 0..splits {
                    let (edited, created) = match separate(model, z, j, components, k) {
                        Ok(x) => x,
                        Err(e) => {
                            debug!("skipping a split of {}: {}", joint, e);
                            continue;
                        }
                    };
                    if !admissible(&edited, &[z]) {
                        continue;
                    }
                    let description =
                        format!("separate {} from {}", created[0].name(), joint.name());
                    out.push(
                        Candidate::new(base, edited, self.name(), description)
                            .with_changed(created.clone())
                            .with_removed(vec![joint.clone()])
                            .with_created(created),
                    );
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_util::*;
    use crate::operators::Pouching;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn test_pair_splits_once() {
        let base = unfitted(continuous_class(2, 2));
        let merged = Pouching.generate_candidates(&base);
        let pouched = unfitted(merged[0].model().clone());
        let cands = Unpouching.generate_candidates(&pouched);
        assert_eq!(cands.len(), 1);
        assert_all_admissible(&cands);

        // scalars come back as the same variables, so data columns still match
        let x0 = base.model.find_variable("x0").unwrap();
        let x1 = base.model.find_variable("x1").unwrap();
        assert_eq!(cands[0].created(), &[x0, x1]);
    }

    #[test]
    fn test_triple_splits_each_way() {
        let base = unfitted(continuous_class(2, 3));
        let pair = Pouching.generate_candidates(&base).remove(0);
        let pair_model = unfitted(pair.model().clone());
        let triple = Pouching.generate_candidates(&pair_model).remove(0);
        let joint = triple.created()[0].clone();
        assert_eq!(joint.dimension(), 3);

        let mut m = triple.model().clone();
        let comps = (0..2)
            .map(|s| GaussianComponent {
                mean: DVector::from_vec(vec![s as f64, 10.0, 20.0]),
                covariance: DMatrix::from_fn(3, 3, |r, c| {
                    if r == c {
                        1.0 + r as f64
                    } else {
                        0.1
                    }
                }),
            })
            .collect();
        m.set_potential(&joint, Potential::Gaussian(comps)).unwrap();

        let cands = Unpouching.generate_candidates(&unfitted(m));
        assert_eq!(cands.len(), 3);
        // the triple was built as x2 + (x0 + x1)
        let first = &cands[0];
        assert_eq!(first.created()[0].name(), "x2");
        assert_eq!(first.created()[1].name(), "x0+x1");
        let potential_of = |v: &Variable| {
            first
                .model()
                .potential(v)
                .and_then(|p| p.components())
                .unwrap()
                .to_vec()
        };
        let single = potential_of(&first.created()[0]);
        assert_eq!(single[1].mean.as_slice(), &[1.0]);
        let rest = potential_of(&first.created()[1]);
        assert_eq!(rest[1].mean.as_slice(), &[10.0, 20.0]);
        assert_eq!(rest[1].covariance[(0, 0)], 2.0);
        assert_eq!(rest[1].covariance[(1, 1)], 3.0);
        assert_eq!(rest[1].covariance[(0, 1)], 0.1);
    }
}
