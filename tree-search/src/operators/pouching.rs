use super::{admissible, latent_nodes, successor, SearchOperator};
use crate::candidate::Candidate;
use log::debug;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;
use tree_em::Estimate;
use tree_model::{GaussianComponent, LatentTreeModel, NodeId, Potential, Variable};

/// Merge two continuous leaf siblings into one joint leaf
#[derive(Debug, Clone, Default)]
pub struct Pouching;

/// Continuous leaves directly under `z`
fn continuous_leaves(model: &LatentTreeModel, z: NodeId) -> Vec<NodeId> {
    let graph = model.graph();
    graph
        .children(z)
        .iter()
        .copied()
        .filter(|&c| graph.is_leaf(c) && graph.variable(c).is_continuous())
        .collect()
}

/// Per parent state: means stacked, covariances block diagonal
fn stack_components(a: &[GaussianComponent], b: &[GaussianComponent]) -> Vec<GaussianComponent> {
    a.iter()
        .zip(b)
        .map(|(ca, cb)| {
            let (da, db) = (ca.mean.len(), cb.mean.len());
            let mean = DVector::from_iterator(
                da + db,
                ca.mean.iter().chain(cb.mean.iter()).copied(),
            );
            let mut covariance = DMatrix::zeros(da + db, da + db);
            covariance.view_mut((0, 0), (da, da)).copy_from(&ca.covariance);
            covariance.view_mut((da, da), (db, db)).copy_from(&cb.covariance);
            GaussianComponent { mean, covariance }
        })
        .collect()
}

/// Merge leaves `a` and `b` of `z`
fn merge(
    base: &Arc<Estimate>,
    z: NodeId,
    a: NodeId,
    b: NodeId,
    operator: &'static str,
) -> Option<Candidate> {
    let build = || -> anyhow::Result<(LatentTreeModel, Variable, [Variable; 2])> {
        let mut model = base.model.clone();
        let va = model.variable(a).clone();
        let vb = model.variable(b).clone();
        let joint = Variable::joint(&[va.clone(), vb.clone()])?;

        let graph = model.graph_mut();
        graph.remove_edge(z, a)?;
        graph.remove_node(a)?;
        graph.remove_edge(z, b)?;
        graph.remove_node(b)?;
        graph.add_child(z, joint.clone())?;
        model.invalidate(&va);
        model.invalidate(&vb);

        let pa = base.model.potential(&va).and_then(|p| p.components());
        let pb = base.model.potential(&vb).and_then(|p| p.components());
        if let (Some(pa), Some(pb)) = (pa, pb) {
            model.set_potential(&joint, Potential::Gaussian(stack_components(pa, pb)))?;
        }
        Ok((model, joint, [va, vb]))
    };
    let (model, joint, parts) = match build() {
        Ok(x) => x,
        Err(e) => {
            debug!("skipping a merge under {}: {}", base.model.variable(z), e);
            return None;
        }
    };
    if !admissible(&model, &[z]) {
        return None;
    }
    let description = format!(
        "merge {} and {} under {}",
        parts[0].name(),
        parts[1].name(),
        base.model.variable(z).name()
    );
    Some(
        Candidate::new(base, model, operator, description)
            .with_changed(vec![joint.clone()])
            .with_removed(parts.to_vec())
            .with_created(vec![joint]),
    )
}

impl SearchOperator for Pouching {
    fn name(&self) -> &'static str {
        "pouching"
    }

    fn generate_candidates(&self, base: &Arc<Estimate>) -> Vec<Candidate> {
        let mut out = vec![];
        for z in latent_nodes(&base.model) {
            let leaves = continuous_leaves(&base.model, z);
            for (i, &a) in leaves.iter().enumerate() {
                for &b in &leaves[i + 1..] {
                    out.extend(merge(base, z, a, b, self.name()));
                }
            }
        }
        out
    }

    /// Keep growing the new joint leaf
    fn refinement(&self, accepted: &Candidate) -> Option<Box<dyn SearchOperator>> {
        let joint = accepted.created().first()?;
        Some(Box::new(RestrictedPouching::new(joint.clone())))
    }
}

/// Merge one fixed continuous leaf with its continuous siblings
#[derive(Debug, Clone)]
pub struct RestrictedPouching {
    target: Variable,
}

impl RestrictedPouching {
    pub fn new(target: Variable) -> Self {
        RestrictedPouching { target }
    }

    pub fn target(&self) -> &Variable {
        &self.target
    }
}

impl SearchOperator for RestrictedPouching {
    fn name(&self) -> &'static str {
        "restricted pouching"
    }

    fn generate_candidates(&self, base: &Arc<Estimate>) -> Vec<Candidate> {
        let model = &base.model;
        let Some(t) = model.node_of(&self.target) else {
            return vec![];
        };
        let Some(z) = model.graph().parent(t) else {
            return vec![];
        };
        continuous_leaves(model, z)
            .into_iter()
            .filter(|&x| x != t)
            .filter_map(|x| merge(base, z, t, x, self.name()))
            .collect()
    }

    /// Follow the target into the joint that absorbed it
    fn update(&mut self, latest: &Candidate) {
        if let Some(v) = successor(&self.target, latest) {
            self.target = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_util::*;
    use crate::operators::NodeRelocation;

    #[test]
    fn test_two_leaves_one_merge_no_relocation() {
        let base = unfitted(continuous_class(2, 2));
        let merged = Pouching.generate_candidates(&base);
        assert_eq!(merged.len(), 1);
        assert_all_admissible(&merged);
        let joint = &merged[0].created()[0];
        assert_eq!(joint.name(), "x0+x1");
        assert_eq!(joint.dimension(), 2);
        assert_eq!(merged[0].removed().len(), 2);
        assert!(NodeRelocation.generate_candidates(&base).is_empty());
    }

    #[test]
    fn test_restricted_follows_the_joint() {
        let base = unfitted(continuous_class(2, 4));
        let x0 = base.model.find_variable("x0").unwrap();
        let x1 = base.model.find_variable("x1").unwrap();

        let mut op = RestrictedPouching::new(x0.clone());
        let first = op.generate_candidates(&base);
        assert_eq!(first.len(), 3);

        let accepted = first.into_iter().next().unwrap();
        let joint = accepted.created()[0].clone();
        op.update(&accepted);
        assert_eq!(op.target(), &joint);

        let next = unfitted(accepted.model().clone());
        let cands = op.generate_candidates(&next);
        assert_eq!(cands.len(), 2);
        for c in &cands {
            assert!(c.removed().contains(&joint));
            assert!(!c.removed().contains(&x0));
            assert!(!c.removed().contains(&x1));
            assert_eq!(c.created()[0].dimension(), 3);
        }
    }

    #[test]
    fn test_warm_start_is_block_diagonal() {
        let mut m = continuous_class(2, 2);
        for (i, name) in ["x0", "x1"].iter().enumerate() {
            let v = m.find_variable(name).unwrap();
            let comps = (0..2)
                .map(|s| GaussianComponent {
                    mean: DVector::from_element(1, (i * 10 + s) as f64),
                    covariance: DMatrix::from_element(1, 1, 1.0 + i as f64),
                })
                .collect();
            m.set_potential(&v, Potential::Gaussian(comps)).unwrap();
        }
        let cands = Pouching.generate_candidates(&unfitted(m));
        let c = &cands[0];
        let comps = c
            .model()
            .potential(&c.created()[0])
            .and_then(|p| p.components())
            .unwrap();
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[1].mean.as_slice(), &[1.0, 11.0]);
        assert_eq!(comps[1].covariance[(1, 1)], 2.0);
        assert_eq!(comps[1].covariance[(0, 1)], 0.0);
    }
}
