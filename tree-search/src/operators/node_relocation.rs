use super::{admissible, latent_nodes, relocate, successor, SearchOperator};
use crate::candidate::Candidate;
use log::debug;
use std::sync::Arc;
use tree_em::Estimate;
use tree_model::{NodeId, Variable};

/// Move a neighbour of a latent node, with everything on its side, to
/// another latent node
#[derive(Debug, Clone, Default)]
pub struct NodeRelocation;

fn relocation_candidate(
    base: &Arc<Estimate>,
    z: NodeId,
    w: NodeId,
    target: NodeId,
    operator: &'static str,
) -> Option<Candidate> {
    let r = match relocate(&base.model, z, w, target) {
        Ok(Some(r)) => r,
        Ok(None) => return None,
        Err(e) => {
            debug!("skipping a relocation: {}", e);
            return None;
        }
    };
    if !admissible(&r.model, &r.touched) {
        return None;
    }
    let model = &base.model;
    let description = format!(
        "move {} from {} to {}",
        r.moved.name(),
        model.variable(z).name(),
        model.variable(target).name()
    );
    Some(
        Candidate::new(base, r.model, operator, description)
            .with_changed(vec![r.moved])
            .with_removed(r.removed),
    )
}

impl SearchOperator for NodeRelocation {
    fn name(&self) -> &'static str {
        "node relocation"
    }

    fn generate_candidates(&self, base: &Arc<Estimate>) -> Vec<Candidate> {
        let latents = latent_nodes(&base.model);
        let mut out = vec![];
        for &z in &latents {
            for w in base.model.graph().neighbors(z) {
                for &target in latents.iter().filter(|&&l| l != z && l != w) {
                    out.extend(relocation_candidate(base, z, w, target, self.name()));
                }
            }
        }
        out
    }
}

/// Move neighbours of `source` to `target` only
#[derive(Debug, Clone)]
pub struct RestrictedNodeRelocation {
    source: Variable,
    target: Variable,
}

impl RestrictedNodeRelocation {
    pub fn new(source: Variable, target: Variable) -> Self {
        RestrictedNodeRelocation { source, target }
    }

    pub fn source(&self) -> &Variable {
        &self.source
    }

    pub fn target(&self) -> &Variable {
        &self.target
    }
}

impl SearchOperator for RestrictedNodeRelocation {
    fn name(&self) -> &'static str {
        "restricted node relocation"
    }

    fn generate_candidates(&self, base: &Arc<Estimate>) -> Vec<Candidate> {
        let model = &base.model;
        let (Some(z), Some(target)) = (model.node_of(&self.source), model.node_of(&self.target))
        else {
            return vec![];
        };
        model
            .graph()
            .neighbors(z)
            .into_iter()
            .filter(|&w| w != target)
            .filter_map(|w| relocation_candidate(base, z, w, target, self.name()))
            .collect()
    }

    fn update(&mut self, latest: &Candidate) {
        if let Some(v) = successor(&self.source, latest) {
            self.source = v;
        }
        if let Some(v) = successor(&self.target, latest) {
            self.target = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_util::*;
    use tree_model::LatentTreeModel;

    #[test]
    fn test_single_latent_has_nowhere_to_go() {
        let base = unfitted(continuous_class(2, 2));
        assert!(NodeRelocation.generate_candidates(&base).is_empty());
    }

    #[test]
    fn test_moves_keep_a_tree() {
        let base = unfitted(two_latents(2, 2));
        let cands = NodeRelocation.generate_candidates(&base);
        // a, b to Z2; c, d, e to Z1
        assert_eq!(cands.len(), 5);
        assert_all_admissible(&cands);
        for c in &cands {
            assert_eq!(c.model().graph().num_nodes(), 7);
            assert!(c.removed().is_empty());
        }
    }

    #[test]
    fn test_emptied_latent_is_pruned() {
        // Z1 -> {a, b, c, Z2 -> {d}}: moving d away leaves Z2 childless
        let mut m = LatentTreeModel::new("p");
        let g = m.graph_mut();
        let z1 = g.add_node(tree_model::Variable::latent("Z1", 2)).unwrap();
        for x in ["a", "b", "c"] {
            g.add_child(z1, binary(x)).unwrap();
        }
        let z2 = g.add_child(z1, tree_model::Variable::latent("Z2", 2)).unwrap();
        g.add_child(z2, binary("d")).unwrap();
        let base = unfitted(m);

        let cands = NodeRelocation.generate_candidates(&base);
        let c = cands
            .iter()
            .find(|c| c.description() == "move d from Z2 to Z1")
            .unwrap();
        assert_eq!(c.removed().len(), 1);
        assert_eq!(c.removed()[0].name(), "Z2");
        c.model().validate().unwrap();
        assert_eq!(c.model().latent_variables().len(), 1);
    }

    #[test]
    fn test_restricted_moves_only_into_target() {
        let m = two_latents(2, 2);
        let z1 = m.find_variable("Z1").unwrap();
        let z2 = m.find_variable("Z2").unwrap();
        let base = unfitted(m);
        let op = RestrictedNodeRelocation::new(z1, z2.clone());
        let cands = op.generate_candidates(&base);
        assert_eq!(cands.len(), 2);
        for c in &cands {
            let moved = &c.changed()[0];
            let id = c.model().node_of(moved).unwrap();
            assert_eq!(c.model().graph().parent(id), c.model().node_of(&z2));
        }
    }
}
