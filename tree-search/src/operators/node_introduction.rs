use super::{admissible, latent_nodes, RestrictedNodeRelocation, SearchOperator};
use crate::candidate::Candidate;
use log::debug;
use std::sync::Arc;
use tree_em::Estimate;
use tree_model::{LatentTreeModel, NodeId, Variable};

/// Split a latent node: a new latent of the same cardinality takes over
/// two of its neighbours
#[derive(Debug, Clone, Default)]
pub struct NodeIntroduction;

struct Split {
    model: LatentTreeModel,
    created: Variable,
    moved: [Variable; 2],
    touched: Vec<NodeId>,
}

fn split(base: &LatentTreeModel, z: NodeId, a: NodeId, b: NodeId) -> anyhow::Result<Split> {
    let mut model = base.clone();
    let parent = model.graph().parent(z);
    if parent == Some(a) || parent == Some(b) {
        model.reroot(z)?;
    }
    let k = model
        .variable(z)
        .cardinality()
        .ok_or_else(|| anyhow::anyhow!("{} has no states", model.variable(z)))?;
    let created = Variable::latent(&model.fresh_latent_name(), k);
    let graph = model.graph_mut();
    let z_new = graph.add_child(z, created.clone())?;
    graph.move_subtree(a, z_new)?;
    graph.move_subtree(b, z_new)?;

    let moved = [model.variable(a).clone(), model.variable(b).clone()];
    Ok(Split {
        model,
        created,
        moved,
        touched: vec![z, z_new, a, b],
    })
}

impl SearchOperator for NodeIntroduction {
    fn name(&self) -> &'static str {
        "node introduction"
    }

    fn generate_candidates(&self, base: &Arc<Estimate>) -> Vec<Candidate> {
        let mut out = vec![];
        for z in latent_nodes(&base.model) {
            let neighbours = base.model.graph().neighbors(z);
            if neighbours.len() < 3 {
                continue;
            }
            for (i, &a) in neighbours.iter().enumerate() {
                for &b in &neighbours[i + 1..] {
                    let s = match split(&base.model, z, a, b) {
                        Ok(s) => s,
                        Err(e) => {
                            debug!("skipping a split of {}: {}", base.model.variable(z), e);
                            continue;
                        }
                    };
                    if !admissible(&s.model, &s.touched) {
                        continue;
                    }
                    let description = format!(
                        "{} takes {} and {} from {}",
                        s.created.name(),
                        s.moved[0].name(),
                        s.moved[1].name(),
                        base.model.variable(z).name()
                    );
                    let mut changed = vec![s.created.clone()];
                    changed.extend(s.moved.iter().cloned());
                    out.push(
                        Candidate::new(base, s.model, self.name(), description)
                            .with_changed(changed)
                            .with_created(vec![s.created]),
                    );
                }
            }
        }
        out
    }

    /// Keep moving neighbours of the split node to the new one
    fn refinement(&self, accepted: &Candidate) -> Option<Box<dyn SearchOperator>> {
        let target = accepted.created().first()?.clone();
        let model = accepted.model();
        let source = model.graph().parent(model.node_of(&target)?)?;
        Some(Box::new(RestrictedNodeRelocation::new(
            model.variable(source).clone(),
            target,
        )))
    }
}
