use super::{admissible, latent_nodes, SearchOperator};
use crate::candidate::Candidate;
use log::debug;
use std::sync::Arc;
use tree_em::Estimate;
use tree_model::{LatentTreeModel, NodeId, Variable};

/// Remove a latent node and hand its other neighbours to an adjacent
/// latent node
#[derive(Debug, Clone, Default)]
pub struct NodeDeletion;

struct Deleted {
    model: LatentTreeModel,
    removed: Variable,
    moved: Vec<Variable>,
    touched: Vec<NodeId>,
}

/// Delete `z` into its latent neighbour `w`
fn delete_into(base: &LatentTreeModel, z: NodeId, w: NodeId) -> anyhow::Result<Deleted> {
    let mut model = base.clone();
    if model.graph().parent(w) == Some(z) {
        model.reroot(w)?;
    }
    let children = model.graph().children(z).to_vec();
    for &c in &children {
        model.graph_mut().move_subtree(c, w)?;
    }
    model.graph_mut().remove_edge(w, z)?;
    let removed = model.graph_mut().remove_node(z)?;
    model.invalidate(&removed);

    let moved = children.iter().map(|&c| model.variable(c).clone()).collect();
    let mut touched = vec![w];
    touched.extend(children);
    Ok(Deleted {
        model,
        removed,
        moved,
        touched,
    })
}

impl SearchOperator for NodeDeletion {
    fn name(&self) -> &'static str {
        "node deletion"
    }

    fn generate_candidates(&self, base: &Arc<Estimate>) -> Vec<Candidate> {
        let mut out = vec![];
        for z in latent_nodes(&base.model) {
            for w in base.model.graph().neighbors(z) {
                if !base.model.variable(w).is_latent() {
                    continue;
                }
                let d = match delete_into(&base.model, z, w) {
                    Ok(d) => d,
                    Err(e) => {
                        debug!("skipping a deletion of {}: {}", base.model.variable(z), e);
                        continue;
                    }
                };
                if !admissible(&d.model, &d.touched) {
                    continue;
                }
                let description = format!(
                    "delete {} into {}",
                    d.removed.name(),
                    base.model.variable(w).name()
                );
                out.push(
                    Candidate::new(base, d.model, self.name(), description)
                        .with_changed(d.moved)
                        .with_removed(vec![d.removed]),
                );
            }
        }
        out
    }
}
