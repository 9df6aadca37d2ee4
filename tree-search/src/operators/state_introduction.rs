use super::{admissible, child_variables, latent_nodes, SearchOperator};
use crate::candidate::Candidate;
use std::sync::Arc;
use tree_em::Estimate;

/// Add one state to a latent variable
#[derive(Debug, Clone, Default)]
pub struct StateIntroduction;

impl SearchOperator for StateIntroduction {
    fn name(&self) -> &'static str {
        "state introduction"
    }

    fn generate_candidates(&self, base: &Arc<Estimate>) -> Vec<Candidate> {
        let mut out = vec![];
        for z in latent_nodes(&base.model) {
            let mut model = base.model.clone();
            let old = model.variable(z).clone();
            let k = old.cardinality().unwrap_or(0);
            let Ok(new) = old.resized(k + 1) else {
                continue;
            };
            if model.graph_mut().set_variable(z, new.clone()).is_err() {
                continue;
            }
            model.invalidate(&old);

            let mut touched = vec![z];
            touched.extend(model.graph().neighbors(z));
            if !admissible(&model, &touched) {
                continue;
            }

            let mut changed = vec![new.clone()];
            changed.extend(child_variables(&model, z));
            let description = format!("{}: {} -> {} states", new.name(), k, k + 1);
            out.push(
                Candidate::new(base, model, self.name(), description)
                    .with_changed(changed)
                    .with_removed(vec![old])
                    .with_created(vec![new]),
            );
        }
        out
    }
}
