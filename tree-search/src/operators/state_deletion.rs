use super::{admissible, child_variables, latent_nodes, SearchOperator};
use crate::candidate::Candidate;
use log::debug;
use nalgebra::DMatrix;
use std::sync::Arc;
use tree_em::Estimate;
use tree_model::{LatentTreeModel, NodeId, Potential, Variable};

/// Remove one state from a latent variable with at least three states;
/// one candidate per state
#[derive(Debug, Clone, Default)]
pub struct StateDeletion;

fn drop_column(table: &DMatrix<f64>, state: usize) -> DMatrix<f64> {
    let mut t = table.clone().remove_column(state);
    for mut row in t.row_iter_mut() {
        let tot = row.sum();
        if tot > 0.0 {
            row /= tot;
        } else {
            row.fill(1.0 / row.len() as f64);
        }
    }
    t
}

/// Carry the surviving parameters over to the reduced node
fn shrink_parameters(
    base: &LatentTreeModel,
    model: &mut LatentTreeModel,
    z: NodeId,
    old: &Variable,
    new: &Variable,
    state: usize,
) -> anyhow::Result<()> {
    if let Some(t) = base.potential(old).and_then(|p| p.table()) {
        model.set_potential(new, Potential::Categorical(drop_column(t, state)))?;
    }
    for child in child_variables(model, z) {
        let shrunk = match base.potential(&child) {
            Some(Potential::Categorical(t)) => {
                Potential::Categorical(t.clone().remove_row(state))
            }
            Some(Potential::Gaussian(comps)) => {
                let mut comps = comps.clone();
                comps.remove(state);
                Potential::Gaussian(comps)
            }
            None => continue,
        };
        model.set_potential(&child, shrunk)?;
    }
    Ok(())
}

impl SearchOperator for StateDeletion {
    fn name(&self) -> &'static str {
        "state deletion"
    }

    fn generate_candidates(&self, base: &Arc<Estimate>) -> Vec<Candidate> {
        let mut out = vec![];
        for z in latent_nodes(&base.model) {
            let old = base.model.variable(z).clone();
            let k = old.cardinality().unwrap_or(0);
            if k < 3 {
                continue;
            }
            for state in 0..k {
                let Ok(new) = old.without_state(state) else {
                    continue;
                };
                let mut model = base.model.clone();
                if model.graph_mut().set_variable(z, new.clone()).is_err() {
                    continue;
                }
                model.invalidate(&old);
                if let Err(e) = shrink_parameters(&base.model, &mut model, z, &old, &new, state) {
                    debug!("{}: {}", self.name(), e);
                    continue;
                }

                let mut touched = vec![z];
                touched.extend(model.graph().neighbors(z));
                if !admissible(&model, &touched) {
                    continue;
                }

                let mut changed = vec![new.clone()];
                changed.extend(child_variables(&model, z));
                let description = format!(
                    "{}: drop state {} ({} -> {} states)",
                    new.name(),
                    old.states().map(|s| s[state].as_ref()).unwrap_or(""),
                    k,
                    k - 1
                );
                out.push(
                    Candidate::new(base, model, self.name(), description)
                        .with_changed(changed)
                        .with_removed(vec![old.clone()])
                        .with_created(vec![new]),
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_util::*;

    #[test]
    fn test_one_candidate_per_state() {
        let base = unfitted(two_latents(3, 2));
        let cands = StateDeletion.generate_candidates(&base);
        assert_eq!(cands.len(), 3);
        assert_all_admissible(&cands);
        for c in &cands {
            assert_eq!(c.created()[0].cardinality(), Some(2));
            assert_eq!(c.removed()[0].cardinality(), Some(3));
        }
        let names = cands[1].created()[0].states().unwrap().to_vec();
        let expected: Vec<Box<str>> = vec!["s0".into(), "s2".into()];
        assert_eq!(names, expected);
    }

    #[test]
    fn test_keeps_remaining_parameters() {
        let leaves = [binary("a"), binary("b"), binary("c")];
        let mut m = LatentTreeModel::latent_class("m", &leaves, 3).unwrap();
        let z = m.latent_variables()[0].clone();
        let a = m.find_variable("a").unwrap();
        let prior = DMatrix::from_row_slice(1, 3, &[0.2, 0.3, 0.5]);
        m.set_potential(&z, Potential::Categorical(prior)).unwrap();
        m.set_potential(
            &a,
            Potential::Categorical(DMatrix::from_row_slice(3, 2, &[0.1, 0.9, 0.5, 0.5, 0.7, 0.3])),
        )
        .unwrap();
        let cands = StateDeletion.generate_candidates(&unfitted(m));
        let c = &cands[0];
        let new_z = &c.created()[0];
        let tz = c.model().potential(new_z).unwrap().table().unwrap();
        approx::assert_abs_diff_eq!(tz[(0, 0)], 0.375, epsilon = 1e-12);
        let ta = c.model().potential(&a).unwrap().table().unwrap();
        assert_eq!(ta.nrows(), 2);
        approx::assert_abs_diff_eq!(ta[(0, 0)], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_shrink_reports_a_foreign_variable() {
        let leaves = [binary("a"), binary("b"), binary("c")];
        let mut m = LatentTreeModel::latent_class("m", &leaves, 3).unwrap();
        let z = m.graph().root().unwrap();
        let old = m.variable(z).clone();
        let prior = DMatrix::from_row_slice(1, 3, &[0.2, 0.3, 0.5]);
        m.set_potential(&old, Potential::Categorical(prior)).unwrap();

        // the reduced variable was never put into the copy
        let stranger = old.without_state(0).unwrap();
        let mut copy = m.clone();
        let err = shrink_parameters(&m, &mut copy, z, &old, &stranger, 0).unwrap_err();
        assert!(err.to_string().contains("is not in model"), "{}", err);

        copy.graph_mut().set_variable(z, stranger.clone()).unwrap();
        shrink_parameters(&m, &mut copy, z, &old, &stranger, 0).unwrap();
        assert!(copy.potential(&stranger).is_some());
    }
}
