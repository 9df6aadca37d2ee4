//! Structural edits of a latent tree model.
//!
//! Every operator enumerates its candidates from a base model without
//! touching the base. Candidates that break the tree invariants or the
//! regularity bound of a node they touched are dropped while generating.
//! `search` then screens, selects and estimates the best one on the
//! context's pool.

use crate::candidate::Candidate;
use crate::context::SearchContext;
use crate::evaluator::Evaluator;
use crate::screening::ScreeningQueue;
use indicatif::ParallelProgressIterator;
use log::{debug, warn};
use rayon::prelude::*;
use std::sync::Arc;
use tree_em::{EmEstimator, Estimate};
use tree_model::{LatentTreeModel, NodeId, Variable};

pub mod node_deletion;
pub mod node_introduction;
pub mod node_relocation;
pub mod pouching;
pub mod state_deletion;
pub mod state_introduction;
pub mod unpouching;

pub use node_deletion::NodeDeletion;
pub use node_introduction::NodeIntroduction;
pub use node_relocation::{NodeRelocation, RestrictedNodeRelocation};
pub use pouching::{Pouching, RestrictedPouching};
pub use state_deletion::StateDeletion;
pub use state_introduction::StateIntroduction;
pub use unpouching::Unpouching;

pub trait SearchOperator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every admissible edit of `base`, in a fixed order over node ids
    fn generate_candidates(&self, base: &Arc<Estimate>) -> Vec<Candidate>;

    /// Best estimated candidate, or the unchanged sentinel when nothing
    /// could be generated or estimated
    fn search(
        &self,
        ctx: &SearchContext,
        base: &Arc<Estimate>,
        evaluator: &dyn Evaluator,
    ) -> Candidate {
        let candidates = self.generate_candidates(base);
        debug!("{}: {} candidates", self.name(), candidates.len());
        select_best(ctx, base, candidates, evaluator, self.name())
    }

    /// Told about every accepted candidate
    fn update(&mut self, _latest: &Candidate) {}

    /// Operator that polishes an accepted candidate of this operator
    fn refinement(&self, _accepted: &Candidate) -> Option<Box<dyn SearchOperator>> {
        None
    }
}

/// Seed of the `index`-th candidate of one search call
pub fn candidate_seed(base_seed: u64, index: usize) -> u64 {
    base_seed ^ (index as u64).wrapping_mul(2654435761)
}

/// Estimate `(index, candidate)` pairs in parallel, keeping generation
/// order; failures are logged and dropped
fn estimate_all(
    ctx: &SearchContext,
    estimator: &EmEstimator,
    candidates: Vec<(usize, Candidate)>,
    seed: u64,
) -> Vec<(usize, Candidate)> {
    let pb = ctx.progress_bar(candidates.len());
    ctx.install(|| {
        candidates
            .into_par_iter()
            .progress_with(pb)
            .filter_map(
                |(i, c)| match ctx.estimate(estimator, c, candidate_seed(seed, i)) {
                    Ok(c) => Some((i, c)),
                    Err(e) => {
                        warn!("{} estimation of candidate {} failed: {}", estimator.name(), i, e);
                        None
                    }
                },
            )
            .collect()
    })
}

/// Screen, select and estimate.
///
/// 1. With more than `screening_size` candidates, each is fitted by the
///    screening estimator and only the best `screening_size` survive.
/// 2. Survivors are fitted by the selection estimator and ranked by
///    `evaluator`; ties go to the earlier generated candidate.
/// 3. The best is refitted by the estimation estimator, starting from
///    its selection parameters. If that fails the next best is tried.
pub fn select_best(
    ctx: &SearchContext,
    base: &Arc<Estimate>,
    candidates: Vec<Candidate>,
    evaluator: &dyn Evaluator,
    operator: &'static str,
) -> Candidate {
    if candidates.is_empty() {
        return Candidate::unchanged(base, operator);
    }
    let seed = ctx.draw_seed();
    let total = candidates.len();
    let indexed: Vec<(usize, Candidate)> = candidates.into_iter().enumerate().collect();

    let mut shortlist = if total > ctx.screening_size() {
        let queue = ScreeningQueue::new(ctx.screening_size());
        let screened = estimate_all(ctx, ctx.screening_estimator(), indexed, seed);
        for (i, c) in screened {
            let gain = c.improvement(evaluator).unwrap_or(f64::NEG_INFINITY);
            queue.add((i, c), gain, i);
        }
        debug!(
            "{}: screened {} candidates down to {}",
            operator,
            total,
            queue.len()
        );
        queue
            .into_sorted()
            .into_iter()
            .map(|(x, _, _)| x)
            .collect()
    } else {
        indexed
    };
    shortlist.sort_by_key(|(i, _)| *i);

    let selected = estimate_all(ctx, ctx.selection_estimator(), shortlist, seed.rotate_left(17));
    let mut ranked: Vec<(f64, usize, Candidate)> = selected
        .into_iter()
        .filter_map(|(i, c)| {
            let gain = c.improvement(evaluator)?;
            Some((gain, i, c))
        })
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    for (_, i, c) in ranked {
        let estimator = ctx.estimation_estimator();
        match ctx.install(|| ctx.estimate(estimator, c, candidate_seed(seed.rotate_left(34), i))) {
            Ok(c) => return c,
            Err(e) => warn!("{} estimation of candidate {} failed: {}", estimator.name(), i, e),
        }
    }
    Candidate::unchanged(base, operator)
}

///////////////////////
// shared edit steps //
///////////////////////

/// Latent nodes in ascending id order
pub(crate) fn latent_nodes(model: &LatentTreeModel) -> Vec<NodeId> {
    model
        .graph()
        .node_ids()
        .into_iter()
        .filter(|&id| model.variable(id).is_latent())
        .collect()
}

/// Tree invariants hold and no touched latent exceeds its bound
pub(crate) fn admissible(model: &LatentTreeModel, touched: &[NodeId]) -> bool {
    match model.validate() {
        Ok(()) => model.is_regular_on(touched),
        Err(e) => {
            debug!("discarding an invalid edit: {}", e);
            false
        }
    }
}

/// Remove `start` and then its ancestors for as long as they are
/// latent nodes left without children. Returns the removed variables
/// and the first surviving ancestor.
pub(crate) fn prune_childless(
    model: &mut LatentTreeModel,
    start: NodeId,
) -> anyhow::Result<(Vec<Variable>, Option<NodeId>)> {
    let mut removed = vec![];
    let mut cur = start;
    loop {
        let graph = model.graph();
        if !graph.is_leaf(cur) || !graph.variable(cur).is_latent() {
            return Ok((removed, Some(cur)));
        }
        let parent = match graph.parent(cur) {
            Some(p) => p,
            None => return Ok((removed, None)),
        };
        model.graph_mut().remove_edge(parent, cur)?;
        let v = model.graph_mut().remove_node(cur)?;
        model.invalidate(&v);
        removed.push(v);
        cur = parent;
    }
}

/// Move neighbour `w` of latent `z`, together with everything on its
/// side of the edge, under latent `target`.
///
/// When `w` is the parent of `z` the model is first rooted at `z`, so the
/// move is always "reattach a child subtree". Returns `None` when
/// `target` lies on `w`'s side.
pub(crate) fn relocate(
    base: &LatentTreeModel,
    z: NodeId,
    w: NodeId,
    target: NodeId,
) -> anyhow::Result<Option<Relocated>> {
    let mut model = base.clone();
    if model.graph().parent(z) == Some(w) {
        model.reroot(z)?;
    }
    if model.graph().parent(w) != Some(z) {
        anyhow::bail!("{} is not a neighbour of {}", model.variable(w), model.variable(z));
    }
    if target == z || model.graph().is_ancestor(w, target) {
        return Ok(None);
    }
    model.graph_mut().move_subtree(w, target)?;
    let (removed, survivor) = prune_childless(&mut model, z)?;

    let moved = model.variable(w).clone();
    let mut touched = vec![w, target];
    touched.extend(survivor);
    if let Some(s) = survivor {
        touched.extend(model.graph().neighbors(s));
    }
    Ok(Some(Relocated {
        model,
        moved,
        removed,
        touched,
    }))
}

pub(crate) struct Relocated {
    pub model: LatentTreeModel,
    pub moved: Variable,
    pub removed: Vec<Variable>,
    pub touched: Vec<NodeId>,
}

/// The variable that took over from `old` in an accepted edit: the
/// created variable with the same name, else the first created one
pub(crate) fn successor(old: &Variable, accepted: &Candidate) -> Option<Variable> {
    if !accepted.removed().contains(old) {
        return None;
    }
    accepted
        .created()
        .iter()
        .find(|v| v.name() == old.name())
        .or_else(|| accepted.created().first())
        .cloned()
}

/// Children of a node as variables
pub(crate) fn child_variables(model: &LatentTreeModel, id: NodeId) -> Vec<Variable> {
    model
        .graph()
        .children(id)
        .iter()
        .map(|&c| model.variable(c).clone())
        .collect()
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::Arc;
    use tree_em::Estimate;
    use tree_model::variable::default_state_names;
    use tree_model::{LatentTreeModel, Variable};

    /// Structure-only estimate; scores are irrelevant to generation
    pub fn unfitted(model: LatentTreeModel) -> Arc<Estimate> {
        let dimension = model.dimension();
        Arc::new(Estimate {
            model,
            loglikelihood: 0.0,
            score: 0.0,
            dimension,
            steps: 0,
        })
    }

    pub fn binary(name: &str) -> Variable {
        Variable::discrete(name, default_state_names(2))
    }

    /// Z1(k1) -> {a, b, Z2(k2) -> {c, d, e}}, all leaves binary
    pub fn two_latents(k1: usize, k2: usize) -> LatentTreeModel {
        let mut m = LatentTreeModel::new("t");
        let g = m.graph_mut();
        let z1 = g.add_node(Variable::latent("Z1", k1)).unwrap();
        g.add_child(z1, binary("a")).unwrap();
        g.add_child(z1, binary("b")).unwrap();
        let z2 = g.add_child(z1, Variable::latent("Z2", k2)).unwrap();
        for x in ["c", "d", "e"] {
            g.add_child(z2, binary(x)).unwrap();
        }
        m
    }

    /// Z1(k) -> {x0, x1, ...}, all leaves continuous scalars
    pub fn continuous_class(k: usize, leaves: usize) -> LatentTreeModel {
        let xs: Vec<Variable> = (0..leaves)
            .map(|i| Variable::continuous(&format!("x{}", i)))
            .collect();
        LatentTreeModel::latent_class("c", &xs, k).unwrap()
    }

    /// Every candidate is a valid, regular tree
    pub fn assert_all_admissible(candidates: &[crate::candidate::Candidate]) {
        for c in candidates {
            c.model().validate().unwrap();
            assert!(c.model().is_regular(), "{:?} is not regular", c);
        }
    }
}
