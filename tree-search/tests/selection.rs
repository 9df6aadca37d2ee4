use nalgebra::DMatrix;
use std::sync::Arc;
use tree_em::{simulate, Estimate};
use tree_model::variable::default_state_names;
use tree_model::{LatentTreeModel, Potential, Variable};
use tree_search::operators::select_best;
use tree_search::{Candidate, ScoreEvaluator, SearchContext, SearchSettings};

fn binary(name: &str) -> Variable {
    Variable::discrete(name, default_state_names(2))
}

/// Z -> {a, b, c}, binary everywhere
fn fitted_context(screening_size: usize) -> anyhow::Result<(SearchContext, Arc<Estimate>)> {
    let leaves = [binary("a"), binary("b"), binary("c")];
    let mut truth = LatentTreeModel::latent_class("truth", &leaves, 2)?;
    for v in truth.variables() {
        let p = if v.is_latent() {
            DMatrix::from_row_slice(1, 2, &[0.4, 0.6])
        } else {
            DMatrix::from_row_slice(2, 2, &[0.85, 0.15, 0.2, 0.8])
        };
        truth.set_potential(&v, Potential::Categorical(p))?;
    }
    let data = simulate(&truth, 200, 3)?;
    let start = LatentTreeModel::latent_class("start", data.variables(), 2)?;
    let data = Arc::new(data.synchronize(&start)?);

    let settings = SearchSettings {
        threads: 1,
        screening_size,
        ..SearchSettings::default()
    };
    let ctx = SearchContext::new(data, &settings)?;
    let base = Arc::new(ctx.estimate_model(&start)?);
    Ok((ctx, base))
}

/// A leaf with no data column behind it; every estimator fails on it
fn unbound(base: &Arc<Estimate>) -> anyhow::Result<Candidate> {
    let mut model = base.model.clone();
    let root = model
        .graph()
        .root()
        .ok_or_else(|| anyhow::anyhow!("empty model"))?;
    let ghost = binary("ghost");
    model.graph_mut().add_child(root, ghost.clone())?;
    Ok(Candidate::new(base, model, "test", "unbound".to_string()).with_changed(vec![ghost]))
}

fn copy_of_base(base: &Arc<Estimate>, name: &str) -> Candidate {
    Candidate::new(base, base.model.clone(), "test", name.to_string())
}

#[test]
fn failed_estimation_is_skipped_and_ties_keep_generation_order() -> anyhow::Result<()> {
    // 1 forces the screening pass over three candidates; 10 skips it
    for screening_size in [1, 10] {
        let (ctx, base) = fitted_context(screening_size)?;
        let candidates = vec![
            unbound(&base)?,
            copy_of_base(&base, "first copy"),
            copy_of_base(&base, "second copy"),
        ];
        let winner = select_best(&ctx, &base, candidates, &ScoreEvaluator, "test");
        assert!(!winner.is_unchanged(), "screening size {}", screening_size);
        assert_eq!(winner.description(), "first copy");
        assert!(winner.estimate().is_some());
        assert!(winner.model().is_initialized());
    }
    Ok(())
}

#[test]
fn nothing_estimable_returns_the_base() -> anyhow::Result<()> {
    let (ctx, base) = fitted_context(1)?;
    let candidates = vec![unbound(&base)?, unbound(&base)?];
    let out = select_best(&ctx, &base, candidates, &ScoreEvaluator, "test");
    assert!(out.is_unchanged());
    assert_eq!(out.score(), base.score);

    let none = select_best(&ctx, &base, vec![], &ScoreEvaluator, "test");
    assert!(none.is_unchanged());
    Ok(())
}
