//! Structure search: rounds of expand, adjust and simplify.
//!
//! * expand - add states, split latent nodes, merge continuous leaves;
//!   candidates are ranked by improvement per added parameter
//! * adjust - relocate nodes
//! * simplify - separate joint leaves, delete nodes, delete states
//!
//! Rounds repeat until one makes no progress or the round limit is hit.

use crate::config::SearchSettings;
use crate::context::{SearchContext, SearchStep};
use crate::evaluator::{ScoreEvaluator, UnitImprovementEvaluator};
use crate::operators::*;
use crate::procedure::{IterativeProcedure, Procedure, SequentialProcedure};
use log::info;
use std::sync::Arc;
use tree_em::Estimate;
use tree_model::{LatentTreeModel, MixedData};

pub fn expand() -> IterativeProcedure {
    IterativeProcedure::new(
        "expand",
        vec![
            Box::new(StateIntroduction),
            Box::new(NodeIntroduction),
            Box::new(Pouching),
        ],
        Box::new(UnitImprovementEvaluator),
    )
}

pub fn adjust() -> IterativeProcedure {
    IterativeProcedure::new(
        "adjust",
        vec![Box::new(NodeRelocation)],
        Box::new(ScoreEvaluator),
    )
}

pub fn simplify() -> SequentialProcedure {
    let single = |name: &str, op: Box<dyn SearchOperator>| -> Box<dyn Procedure> {
        Box::new(IterativeProcedure::new(name, vec![op], Box::new(ScoreEvaluator)))
    };
    SequentialProcedure::new(
        "simplify",
        vec![
            single("simplify/unpouching", Box::new(Unpouching)),
            single("simplify/node deletion", Box::new(NodeDeletion)),
            single("simplify/state deletion", Box::new(StateDeletion)),
        ],
    )
}

/// Final model of a search with its trail
pub struct SearchResult {
    pub estimate: Arc<Estimate>,
    /// BIC of the fitted starting model
    pub initial_score: f64,
    pub rounds: usize,
    pub history: Vec<SearchStep>,
}

/// Search from `initial` within an existing context
///
/// The start must be a valid tree whose latent nodes are all regular;
/// operators only re-check the nodes they touch.
pub fn run(ctx: &SearchContext, initial: &LatentTreeModel) -> anyhow::Result<SearchResult> {
    initial.validate()?;
    initial.check_regular()?;
    let start = Arc::new(ctx.estimate_model(initial)?);
    info!(
        "start {}: BIC {:.4} (loglik {:.4}, dim {})",
        start.model.summary(),
        start.score,
        start.loglikelihood,
        start.dimension
    );
    let initial_score = start.score;

    let mut current = start;
    let mut rounds = 0;
    while rounds < ctx.max_rounds() {
        rounds += 1;
        let mut round = SequentialProcedure::new(
            &format!("round {}", rounds),
            vec![Box::new(expand()), Box::new(adjust()), Box::new(simplify())],
        );
        let out = round.run(ctx, current);
        let progressed = out.succeeded();
        current = out.estimate;
        info!(
            "round {}: {} BIC {:.4}",
            rounds,
            current.model.summary(),
            current.score
        );
        if !progressed {
            break;
        }
    }

    Ok(SearchResult {
        estimate: current,
        initial_score,
        rounds,
        history: ctx.history(),
    })
}

/// Build a context, search, and release the pool on every exit path
pub fn learn(
    data: Arc<MixedData>,
    initial: &LatentTreeModel,
    settings: &SearchSettings,
) -> anyhow::Result<SearchResult> {
    let ctx = SearchContext::new(data, settings)?;
    run(&ctx, initial)
}
