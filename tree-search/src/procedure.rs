//! Loops that apply operators until the model stops improving.

use crate::candidate::Candidate;
use crate::context::{SearchContext, SearchStep};
use crate::evaluator::{Evaluator, ScoreEvaluator};
use crate::operators::SearchOperator;
use log::{debug, info};
use std::sync::Arc;
use tree_em::Estimate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureState {
    Running,
    /// At least one step was accepted
    Succeeded,
    /// Nothing cleared the threshold
    Stalled,
}

/// Result of running a procedure
#[derive(Debug, Clone)]
pub struct Outcome {
    pub estimate: Arc<Estimate>,
    pub state: ProcedureState,
}

impl Outcome {
    pub fn succeeded(&self) -> bool {
        self.state == ProcedureState::Succeeded
    }
}

pub trait Procedure: Send {
    fn name(&self) -> &str;

    fn state(&self) -> ProcedureState;

    /// Improve `start` until a terminal state; returns the best model
    /// found, which is `start` itself when nothing was accepted
    fn run(&mut self, ctx: &SearchContext, start: Arc<Estimate>) -> Outcome;
}

fn step(
    procedure: &str,
    candidate: &Candidate,
    estimate: &Estimate,
    improvement: f64,
) -> SearchStep {
    SearchStep {
        procedure: procedure.into(),
        operator: candidate.operator(),
        description: candidate.description().to_string(),
        improvement,
        score: estimate.score,
        loglikelihood: estimate.loglikelihood,
        dimension: estimate.dimension,
    }
}

/// Repeatedly take the best candidate of its operators while the
/// evaluator accepts it with the context threshold
pub struct IterativeProcedure {
    name: String,
    operators: Vec<Box<dyn SearchOperator>>,
    evaluator: Box<dyn Evaluator>,
    state: ProcedureState,
}

impl IterativeProcedure {
    pub fn new(
        name: &str,
        operators: Vec<Box<dyn SearchOperator>>,
        evaluator: Box<dyn Evaluator>,
    ) -> Self {
        IterativeProcedure {
            name: name.to_string(),
            operators,
            evaluator,
            state: ProcedureState::Running,
        }
    }

    /// Best candidate over all operators with its operator index and
    /// improvement. Ties go to the earlier operator.
    fn best_candidate(
        &self,
        ctx: &SearchContext,
        current: &Arc<Estimate>,
    ) -> Option<(usize, Candidate, f64)> {
        let mut best: Option<(usize, Candidate, f64)> = None;
        for (k, op) in self.operators.iter().enumerate() {
            let candidate = op.search(ctx, current, self.evaluator.as_ref());
            if candidate.is_unchanged() {
                debug!("{}: {} found nothing", self.name, op.name());
                continue;
            }
            let Some(estimate) = candidate.estimate() else {
                continue;
            };
            let gain = self.evaluator.improvement(current, estimate);
            debug!(
                "{}: {} proposes {} ({} {:.4})",
                self.name,
                op.name(),
                candidate.description(),
                self.evaluator.name(),
                gain
            );
            if best.as_ref().map_or(true, |(_, _, g)| gain > *g) {
                best = Some((k, candidate, gain));
            }
        }
        best
    }

    fn notify(&mut self, accepted: &Candidate) {
        for op in self.operators.iter_mut() {
            op.update(accepted);
        }
    }
}

impl Procedure for IterativeProcedure {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcedureState {
        self.state
    }

    fn run(&mut self, ctx: &SearchContext, start: Arc<Estimate>) -> Outcome {
        self.state = ProcedureState::Running;
        let mut current = start;
        let mut accepted = 0;

        while accepted < ctx.max_iterations() {
            let Some((k, candidate, gain)) = self.best_candidate(ctx, &current) else {
                break;
            };
            let Some(estimate) = candidate.estimate().cloned() else {
                break;
            };
            if !self.evaluator.accepts(&current, &estimate, ctx.threshold()) {
                debug!(
                    "{}: best {} {:.4} does not clear {}",
                    self.name,
                    self.evaluator.name(),
                    gain,
                    ctx.threshold()
                );
                break;
            }

            ctx.record(step(&self.name, &candidate, &estimate, gain));
            self.notify(&candidate);
            current = estimate;
            accepted += 1;

            if let Some(op) = self.operators[k].refinement(&candidate) {
                let mut refine = RefinementProcedure::new(&format!("{}/refine", self.name), op);
                let out = refine.run(ctx, current.clone());
                for c in refine.take_accepted() {
                    self.notify(&c);
                }
                current = out.estimate;
            }
        }

        self.state = if accepted > 0 {
            ProcedureState::Succeeded
        } else {
            ProcedureState::Stalled
        };
        info!("{}: {} step(s), BIC {:.4}", self.name, accepted, current.score);
        Outcome {
            estimate: current,
            state: self.state,
        }
    }
}

/// Hill-climb with a single restricted operator: keep going while the
/// score beats the running best
pub struct RefinementProcedure {
    name: String,
    operator: Box<dyn SearchOperator>,
    accepted: Vec<Candidate>,
    state: ProcedureState,
}

impl RefinementProcedure {
    pub fn new(name: &str, operator: Box<dyn SearchOperator>) -> Self {
        RefinementProcedure {
            name: name.to_string(),
            operator,
            accepted: vec![],
            state: ProcedureState::Running,
        }
    }

    /// Candidates accepted by the last run, in order
    pub fn take_accepted(&mut self) -> Vec<Candidate> {
        std::mem::take(&mut self.accepted)
    }
}

impl Procedure for RefinementProcedure {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcedureState {
        self.state
    }

    fn run(&mut self, ctx: &SearchContext, start: Arc<Estimate>) -> Outcome {
        self.state = ProcedureState::Running;
        self.accepted.clear();
        let mut best = start;

        while self.accepted.len() < ctx.max_iterations() {
            let candidate = self.operator.search(ctx, &best, &ScoreEvaluator);
            if candidate.is_unchanged() {
                break;
            }
            let Some(estimate) = candidate.estimate().cloned() else {
                break;
            };
            let gain = ScoreEvaluator.improvement(&best, &estimate);
            if !(gain > 0.0) {
                break;
            }
            ctx.record(step(&self.name, &candidate, &estimate, gain));
            self.operator.update(&candidate);
            best = estimate;
            self.accepted.push(candidate);
        }

        self.state = if self.accepted.is_empty() {
            ProcedureState::Stalled
        } else {
            ProcedureState::Succeeded
        };
        Outcome {
            estimate: best,
            state: self.state,
        }
    }
}

/// Run procedures one after another, each from the previous result
pub struct SequentialProcedure {
    name: String,
    procedures: Vec<Box<dyn Procedure>>,
    state: ProcedureState,
}

impl SequentialProcedure {
    pub fn new(name: &str, procedures: Vec<Box<dyn Procedure>>) -> Self {
        SequentialProcedure {
            name: name.to_string(),
            procedures,
            state: ProcedureState::Running,
        }
    }
}

impl Procedure for SequentialProcedure {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcedureState {
        self.state
    }

    fn run(&mut self, ctx: &SearchContext, start: Arc<Estimate>) -> Outcome {
        self.state = ProcedureState::Running;
        let mut current = start;
        let mut any = false;
        for p in self.procedures.iter_mut() {
            let out = p.run(ctx, current);
            any |= out.succeeded();
            current = out.estimate;
        }
        self.state = if any {
            ProcedureState::Succeeded
        } else {
            ProcedureState::Stalled
        };
        Outcome {
            estimate: current,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchSettings;
    use nalgebra::DMatrix;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tree_model::{LatentTreeModel, MixedData, Variable};

    /// Proposes the same model with preset score gains, one per search
    struct Ladder {
        gains: Vec<f64>,
        next: AtomicUsize,
        refine: Option<Vec<f64>>,
    }

    impl Ladder {
        fn new(gains: &[f64]) -> Self {
            Ladder {
                gains: gains.to_vec(),
                next: AtomicUsize::new(0),
                refine: None,
            }
        }
    }

    impl SearchOperator for Ladder {
        fn name(&self) -> &'static str {
            "ladder"
        }

        fn generate_candidates(&self, _base: &Arc<Estimate>) -> Vec<Candidate> {
            vec![]
        }

        fn search(
            &self,
            _ctx: &SearchContext,
            base: &Arc<Estimate>,
            _evaluator: &dyn Evaluator,
        ) -> Candidate {
            let i = self.next.fetch_add(1, Ordering::Relaxed);
            let Some(&g) = self.gains.get(i) else {
                return Candidate::unchanged(base, self.name());
            };
            let estimate = Estimate {
                model: base.model.clone(),
                loglikelihood: base.loglikelihood + g,
                score: base.score + g,
                dimension: base.dimension,
                steps: 0,
            };
            Candidate::new(base, base.model.clone(), self.name(), format!("step {}", i))
                .with_estimate(estimate)
        }

        fn refinement(&self, _accepted: &Candidate) -> Option<Box<dyn SearchOperator>> {
            let gains = self.refine.as_ref()?;
            Some(Box::new(Ladder::new(gains)))
        }
    }

    fn context(threshold: f64, max_iterations: usize) -> SearchContext {
        let x = Variable::continuous("x");
        let data = MixedData::from_values(vec![x], DMatrix::from_row_slice(2, 1, &[0.0, 1.0]))
            .unwrap();
        let settings = SearchSettings {
            threads: 1,
            threshold,
            max_iterations,
            ..SearchSettings::default()
        };
        SearchContext::new(Arc::new(data), &settings).unwrap()
    }

    fn start() -> Arc<Estimate> {
        let model = LatentTreeModel::latent_class("m", &[Variable::continuous("x")], 2).unwrap();
        Arc::new(Estimate {
            model,
            loglikelihood: -100.0,
            score: -100.0,
            dimension: 5,
            steps: 0,
        })
    }

    fn iterative(ops: Vec<Box<dyn SearchOperator>>) -> IterativeProcedure {
        IterativeProcedure::new("p", ops, Box::new(ScoreEvaluator))
    }

    #[test]
    fn test_stops_below_threshold() {
        let ctx = context(0.5, 100);
        let mut p = iterative(vec![Box::new(Ladder::new(&[2.0, 1.0, 0.2, 5.0]))]);
        let out = p.run(&ctx, start());
        assert_eq!(out.state, ProcedureState::Succeeded);
        assert_eq!(p.state(), ProcedureState::Succeeded);
        assert_eq!(out.estimate.score, -97.0);
        assert_eq!(ctx.history().len(), 2);
    }

    #[test]
    fn test_nothing_accepted_stalls() {
        let ctx = context(0.5, 100);
        let s = start();
        let mut p = iterative(vec![Box::new(Ladder::new(&[0.5]))]);
        let out = p.run(&ctx, s.clone());
        assert_eq!(out.state, ProcedureState::Stalled);
        assert!(Arc::ptr_eq(&out.estimate, &s));
    }

    #[test]
    fn test_iteration_limit() {
        let ctx = context(0.0, 3);
        let mut p = iterative(vec![Box::new(Ladder::new(&[1.0; 10]))]);
        let out = p.run(&ctx, start());
        assert_eq!(out.estimate.score, -97.0);
    }

    #[test]
    fn test_best_operator_wins() {
        let ctx = context(0.0, 1);
        let mut p = iterative(vec![
            Box::new(Ladder::new(&[1.0])),
            Box::new(Ladder::new(&[4.0])),
        ]);
        let out = p.run(&ctx, start());
        assert_eq!(out.estimate.score, -96.0);
    }

    #[test]
    fn test_refinement_climbs_without_threshold() {
        let ctx = context(1.0, 100);
        let mut ladder = Ladder::new(&[2.0]);
        ladder.refine = Some(vec![0.3, 0.1, -1.0, 4.0]);
        let mut p = iterative(vec![Box::new(ladder)]);
        let out = p.run(&ctx, start());
        approx::assert_abs_diff_eq!(out.estimate.score, -97.6, epsilon = 1e-9);
        let names: Vec<String> = ctx
            .history()
            .iter()
            .map(|s| s.procedure.to_string())
            .collect();
        assert_eq!(names, vec!["p", "p/refine", "p/refine"]);
    }

    #[test]
    fn test_sequential_success_is_any() {
        let ctx = context(0.0, 100);
        let stalled = || -> Box<dyn Procedure> {
            Box::new(iterative(vec![Box::new(Ladder::new(&[]))]))
        };
        let mut seq = SequentialProcedure::new("s", vec![stalled(), stalled()]);
        assert!(!seq.run(&ctx, start()).succeeded());

        let moving: Box<dyn Procedure> =
            Box::new(iterative(vec![Box::new(Ladder::new(&[1.0]))]));
        let mut seq = SequentialProcedure::new("s", vec![stalled(), moving, stalled()]);
        let out = seq.run(&ctx, start());
        assert!(out.succeeded());
        assert_eq!(out.estimate.score, -99.0);
    }
}
