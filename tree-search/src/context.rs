//! Resources shared by every step of one search run.

use crate::candidate::Candidate;
use crate::config::SearchSettings;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tree_em::{EmEstimator, Estimate};
use tree_model::{LatentTreeModel, MixedData};

/// One accepted step of the search
#[derive(Debug, Clone)]
pub struct SearchStep {
    pub procedure: Box<str>,
    pub operator: &'static str,
    pub description: String,
    pub improvement: f64,
    pub score: f64,
    pub loglikelihood: f64,
    pub dimension: usize,
}

/// Data, estimators and the worker pool of a search run.
///
/// The pool is built once here and released when the context is
/// dropped; every parallel section of the search runs inside it.
pub struct SearchContext {
    data: Arc<MixedData>,
    screening: EmEstimator,
    selection: EmEstimator,
    estimation: EmEstimator,
    pool: rayon::ThreadPool,
    threshold: f64,
    screening_size: usize,
    max_iterations: usize,
    max_rounds: usize,
    seed: u64,
    seeds_drawn: AtomicU64,
    history: Mutex<Vec<SearchStep>>,
    show_progress: bool,
}

impl SearchContext {
    /// * `data` - synchronized with the models that will be searched
    /// * `settings` - thresholds, limits and estimator settings
    pub fn new(data: Arc<MixedData>, settings: &SearchSettings) -> anyhow::Result<Self> {
        settings.validate()?;
        let num_threads = settings.num_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        info!("search will use {} threads", pool.current_num_threads());

        Ok(SearchContext {
            data,
            screening: EmEstimator::new("screening", settings.screening.clone()),
            selection: EmEstimator::new("selection", settings.selection.clone()),
            estimation: EmEstimator::new("estimation", settings.estimation.clone()),
            pool,
            threshold: settings.threshold,
            screening_size: settings.screening_size,
            max_iterations: settings.max_iterations,
            max_rounds: settings.max_rounds,
            seed: settings.seed,
            seeds_drawn: AtomicU64::new(0),
            history: Mutex::new(vec![]),
            show_progress: settings.show_progress,
        })
    }

    pub fn data(&self) -> &MixedData {
        &self.data
    }

    pub fn screening_estimator(&self) -> &EmEstimator {
        &self.screening
    }

    pub fn selection_estimator(&self) -> &EmEstimator {
        &self.selection
    }

    pub fn estimation_estimator(&self) -> &EmEstimator {
        &self.estimation
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn screening_size(&self) -> usize {
        self.screening_size
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `f` on the search pool
    pub fn install<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(f)
    }

    /// A fresh base seed; successive calls never repeat
    pub fn draw_seed(&self) -> u64 {
        let k = self.seeds_drawn.fetch_add(1, Ordering::Relaxed);
        self.seed ^ k.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    /// Fit a candidate with one of the estimators, starting from its
    /// current parameters
    pub fn estimate(
        &self,
        estimator: &EmEstimator,
        candidate: Candidate,
        seed: u64,
    ) -> anyhow::Result<Candidate> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let estimate = estimator.estimate(
            &self.data,
            candidate.model(),
            candidate.changed(),
            &mut rng,
        )?;
        Ok(candidate.with_estimate(estimate))
    }

    /// Full estimation of a starting model. Given parameters are kept as
    /// the starting point; otherwise restarts follow the selection
    /// estimator.
    pub fn estimate_model(&self, model: &LatentTreeModel) -> anyhow::Result<Estimate> {
        let estimator = if model.is_initialized() {
            self.estimation.clone()
        } else {
            let mut config = self.estimation.config().clone();
            let selection = self.selection.config();
            config.restarts = config.restarts.max(selection.restarts);
            config.initial_steps = config.initial_steps.max(selection.initial_steps);
            EmEstimator::new("initial", config)
        };
        let mut rng = SmallRng::seed_from_u64(self.draw_seed());
        self.install(|| estimator.estimate(&self.data, model, &[], &mut rng))
    }

    /// Log an accepted step and keep it in the history
    pub fn record(&self, step: SearchStep) {
        info!(
            "{} [{}] {}: BIC {:.4} (loglik {:.4}, dim {}, improvement {:.4})",
            step.procedure,
            step.operator,
            step.description,
            step.score,
            step.loglikelihood,
            step.dimension,
            step.improvement
        );
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(step);
    }

    pub fn history(&self) -> Vec<SearchStep> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Progress bar over `len` items; hidden unless enabled
    pub fn progress_bar(&self, len: usize) -> ProgressBar {
        let pb = ProgressBar::new(len as u64);
        if !self.show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb
    }
}

impl Drop for SearchContext {
    fn drop(&mut self) {
        info!(
            "releasing the search pool ({} threads, {} steps accepted)",
            self.pool.current_num_threads(),
            self.history.get_mut().map(|h| h.len()).unwrap_or(0)
        );
    }
}
