//! Parameter estimation for latent tree models.
//!
//! Exact inference on the tree gives log-likelihoods and posterior
//! marginals; EM with random restarts fits the parameters. Estimation
//! can be restricted to the part of a model that a structural edit
//! touched ("local EM").

/// Compiled message passing
pub mod inference;

/// Expected counts, Gaussian moments and the M-step
pub mod stats;

/// Random initial parameters
pub mod init;

/// EM estimator, settings and scores
pub mod em;

/// Forward sampling
pub mod simulate;

/// Latent variables versus a class label
pub mod evaluation;

pub use em::{bic, EmConfig, EmEstimator, Estimate};
pub use inference::{loglikelihood, CompiledTree};
pub use simulate::simulate;
