//! Latent tree models over mixed discrete and continuous data.
//!
//! Internal nodes are discrete latent variables; leaves are observed
//! discrete variables, continuous scalars, or joint continuous vectors.
//! The tree is kept in an index-addressed arena so copies for candidate
//! structures are cheap and independent.

/// Variables compared by identity
pub mod variable;

/// Arena tree with structural edit primitives
pub mod graph;

/// Conditional probability tables and Gaussian blocks
pub mod potential;

/// Model = graph + potentials, regularity, dimension, re-rooting
pub mod model;

/// Mixed data set and synchronization against a model
pub mod data;

pub use data::MixedData;
pub use graph::{NodeId, TreeGraph};
pub use model::LatentTreeModel;
pub use potential::{GaussianComponent, Potential};
pub use variable::{VarId, Variable, VariableKind};
