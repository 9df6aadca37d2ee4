//! Structure learning for latent tree models.
//!
//! Operators propose edited copies of the current model, estimators fit
//! them on a shared thread pool, evaluators decide what counts as
//! better, and procedures loop until nothing is.

/// Proposed model plus bookkeeping of the edit
pub mod candidate;

/// Settings file
pub mod config;

/// Data, estimators, thread pool and step history of a run
pub mod context;

/// Score and unit-improvement comparisons
pub mod evaluator;

/// Structural edits
pub mod operators;

/// Iterative, refinement and sequential loops
pub mod procedure;

/// Bounded best-k retention for screening
pub mod screening;

/// Expand, adjust, simplify
pub mod search;

pub use candidate::Candidate;
pub use config::SearchSettings;
pub use context::{SearchContext, SearchStep};
pub use evaluator::{Evaluator, ScoreEvaluator, UnitImprovementEvaluator};
pub use operators::SearchOperator;
pub use procedure::{Outcome, Procedure, ProcedureState};
pub use screening::ScreeningQueue;
pub use search::{learn, SearchResult};
