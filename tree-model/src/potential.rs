//! Conditional distributions attached to the nodes of a model.

use nalgebra::{DMatrix, DVector};

/// Gaussian parameters for one parent state
#[derive(Debug, Clone)]
pub struct GaussianComponent {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

/// Conditional distribution of a node given its parent
#[derive(Debug, Clone)]
pub enum Potential {
    /// `P(node | parent)`: one row per parent state (a single row at the
    /// root), one column per node state; rows sum to one
    Categorical(DMatrix<f64>),
    /// One Gaussian per parent state
    Gaussian(Vec<GaussianComponent>),
}

impl Potential {
    /// Does this potential fit a node with `states` own states (zero for
    /// continuous), `dimension` continuous dimensions and a parent with
    /// `parent_states` states?
    pub fn fits(&self, parent_states: usize, states: usize, dimension: usize) -> bool {
        match self {
            Potential::Categorical(table) => {
                dimension == 0 && table.nrows() == parent_states && table.ncols() == states
            }
            Potential::Gaussian(components) => {
                states == 0
                    && components.len() == parent_states
                    && components.iter().all(|c| {
                        c.mean.len() == dimension
                            && c.covariance.nrows() == dimension
                            && c.covariance.ncols() == dimension
                    })
            }
        }
    }

    pub fn table(&self) -> Option<&DMatrix<f64>> {
        match self {
            Potential::Categorical(t) => Some(t),
            _ => None,
        }
    }

    pub fn components(&self) -> Option<&[GaussianComponent]> {
        match self {
            Potential::Gaussian(c) => Some(c),
            _ => None,
        }
    }

}

/// Free parameters of a node with the given shape
pub fn free_parameters(parent_states: usize, states: usize, dimension: usize) -> usize {
    if dimension > 0 {
        parent_states * (dimension + dimension * (dimension + 1) / 2)
    } else {
        parent_states * states.saturating_sub(1)
    }
}
