//! Weighted cases over observed discrete and continuous variables.

use crate::model::LatentTreeModel;
use crate::variable::{VarId, Variable};
use log::warn;
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;

/// A mixed discrete/continuous data set.
///
/// Values are stored case by variable; a discrete value is the index of
/// its state and a missing value is `NaN`.
#[derive(Debug, Clone)]
pub struct MixedData {
    variables: Vec<Variable>,
    values: DMatrix<f64>,
    weights: DVector<f64>,
    columns: HashMap<VarId, usize>,
}

impl MixedData {
    /// * `variables` - one per column; observed discrete or continuous scalars
    /// * `values` - cases x variables
    /// * `weights` - one per case
    pub fn new(
        variables: Vec<Variable>,
        values: DMatrix<f64>,
        weights: DVector<f64>,
    ) -> anyhow::Result<Self> {
        if values.ncols() != variables.len() {
            anyhow::bail!(
                "{} columns but {} variables",
                values.ncols(),
                variables.len()
            );
        }
        if values.nrows() != weights.len() {
            anyhow::bail!("{} cases but {} weights", values.nrows(), weights.len());
        }
        let mut columns = HashMap::new();
        for (j, v) in variables.iter().enumerate() {
            if v.is_latent() || v.dimension() > 1 {
                anyhow::bail!("{} cannot be a data column", v.name());
            }
            if columns.insert(v.id(), j).is_some() {
                anyhow::bail!("duplicate column {}", v.name());
            }
            if let Some(k) = v.cardinality() {
                for x in values.column(j).iter().filter(|x| !x.is_nan()) {
                    if *x < 0.0 || x.fract() != 0.0 || *x as usize >= k {
                        anyhow::bail!("value {} is not a state of {}", x, v.name());
                    }
                }
            }
        }
        Ok(MixedData {
            variables,
            values,
            weights,
            columns,
        })
    }

    /// Unit weights
    pub fn from_values(variables: Vec<Variable>, values: DMatrix<f64>) -> anyhow::Result<Self> {
        let n = values.nrows();
        Self::new(variables, values, DVector::from_element(n, 1.0))
    }

    pub fn num_cases(&self) -> usize {
        self.values.nrows()
    }

    pub fn total_weight(&self) -> f64 {
        self.weights.sum()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    #[inline]
    pub fn value(&self, case: usize, column: usize) -> f64 {
        self.values[(case, column)]
    }

    #[inline]
    pub fn is_missing(&self, case: usize, column: usize) -> bool {
        self.values[(case, column)].is_nan()
    }

    #[inline]
    pub fn weight(&self, case: usize) -> f64 {
        self.weights[case]
    }

    pub fn column_of(&self, variable: &Variable) -> Option<usize> {
        self.columns.get(&variable.id()).copied()
    }

    /// Drop one column, e.g., a class label
    pub fn without_column(&self, column: usize) -> anyhow::Result<Self> {
        if column >= self.variables.len() {
            anyhow::bail!("no column {}", column);
        }
        let mut variables = self.variables.clone();
        variables.remove(column);
        Self::new(
            variables,
            self.values.clone().remove_column(column),
            self.weights.clone(),
        )
    }

    /// Rebind the columns to the model's manifest variables by name.
    ///
    /// Fails when a model variable has no column or when kinds or state
    /// lists disagree. Columns the model does not mention are dropped.
    pub fn synchronize(&self, model: &LatentTreeModel) -> anyhow::Result<Self> {
        let by_name: HashMap<&str, usize> = self
            .variables
            .iter()
            .enumerate()
            .map(|(j, v)| (v.name(), j))
            .collect();

        let manifest = model.manifest_variables();
        let mut keep = Vec::with_capacity(manifest.len());

        for mv in &manifest {
            let j = *by_name.get(mv.name()).ok_or_else(|| {
                anyhow::anyhow!("structural mismatch: no data column for {}", mv.name())
            })?;
            let dv = &self.variables[j];
            match (dv.states(), mv.states()) {
                (None, None) => {}
                (Some(ds), Some(ms)) if ds == ms => {}
                (Some(ds), Some(ms)) => anyhow::bail!(
                    "structural mismatch: {} has states {:?} in the data but {:?} in the model",
                    mv.name(),
                    ds,
                    ms
                ),
                _ => anyhow::bail!(
                    "structural mismatch: {} is {} in the data but {} in the model",
                    mv.name(),
                    kind_name(dv),
                    kind_name(mv)
                ),
            }
            keep.push(j);
        }

        if keep.len() < self.variables.len() {
            let dropped: Vec<&str> = self
                .variables
                .iter()
                .enumerate()
                .filter(|(j, _)| !keep.contains(j))
                .map(|(_, v)| v.name())
                .collect();
            warn!("dropping data columns not in the model: {:?}", dropped);
        }

        let values = DMatrix::from_fn(self.num_cases(), keep.len(), |i, k| {
            self.values[(i, keep[k])]
        });
        Self::new(manifest, values, self.weights.clone())
    }

    /// Mean and covariance of the given continuous columns over the cases
    /// where all of them are observed
    pub fn moments(&self, variables: &[Variable]) -> anyhow::Result<(DVector<f64>, DMatrix<f64>)> {
        let cols = variables
            .iter()
            .map(|v| {
                self.column_of(v)
                    .ok_or_else(|| anyhow::anyhow!("no data column for {}", v.name()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let d = cols.len();
        let mut sum = DVector::<f64>::zeros(d);
        let mut sum_sq = DMatrix::<f64>::zeros(d, d);
        let mut tot = 0.0;
        let mut x = DVector::<f64>::zeros(d);
        for i in 0..self.num_cases() {
            if cols.iter().any(|&j| self.is_missing(i, j)) {
                continue;
            }
            for (k, &j) in cols.iter().enumerate() {
                x[k] = self.value(i, j);
            }
            let w = self.weight(i);
            sum.axpy(w, &x, 1.0);
            sum_sq.ger(w, &x, &x, 1.0);
            tot += w;
        }
        if tot <= 0.0 {
            anyhow::bail!("no complete cases for {:?}", variables);
        }
        let mean = sum / tot;
        let cov = sum_sq / tot - &mean * mean.transpose();
        Ok((mean, cov))
    }
}

fn kind_name(v: &Variable) -> &'static str {
    if v.is_discrete() {
        "discrete"
    } else {
        "continuous"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::default_state_names;
    use approx::assert_abs_diff_eq;

    fn toy() -> MixedData {
        let vars = vec![
            Variable::continuous("x"),
            Variable::discrete("d", default_state_names(2)),
            Variable::continuous("y"),
        ];
        let values = DMatrix::from_row_slice(
            3,
            3,
            &[1.0, 0.0, 2.0, 3.0, 1.0, f64::NAN, 5.0, f64::NAN, 6.0],
        );
        MixedData::from_values(vars, values).unwrap()
    }

    #[test]
    fn test_rejects_out_of_range_state() {
        let vars = vec![Variable::discrete("d", default_state_names(2))];
        let values = DMatrix::from_row_slice(1, 1, &[2.0]);
        assert!(MixedData::from_values(vars, values).is_err());
    }

    #[test]
    fn test_synchronize_rebinds_by_name() {
        let data = toy();
        let model_vars = vec![
            Variable::continuous("y"),
            Variable::discrete("d", default_state_names(2)),
            Variable::continuous("x"),
        ];
        let model = LatentTreeModel::latent_class("m", &model_vars, 2).unwrap();
        let synced = data.synchronize(&model).unwrap();
        assert_eq!(synced.variables(), model.manifest_variables().as_slice());
        let y = synced.column_of(&model_vars[0]).unwrap();
        assert_eq!(synced.value(0, y), 2.0);
        assert!(synced.is_missing(1, y));
    }

    #[test]
    fn test_synchronize_kind_mismatch() {
        let data = toy();
        let model_vars = vec![
            Variable::discrete("x", default_state_names(2)),
            Variable::discrete("d", default_state_names(2)),
            Variable::continuous("y"),
        ];
        let model = LatentTreeModel::latent_class("m", &model_vars, 2).unwrap();
        let err = data.synchronize(&model).unwrap_err();
        assert!(err.to_string().contains("structural mismatch"));

        let model_vars = vec![
            Variable::continuous("x"),
            Variable::discrete("d", default_state_names(3)),
            Variable::continuous("y"),
        ];
        let model = LatentTreeModel::latent_class("m", &model_vars, 2).unwrap();
        assert!(data.synchronize(&model).is_err());
    }

    #[test]
    fn test_moments_skip_incomplete() {
        let data = toy();
        let vars = vec![data.variables()[0].clone(), data.variables()[2].clone()];
        let (mean, cov) = data.moments(&vars).unwrap();
        assert_abs_diff_eq!(mean[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mean[1], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[(0, 0)], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[(0, 1)], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_without_column() {
        let data = toy().without_column(1).unwrap();
        assert_eq!(data.variables().len(), 2);
        assert_eq!(data.value(2, 1), 6.0);
    }
}
