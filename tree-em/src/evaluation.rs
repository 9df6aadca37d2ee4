//! Agreement between latent variables and a known class label.

use crate::inference::CompiledTree;
use nalgebra::DMatrix;
use tree_model::{LatentTreeModel, MixedData, Variable};

/// Normalized mutual information `I(a; b) / sqrt(H(a) H(b))` of a joint
/// count table
pub fn normalized_mutual_information(joint: &DMatrix<f64>) -> f64 {
    let tot = joint.sum();
    if tot <= 0.0 {
        return 0.0;
    }
    let p = joint / tot;
    let pa: Vec<f64> = p.row_iter().map(|r| r.sum()).collect();
    let pb: Vec<f64> = p.column_iter().map(|c| c.sum()).collect();

    let entropy = |q: &[f64]| -> f64 {
        q.iter()
            .filter(|&&x| x > 0.0)
            .map(|&x| -x * x.ln())
            .sum()
    };

    let mut mi = 0.0;
    for a in 0..p.nrows() {
        for b in 0..p.ncols() {
            let x = p[(a, b)];
            if x > 0.0 {
                mi += x * (x / (pa[a] * pb[b])).ln();
            }
        }
    }
    let denom = (entropy(&pa) * entropy(&pb)).sqrt();
    if denom > 0.0 {
        mi / denom
    } else {
        0.0
    }
}

/// NMI between the class and the MAP state of every latent variable.
///
/// * `class` - state index per case, `NaN` when unknown
/// * `class_states` - number of class states
pub fn class_agreement(
    model: &LatentTreeModel,
    data: &MixedData,
    class: &[f64],
    class_states: usize,
) -> anyhow::Result<Vec<(Variable, f64)>> {
    if class.len() != data.num_cases() {
        anyhow::bail!(
            "{} class labels for {} cases",
            class.len(),
            data.num_cases()
        );
    }
    let tree = CompiledTree::new(model, data)?;
    let posteriors = tree.latent_posteriors(data)?;

    Ok(posteriors
        .into_iter()
        .map(|(v, post)| {
            let k = v.cardinality().unwrap_or(1);
            let mut joint = DMatrix::<f64>::zeros(class_states, k);
            for (i, p) in post.iter().enumerate() {
                let c = class[i];
                if c.is_nan() || c as usize >= class_states {
                    continue;
                }
                joint[(c as usize, p.argmax().0)] += data.weight(i);
            }
            (v, normalized_mutual_information(&joint))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_nmi_extremes() {
        let perfect = DMatrix::from_row_slice(2, 2, &[10.0, 0.0, 0.0, 5.0]);
        assert_abs_diff_eq!(normalized_mutual_information(&perfect), 1.0, epsilon = 1e-12);

        let independent = DMatrix::from_row_slice(2, 2, &[4.0, 4.0, 2.0, 2.0]);
        assert_abs_diff_eq!(normalized_mutual_information(&independent), 0.0, epsilon = 1e-12);
    }
}
