use approx::assert_abs_diff_eq;
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tree_em::evaluation::class_agreement;
use tree_em::{loglikelihood, simulate, EmConfig, EmEstimator};
use tree_model::variable::default_state_names;
use tree_model::{GaussianComponent, LatentTreeModel, Potential, Variable};

/// Z1 -> {a, b, Z2}, Z2 -> {c, y}
fn two_level() -> anyhow::Result<LatentTreeModel> {
    let a = Variable::discrete("a", default_state_names(2));
    let b = Variable::discrete("b", default_state_names(3));
    let c = Variable::discrete("c", default_state_names(2));
    let y = Variable::continuous("y");

    let mut m = LatentTreeModel::new("truth");
    let g = m.graph_mut();
    let z1 = g.add_node(Variable::latent("Z1", 2))?;
    g.add_child(z1, a.clone())?;
    g.add_child(z1, b.clone())?;
    let z2 = g.add_child(z1, Variable::latent("Z2", 2))?;
    g.add_child(z2, c.clone())?;
    g.add_child(z2, y.clone())?;
    let (v1, v2) = (m.variable(z1).clone(), m.variable(z2).clone());

    m.set_potential(&v1, Potential::Categorical(DMatrix::from_row_slice(1, 2, &[0.4, 0.6])))?;
    m.set_potential(
        &v2,
        Potential::Categorical(DMatrix::from_row_slice(2, 2, &[0.85, 0.15, 0.2, 0.8])),
    )?;
    m.set_potential(
        &a,
        Potential::Categorical(DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.15, 0.85])),
    )?;
    m.set_potential(
        &b,
        Potential::Categorical(DMatrix::from_row_slice(
            2,
            3,
            &[0.7, 0.2, 0.1, 0.1, 0.2, 0.7],
        )),
    )?;
    m.set_potential(
        &c,
        Potential::Categorical(DMatrix::from_row_slice(2, 2, &[0.8, 0.2, 0.1, 0.9])),
    )?;
    m.set_potential(
        &y,
        Potential::Gaussian(vec![
            GaussianComponent {
                mean: DVector::from_element(1, -2.0),
                covariance: DMatrix::from_element(1, 1, 1.0),
            },
            GaussianComponent {
                mean: DVector::from_element(1, 2.0),
                covariance: DMatrix::from_element(1, 1, 1.0),
            },
        ]),
    )?;
    Ok(m)
}

#[test]
fn fitted_structure_approaches_truth() -> anyhow::Result<()> {
    let truth = two_level()?;
    let data = simulate(&truth, 1500, 17)?;
    let true_ll = loglikelihood(&truth, &data)?;

    let mut start = truth.clone();
    for v in start.variables() {
        start.invalidate(&v);
    }
    let mut rng = SmallRng::seed_from_u64(99);
    let est = EmEstimator::new(
        "full",
        EmConfig {
            restarts: 5,
            ..EmConfig::default()
        },
    )
    .estimate(&data, &start, &[], &mut rng)?;

    assert!(est.loglikelihood > true_ll - 75.0);
    assert!(est.loglikelihood < true_ll + 50.0);
    assert_eq!(est.dimension, truth.dimension());

    // started at the truth, EM can only climb
    let polished = EmEstimator::new("warm", EmConfig::estimation())
        .estimate(&data, &truth, &[], &mut rng)?;
    assert!(polished.loglikelihood >= true_ll - 1e-6);
    Ok(())
}

#[test]
fn rerooting_keeps_loglikelihood() -> anyhow::Result<()> {
    let truth = two_level()?;
    let data = simulate(&truth, 300, 5)?;
    let before = loglikelihood(&truth, &data)?;

    let mut rerooted = truth.clone();
    let z2 = rerooted
        .find_variable("Z2")
        .and_then(|v| rerooted.node_of(&v))
        .ok_or_else(|| anyhow::anyhow!("no Z2"))?;
    rerooted.reroot(z2)?;
    rerooted.validate()?;
    let after = loglikelihood(&rerooted, &data)?;
    assert_abs_diff_eq!(before, after, epsilon = 1e-8);
    Ok(())
}

#[test]
fn latent_tracks_its_class() -> anyhow::Result<()> {
    let truth = two_level()?;
    let data = simulate(&truth, 400, 23)?;
    // "a" is almost a copy of Z1
    let a = truth.find_variable("a").ok_or_else(|| anyhow::anyhow!("no a"))?;
    let ja = data.column_of(&a).ok_or_else(|| anyhow::anyhow!("no column"))?;
    let class: Vec<f64> = (0..data.num_cases()).map(|i| data.value(i, ja)).collect();

    let scores = class_agreement(&truth, &data, &class, 2)?;
    assert_eq!(scores.len(), 2);
    let z1 = scores
        .iter()
        .find(|(v, _)| v.name() == "Z1")
        .map(|(_, s)| *s)
        .unwrap_or(0.0);
    assert!(z1 > 0.3);
    Ok(())
}
