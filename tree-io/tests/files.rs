use approx::assert_abs_diff_eq;
use tree_em::{loglikelihood, simulate};
use tree_io::model_io::parse_model;
use tree_io::{read_data, read_model, write_data, write_model, ModelAnnotation};

const NETWORK: &str = r#"
network "demo" {
}
variable "Z1" {
	type discrete[2] { "s0" "s1" };
	property latent;
}
variable "Z2" {
	type discrete[2] { "s0" "s1" };
	property latent;
}
variable "colour" {
	type discrete[3] { "red" "green" "blue" };
}
variable "x" {
	type continuous;
}
variable "y" {
	type continuous;
}
variable "w" {
	type continuous;
}
probability ( "Z1" ) {
	table 0.3 0.7;
}
probability ( "colour" | "Z1" ) {
	table 0.8 0.1 0.1 0.1 0.2 0.7;
}
probability ( "Z2" | "Z1" ) {
	table 0.9 0.1 0.2 0.8;
}
probability ( "x" "y" | "Z2" ) {
	table -1 -1 1 0.3 0.3 1 1 1 1 0 0 1;
}
probability ( "w" | "Z2" ) {
	table 0 1 3 0.5;
}
"#;

#[test]
fn model_file_reproduces_model() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("demo.bif.gz");
    let file = file.to_str().ok_or_else(|| anyhow::anyhow!("path"))?;

    let model = parse_model(NETWORK)?;
    let annotation = ModelAnnotation {
        loglikelihood: Some(-12.25),
        score: Some(-30.5),
    };
    write_model(&model, &annotation, file)?;
    let again = read_model(file)?;

    assert_eq!(again.name(), "demo");
    assert_eq!(again.dimension(), model.dimension());
    assert_eq!(again.summary(), model.summary());

    // same distribution over the same columns
    let data = simulate(&model, 200, 3)?;
    let synced = data.synchronize(&again)?;
    assert_abs_diff_eq!(
        loglikelihood(&model, &data)?,
        loglikelihood(&again, &synced)?,
        epsilon = 1e-9
    );
    Ok(())
}

#[test]
fn data_file_reads_back() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("demo.csv");
    let file = file.to_str().ok_or_else(|| anyhow::anyhow!("path"))?;

    let model = parse_model(NETWORK)?;
    let data = simulate(&model, 50, 8)?;
    write_data(&data, file)?;

    let back = read_data(file, Some(&model))?;
    assert_eq!(back.num_cases(), 50);
    let synced = back.synchronize(&model)?;
    for (j, v) in data.variables().iter().enumerate() {
        assert_eq!(v.name(), synced.variables()[j].name());
        for i in 0..50 {
            assert_abs_diff_eq!(data.value(i, j), synced.value(i, j), epsilon = 1e-12);
        }
    }
    Ok(())
}
