use crate::common::*;
use tree_em::simulate;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Model file with every parameter given
    #[arg(long, short, required = true)]
    model: Box<str>,

    /// Number of cases
    #[arg(long, short = 'n', default_value_t = 1000)]
    cases: usize,

    /// Random seed
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Output data file (csv, or tsv/tab/txt; .gz ok)
    #[arg(long, short, required = true)]
    output: Box<str>,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

pub fn run_simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let model = read_model(&args.model)?;
    let missing = model.uninitialized();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|v| v.name()).collect();
        anyhow::bail!("no parameters for {}", names.join(", "));
    }

    let data = simulate(&model, args.cases, args.seed)?;
    info!(
        "simulated {} cases of {} variables from {}",
        data.num_cases(),
        data.variables().len(),
        model.name()
    );
    write_data(&data, &args.output)?;
    Ok(())
}
