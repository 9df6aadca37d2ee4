mod common;
mod run_learn;
mod run_simulate;

use common::*;
use run_learn::*;
use run_simulate::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LENTIL",
    long_about = "Latent tree models for mixed discrete and continuous data.\n\
		  Structure is searched by rounds of expansion, adjustment\n\
		  and simplification, scoring candidates by BIC after EM.",
    term_width = 80
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Learn a latent tree model from data",
        long_about = "Learn structure and parameters from a data file:\n\
		      (1) Start from a given model or a latent class model\n\
		      (2) Expand, adjust and simplify until BIC stops improving\n\
		      (3) Write the model with its log-likelihood and BIC.\n"
    )]
    Learn(LearnArgs),

    /// Sample a data set from a fully specified model
    Simulate(SimulateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Learn(args) => {
            run_learn(args)?;
        }
        Commands::Simulate(args) => {
            run_simulate(args)?;
        }
    }

    info!("Done");
    Ok(())
}
