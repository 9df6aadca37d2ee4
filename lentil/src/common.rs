pub use clap::{Args, Parser, Subcommand};
pub use log::{info, warn};
pub use std::sync::Arc;

pub use tree_io::{read_data, read_model, write_data, write_model, ModelAnnotation};
pub use tree_model::LatentTreeModel;

pub const DEFAULT_CARDINALITY: usize = 2;
pub const DEFAULT_SEED: u64 = 42;

/// Start `env_logger`; `verbose` turns on `info!` output
pub fn init_logger(verbose: bool) {
    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}
