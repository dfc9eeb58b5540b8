pub mod commands;
pub mod runner;

pub use commands::Cli;
pub use runner::{run, run_with_config};
