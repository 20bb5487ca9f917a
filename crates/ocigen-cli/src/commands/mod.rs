//! CLI command definitions and dispatch.

pub mod check_options;
pub mod generate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// ocigen — OCI runtime descriptor generator.
#[derive(Parser, Debug)]
#[command(name = "ocigen", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the JSON configuration file.
    #[arg(long, global = true, env = "OCIGEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the runtime descriptor of a container.
    Generate(generate::GenerateArgs),
    /// Classify a mount option list and validate its overlay directories.
    CheckOptions(check_options::CheckOptionsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Generate(args) => generate::execute(args, cli.config.as_deref()),
        Command::CheckOptions(args) => check_options::execute(&args),
    }
}
