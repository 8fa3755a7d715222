use anyhow::Result;
use clap::{Parser, Subcommand};

mod cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Check(args) => args.run(),
        Command::Run(args) => args.run(),
    }
}

#[derive(Parser)]
#[command(name = "gantry", about = "G-code tooling for Gantry")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and validate G-code files without running them.
    Check(cli::check::CheckArgs),
    /// Run the controller against the simulated machine.
    Run(cli::run::RunArgs),
}
