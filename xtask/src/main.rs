use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use xshell::Shell;

mod commands;

/// Development tasks for the gantry workspace.
#[derive(Parser)]
#[command(name = "xtask")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // paths such as the corpus directory are relative to the workspace
    let root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .context("xtask is not inside a workspace")?;
    sh.change_dir(root);

    cli.command.run(&sh)
}
