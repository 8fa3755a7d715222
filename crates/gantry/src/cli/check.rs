use super::{init_tracing, load_config};
use anyhow::{Context, Result};
use clap::Args;
use gantry_gcode::parse_program;
use std::{fs, path::PathBuf};

#[derive(Args)]
pub struct CheckArgs {
    /// Path to the configuration file (TOML or JSON).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// G-code files to check.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

impl CheckArgs {
    pub fn run(&self) -> Result<()> {
        init_tracing();

        let config = load_config(self.config.as_deref())?;
        let parser = config.machine_config()?.parser;

        let mut failed = 0usize;
        for input in &self.inputs {
            let source = fs::read_to_string(input)
                .with_context(|| format!("failed to read input {}", input.display()))?;
            match parse_program(&source, &parser) {
                Ok(blocks) => println!("OK {} ({} lines)", input.display(), blocks.len()),
                Err(error) => {
                    failed += 1;
                    println!(
                        "ERR {}: {error} (error:{})",
                        input.display(),
                        error.status.code()
                    );
                }
            }
        }

        if failed > 0 {
            anyhow::bail!("{failed} of {} file(s) failed", self.inputs.len());
        }
        Ok(())
    }
}
