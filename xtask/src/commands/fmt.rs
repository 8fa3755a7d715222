use anyhow::Result;
use clap::Args;
use xshell::{Shell, cmd};

#[derive(Args)]
pub struct Fmt {
    /// Report unformatted files instead of rewriting them
    #[arg(long)]
    check: bool,
}

impl Fmt {
    pub fn new(check: bool) -> Self {
        Self { check }
    }

    pub fn run(&self, sh: &Shell) -> Result<()> {
        if cmd!(sh, "cargo fmt --version").quiet().run().is_err() {
            eprintln!("Installing rustfmt...");
            cmd!(sh, "rustup component add rustfmt").run()?;
        }

        let check = self.check.then_some("--check");
        cmd!(sh, "cargo fmt --all -- {check...}").run()?;
        Ok(())
    }
}
