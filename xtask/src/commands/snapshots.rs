use anyhow::Result;
use clap::Args;
use xshell::{Shell, cmd};

#[derive(Args)]
pub struct Snapshots {
    /// Accept every pending snapshot instead of reviewing them
    #[arg(long)]
    accept: bool,
}

fn ensure_cargo_insta(sh: &Shell) -> Result<()> {
    if cmd!(sh, "cargo insta --version").quiet().run().is_err() {
        eprintln!("Installing cargo-insta...");
        cmd!(sh, "cargo install cargo-insta --locked").run()?;
    }
    Ok(())
}

impl Snapshots {
    /// Fails when any snapshot differs or a stored one is no longer used.
    pub fn check(sh: &Shell) -> Result<()> {
        ensure_cargo_insta(sh)?;
        cmd!(sh, "cargo insta test --workspace --check --unreferenced=reject").run()?;
        Ok(())
    }

    pub fn run(&self, sh: &Shell) -> Result<()> {
        ensure_cargo_insta(sh)?;

        // regenerates the .snap.new files before reviewing them
        cmd!(sh, "cargo insta test --workspace --unreferenced=reject").run()?;
        if self.accept {
            cmd!(sh, "cargo insta accept").run()?;
        } else {
            cmd!(sh, "cargo insta review").run()?;
        }
        Ok(())
    }
}
