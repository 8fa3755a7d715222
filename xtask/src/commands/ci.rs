use anyhow::Result;
use clap::{Args, Subcommand};
use xshell::{Shell, cmd};

use super::{corpus::Corpus, fmt::Fmt, snapshots::Snapshots, test::Test};

#[derive(Args)]
pub struct Ci {
    #[command(subcommand)]
    command: Option<CiCommand>,
}

#[derive(Subcommand)]
pub enum CiCommand {
    /// Check formatting without rewriting files
    Fmt,
    /// Run clippy over every target with warnings denied
    Clippy,
    /// Look for unused dependencies with cargo-udeps
    Udeps,
    /// Run the test suite, optionally for one package
    Test(Test),
    /// Fail on snapshots that are pending or unreferenced
    Snapshots,
    /// Run the checker over the sample programs
    Corpus(Corpus),
}

impl Ci {
    pub fn run(&self, sh: &Shell) -> Result<()> {
        match &self.command {
            Some(cmd) => cmd.run(sh),
            None => {
                CiCommand::Fmt.run(sh)?;
                CiCommand::Clippy.run(sh)?;
                CiCommand::Udeps.run(sh)?;
                CiCommand::Test(Test::default()).run(sh)?;
                CiCommand::Snapshots.run(sh)?;
                CiCommand::Corpus(Corpus::default()).run(sh)
            }
        }
    }
}

impl CiCommand {
    pub fn run(&self, sh: &Shell) -> Result<()> {
        match self {
            CiCommand::Fmt => Fmt::new(true).run(sh),
            CiCommand::Clippy => {
                eprintln!("Running cargo clippy...");
                cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
                Ok(())
            }
            CiCommand::Udeps => {
                if cmd!(sh, "cargo +nightly udeps --version")
                    .quiet()
                    .run()
                    .is_err()
                {
                    eprintln!("Installing cargo-udeps...");
                    cmd!(sh, "rustup toolchain install nightly --profile minimal").run()?;
                    cmd!(sh, "cargo +nightly install cargo-udeps --locked").run()?;
                }
                eprintln!("Running cargo udeps...");
                cmd!(sh, "cargo +nightly udeps --workspace --all-targets").run()?;
                Ok(())
            }
            CiCommand::Test(test) => test.run(sh),
            CiCommand::Snapshots => Snapshots::check(sh),
            CiCommand::Corpus(corpus) => corpus.run(sh),
        }
    }
}
