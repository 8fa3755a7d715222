use anyhow::Result;
use clap::Subcommand;
use xshell::Shell;

pub mod ci;
pub mod corpus;
pub mod fmt;
pub mod snapshots;

#[derive(Subcommand)]
pub enum Command {
    /// Run the CI checks. Runs every check when no subcommand is given.
    Ci(ci::Ci),
    /// Run the g-code checker over every test-data program
    Corpus(corpus::Corpus),
    /// Format the workspace
    Fmt(fmt::Fmt),
    /// Review pending insta snapshots
    Snapshots(snapshots::Snapshots),
    /// Run tests
    Test(test::Test),
}

impl Command {
    pub fn run(self, sh: &Shell) -> Result<()> {
        match self {
            Command::Ci(cmd) => cmd.run(sh),
            Command::Corpus(cmd) => cmd.run(sh),
            Command::Fmt(cmd) => cmd.run(sh),
            Command::Snapshots(cmd) => cmd.run(sh),
            Command::Test(cmd) => cmd.run(sh),
        }
    }
}
