use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use xshell::{Shell, cmd};

const SAMPLES: &str = "crates/gantry-gcode/test-data";

#[derive(Args)]
pub struct Corpus {
    #[arg(long, default_value = SAMPLES)]
    dir: PathBuf,
}

impl Default for Corpus {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(SAMPLES),
        }
    }
}

impl Corpus {
    pub fn run(&self, sh: &Shell) -> Result<()> {
        let mut programs = sh
            .read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?
            .into_iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == "gcode"))
            .collect::<Vec<_>>();
        programs.sort();

        cmd!(sh, "cargo build -p gantry").run()?;

        let mut unexpected = Vec::new();
        for program in &programs {
            // files named `errors*` must be rejected
            let expect_failure = program
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem.starts_with("errors"));

            let output = cmd!(sh, "cargo run -q -p gantry -- check {program}")
                .ignore_status()
                .output()?;
            print!("{}", String::from_utf8_lossy(&output.stdout));

            if output.status.success() == expect_failure {
                unexpected.push(program.display().to_string());
            }
        }

        if !unexpected.is_empty() {
            anyhow::bail!("unexpected checker result for {}", unexpected.join(", "));
        }
        eprintln!("Checked {} programs", programs.len());
        Ok(())
    }
}
