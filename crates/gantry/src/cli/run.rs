use super::{init_tracing, load_config};
use anyhow::{Context, Result};
use clap::Args;
use gantry::Protocol;
use gantry_core::{signals::is_realtime, sim::SimMachine};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{io::AsyncReadExt, sync::mpsc};

#[derive(Args)]
pub struct RunArgs {
    /// Path to the configuration file (TOML or JSON).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// G-code file to stream. Reads an interactive session from stdin when
    /// omitted.
    pub input: Option<PathBuf>,

    /// Milliseconds between main-loop passes in interactive mode.
    #[arg(long, default_value_t = 10)]
    pub poll_ms: u64,
}

impl RunArgs {
    pub fn run(&self) -> Result<()> {
        init_tracing();

        let config = load_config(self.config.as_deref())?;
        let mut protocol = Protocol::simulated(config)?;
        emit(protocol.start());

        match &self.input {
            Some(path) => stream_file(&mut protocol, path),
            None => interactive(protocol, Duration::from_millis(self.poll_ms.max(1))),
        }
    }
}

fn emit(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

fn stream_file(protocol: &mut Protocol<SimMachine>, path: &Path) -> Result<()> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read input {}", path.display()))?;

    let mut errors = 0usize;
    for (number, line) in source.lines().enumerate() {
        let responses = protocol.line(line);
        if responses.last().is_some_and(|last| last.starts_with("error:")) {
            errors += 1;
            tracing::warn!(line = number + 1, "{line}");
        }
        emit(responses);
        emit(protocol.poll());
    }
    emit(protocol.wait_idle());

    tracing::info!(
        lines = source.lines().count(),
        errors,
        elapsed_ms = protocol.controller().machine().elapsed_ms(),
        "finished {}",
        path.display()
    );
    if errors > 0 {
        anyhow::bail!("{errors} line(s) failed in {}", path.display());
    }
    Ok(())
}

/// Reads stdin byte by byte. Realtime bytes are dispatched on arrival,
/// everything else is assembled into lines for the main loop.
#[tokio::main]
async fn interactive(mut protocol: Protocol<SimMachine>, period: Duration) -> Result<()> {
    let signals = protocol.controller().signals().clone();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buffer = [0u8; 256];
        let mut line = Vec::new();
        loop {
            let read = match stdin.read(&mut buffer).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(error) => {
                    tracing::error!(%error, "stdin closed");
                    break;
                }
            };
            for &byte in &buffer[..read] {
                if is_realtime(byte) {
                    signals.call_rt_command(byte);
                } else if byte == b'\n' || byte == b'\r' {
                    if !line.is_empty() {
                        let text = String::from_utf8_lossy(&line).into_owned();
                        line.clear();
                        if tx.send(text).is_err() {
                            return;
                        }
                    }
                } else {
                    line.push(byte);
                }
            }
        }
    });

    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => emit(protocol.line(&line)),
                None => break,
            },
            _ = interval.tick() => emit(protocol.poll()),
        }
    }

    emit(protocol.wait_idle());
    Ok(())
}
