pub mod check;
pub mod run;

use anyhow::Result;
use gantry::Config;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so stdout carries only protocol responses.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            tracing::info!("loading config from {}", path.display());
            Config::from_file(path)?
        }
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}
