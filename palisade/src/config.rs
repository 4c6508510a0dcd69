use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use tracing::*;
use palisade_common::PalisadeConfig;

/// Loads the YAML config with `PALISADE_*` environment overrides. A
/// missing file falls back to the built-in defaults.
pub fn load_config(path: &Path) -> Result<PalisadeConfig> {
    let config: PalisadeConfig = Config::builder()
        .add_source(File::new(&path.to_string_lossy(), FileFormat::Yaml).required(false))
        .add_source(Environment::with_prefix("PALISADE").separator("__"))
        .build()
        .context("Could not load config")?
        .try_deserialize()
        .context("Could not parse config")?;

    config.validate().context("Invalid config")?;

    info!("Using config: {path:?}");
    Ok(config)
}
