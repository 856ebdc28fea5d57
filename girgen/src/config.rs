//! Configuration types for `girgen.toml`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::model::Model;

/// Root configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub output: OutputConfig,
    /// Path to the resolved model document produced by the GIR front-end,
    /// relative to the TOML file's directory.
    pub model: PathBuf,
    /// Restrict generation to these namespaces. Empty means all namespaces
    /// in the model document.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Use 32-bit carriers for C `long`/`unsigned long` (Windows/LLP64).
    #[serde(default)]
    pub long_as_int: bool,
    /// Degrade unresolved type references to pointer-level marshaling with a
    /// warning instead of failing validation.
    #[serde(default)]
    pub allow_unresolved: bool,
}

/// Output settings.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Directory the generated `.rs` files are written into.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("src/generated")
}

/// Load and parse a `girgen.toml` configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path.display(), e))?;
    Ok(config)
}

/// Load and parse a model document.
pub fn load_model(path: &Path) -> anyhow::Result<Model> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read model document {}: {}", path.display(), e))?;
    let model: Model = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse model document {}: {}", path.display(), e))?;
    Ok(model)
}
