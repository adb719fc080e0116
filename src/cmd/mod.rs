pub mod demo;
pub mod render;
pub mod validate;

use color_eyre::eyre::{Result, WrapErr};
use kestrel_cls::Config;
use std::path::Path;

/// Read and validate a CLS configuration file
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
    kestrel_cls::config::load(&raw)
        .wrap_err_with(|| format!("Invalid CLS config in {}", path.display()))
}
