//! Loading configuration files.
use std::path::Path;

use anyhow::Context;

use serde::de::DeserializeOwned;

/// Reads a TOML file into any deserializable configuration, such as a
/// [`RollupChainConfig`](crate::RollupChainConfig).
pub fn from_toml_path<P: AsRef<Path>, R: DeserializeOwned>(path: P) -> anyhow::Result<R> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {}", path.display()))
}
