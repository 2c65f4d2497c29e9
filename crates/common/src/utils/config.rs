use crate::error::{CommonError, Result};
use ::config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Loads configuration from a file into a struct.
/// Supports TOML, YAML, JSON, etc. based on file extension.
pub fn load_config<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    load_layered(Some(path), None)
}

/// Loads configuration from an optional file, then overlays environment
/// variables carrying `env_prefix` (e.g. `TOKENGATE_RPC_URL` -> `rpc_url`).
///
/// Fields missing from every source fall back to the struct's serde defaults.
pub fn load_layered<T: DeserializeOwned, P: AsRef<Path>>(
    path: Option<P>,
    env_prefix: Option<&str>,
) -> Result<T> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| CommonError::Config("Invalid config path".to_string()))?;
        builder = builder.add_source(File::with_name(path_str));
    }

    if let Some(prefix) = env_prefix {
        builder = builder.add_source(
            // Values stay strings until deserialization so decimal amounts
            // wider than i64 survive intact
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__"),
        );
    }

    let settings = builder.build()?;
    Ok(settings.try_deserialize::<T>()?)
}
