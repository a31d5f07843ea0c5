//! Configuration loading

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::Config;

/// Default file locations, checked in order when no path is given
const DEFAULT_PATHS: [&str; 2] = ["config.yaml", "/config/config.yaml"];

/// Load and validate configuration.
///
/// Config file search order:
/// 1. `explicit` (from `--config` or `LOGCDN_CONFIG_PATH`)
/// 2. ./config.yaml (current working directory)
/// 3. /config/config.yaml (container mount path)
/// 4. Environment variables only
///
/// Environment variables (`LOGCDN__SECTION__KEY`) always override the file.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    if let Some(path) = explicit.filter(|p| !Path::new(p).exists()) {
        anyhow::bail!("Config file {path} does not exist");
    }

    let config_path = explicit
        .map(ToString::to_string)
        .or_else(|| {
            DEFAULT_PATHS
                .iter()
                .find(|p| Path::new(p).exists())
                .map(ToString::to_string)
        });

    let config = match config_path {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::from_file(&path).map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?
        }
    };

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        for error in &errors {
            tracing::error!("Config validation error: {}", error);
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    info!("Configuration loaded and validated successfully");
    info!("HTTP address: {}", config.http_address());

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "database:\n  url: \"memory://\"\nunits:\n  buffer:\n    name: buffer\n    backend:\n      type: memory\n"
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert!(config.database.is_memory());
        assert_eq!(config.units.buffer.name, "buffer");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(load_config(Some("/nonexistent/logcdn.yaml")).is_err());
    }
}
