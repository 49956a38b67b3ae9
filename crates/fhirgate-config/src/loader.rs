//! Loads [`GatewayConfig`] from a TOML file merged with environment
//! variable overrides, e.g. `FHIRGATE__RETRY__MAX_ATTEMPTS=5`.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use tracing::debug;

use crate::settings::GatewayConfig;
use crate::{ConfigError, Result};

/// Default config file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "fhirgate.toml";

pub fn load_config(path: Option<&str>) -> Result<GatewayConfig> {
    let mut builder = Config::builder();
    match path {
        Some(p) => {
            let pathbuf = PathBuf::from(p);
            if !pathbuf.exists() {
                return Err(ConfigError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("configuration file not found: {p}"),
                )));
            }
            debug!("Loading configuration from {p}");
            builder = builder.add_source(File::from(pathbuf));
        }
        None => {
            // Try default root-level file
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path));
            } else {
                debug!("Config file does not exist: {DEFAULT_CONFIG_FILE}, using defaults");
            }
        }
    }
    // Environment variable overrides, e.g., FHIRGATE__DOWNSTREAM__BASE_URL=...
    builder = builder.add_source(
        Environment::with_prefix("FHIRGATE")
            .try_parsing(true)
            .separator("__"),
    );
    let cfg = builder
        .build()
        .map_err(|e| ConfigError::parse(format!("config build error: {e}")))?;
    let merged: GatewayConfig = cfg
        .try_deserialize()
        .map_err(|e| ConfigError::parse(format!("config deserialize error: {e}")))?;
    // Validate
    merged.validate()?;
    Ok(merged)
}

pub fn load_config_with_default_path<P: AsRef<Path>>(path: Option<P>) -> Result<GatewayConfig> {
    let p = path
        .as_ref()
        .map(|p| p.as_ref().to_string_lossy().to_string());
    load_config(p.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
            [service]
            name = "edge-gateway"

            [downstream]
            base_url = "https://fhir.example.org/"

            [retry]
            delay_ms = 100
            max_attempts = 2
            "#
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.service.name, "edge-gateway");
        assert_eq!(config.downstream.base_url, "https://fhir.example.org/");
        assert_eq!(config.retry.delay_ms, 100);
        assert_eq!(config.retry.max_attempts, 2);
        // Sections absent from the file keep their defaults.
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let result = load_config(Some("/definitely/not/here/fhirgate.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
            [retry]
            max_attempts = 0
            "#
        )
        .unwrap();

        let result = load_config(file.path().to_str());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_with_default_path_helper() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[service]\nname = \"from-helper\"").unwrap();

        let config = load_config_with_default_path(Some(file.path())).unwrap();
        assert_eq!(config.service.name, "from-helper");
    }
}
