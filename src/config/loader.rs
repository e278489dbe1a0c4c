//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: ProxyConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            [listener]
            bind_address = "127.0.0.1:8080"

            [[backends]]
            name = "api-1"
            group = "api"
            address = "127.0.0.1:9000"
            weight = 3

            [[routes]]
            name = "api"
            path_prefix = "/api"
            backend_group = "api"

            [routes.headers]
            authorization = "passthrough"
            x-internal = "ignore"

            [routes.rewrite]
            match = "^/api(/.*)$"
            replace = "$1"
        "#;
        let config: ProxyConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.backends[0].weight, 3);
        assert_eq!(config.routes[0].headers.len(), 2);
        assert!(config.routes[0].rewrite.is_some());
        validate_config(&config).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
