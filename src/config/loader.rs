use std::fs;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::types::Config;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config validation failed: {message}")]
    ValidationError { message: String },
}

impl Config {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/shellbridge/config.toml` on Unix/macOS, or the
    /// equivalent via `dirs::config_dir()`. Falls back to the current
    /// directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("shellbridge").join("config.toml")
    }

    /// Loads configuration from the default config file.
    ///
    /// - If the file doesn't exist, returns `Config::default()`.
    /// - If the file exists, parses it as TOML and validates.
    /// - Returns an error if reading, parsing, or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shell.path.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "shell.path must not be empty".to_string(),
            });
        }

        let timeouts = [
            ("shell.startup_timeout_secs", self.shell.startup_timeout_secs),
            ("shell.prompt_timeout_secs", self.shell.prompt_timeout_secs),
            (
                "credentials.first_prompt_timeout_secs",
                self.credentials.first_prompt_timeout_secs,
            ),
            ("credentials.settle_timeout_ms", self.credentials.settle_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::ValidationError {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.shell.path, "bash");
        assert!(!config.credentials.enabled);
        assert!(config.content.temp_dir.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: Config = toml::from_str(
            "[shell]\npath = \"zsh\"\n\n[credentials]\nenabled = true\n",
        )
        .unwrap();
        assert_eq!(config.shell.path, "zsh");
        assert_eq!(config.shell.prompt_timeout_secs, 30);
        assert!(config.credentials.enabled);
    }

    #[test]
    fn invalid_toml_is_rejected() {
        assert!(toml::from_str::<Config>("shell = 3").is_err());
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let config: Config =
            toml::from_str("[shell]\nstartup_timeout_secs = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn empty_shell_path_fails_validation() {
        let config: Config = toml::from_str("[shell]\npath = \" \"\n").unwrap();
        assert!(config.validate().is_err());
    }
}
