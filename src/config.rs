//! Configuration management for the ledger node

use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::path::Path;

/// Environment variable naming the TOML configuration file
pub const CONFIG_ENV_VAR: &str = "LEDGER_CONFIG";

/// Highest difficulty a SHA-256 hex digest can ever satisfy
pub const MAX_DIFFICULTY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Leading zero hex digits required of a mined block hash
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,
    /// Amount credited to the miner of each block
    #[serde(default = "default_mining_reward")]
    pub mining_reward: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            mining_reward: default_mining_reward(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_difficulty() -> usize {
    2
}

fn default_mining_reward() -> f64 {
    100.0
}

impl Config {
    /// Parses and validates a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_toml_str(&contents)
    }

    /// Loads the file named by `LEDGER_CONFIG`, or the defaults when it is unset
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".to_string()));
        }

        if self.ledger.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "ledger.difficulty must be at most {}, got {}",
                MAX_DIFFICULTY, self.ledger.difficulty
            )));
        }

        if !self.ledger.mining_reward.is_finite() || self.ledger.mining_reward < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "ledger.mining_reward must be a non-negative number, got {}",
                self.ledger.mining_reward
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.ledger.difficulty, 2);
        assert_eq!(config.ledger.mining_reward, 100.0);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml_str(
            r#"
            [server]
            port = 9000

            [ledger]
            difficulty = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.ledger.difficulty, 4);
        assert_eq!(config.ledger.mining_reward, 100.0);
    }

    #[test]
    fn test_rejects_unreachable_difficulty() {
        let err = Config::from_toml_str("[ledger]\ndifficulty = 65\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_negative_reward() {
        let err = Config::from_toml_str("[ledger]\nmining_reward = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_empty_host() {
        let err = Config::from_toml_str("[server]\nhost = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::from_toml_str("[ledger\ndifficulty = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/ledger.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
