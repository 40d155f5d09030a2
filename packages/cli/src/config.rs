// ABOUTME: Server configuration loaded from environment variables
// ABOUTME: Listen address and the API key clients must present

use rce_config::{CUSTOM_RCE_API_KEY, PORT, RCE_HOST};
use std::env;
use std::num::ParseIntError;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HOST: &str = "0.0.0.0";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("CUSTOM_RCE_API_KEY must be set to a non-empty value")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub api_key: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var(PORT) {
            Ok(value) if !value.trim().is_empty() => value.trim().parse::<u16>()?,
            _ => DEFAULT_PORT,
        };

        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let host = env::var(RCE_HOST)
            .ok()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let api_key = env::var(CUSTOM_RCE_API_KEY)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(Config {
            port,
            host,
            api_key,
        })
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, port: Option<u16>, host: Option<String>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(host) = host {
            self.host = host;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    fn clear_env() {
        env::remove_var(PORT);
        env::remove_var(RCE_HOST);
        env::remove_var(CUSTOM_RCE_API_KEY);
    }

    #[test]
    #[serial]
    fn test_defaults_with_api_key() {
        clear_env();
        env::set_var(CUSTOM_RCE_API_KEY, "k");

        let config = Config::from_env().unwrap();

        assert_eq!(config.port, 8000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.api_key, "k");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_api_key_is_an_error() {
        clear_env();

        assert!(matches!(Config::from_env(), Err(ConfigError::MissingApiKey)));

        env::set_var(CUSTOM_RCE_API_KEY, "");
        assert!(matches!(Config::from_env(), Err(ConfigError::MissingApiKey)));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_port() {
        clear_env();
        env::set_var(CUSTOM_RCE_API_KEY, "k");

        env::set_var(PORT, "not-a-port");
        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidPort(_))));

        env::set_var(PORT, "70000");
        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidPort(_))));

        env::set_var(PORT, "0");
        assert!(matches!(Config::from_env(), Err(ConfigError::PortOutOfRange(0))));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_explicit_address() {
        clear_env();
        env::set_var(CUSTOM_RCE_API_KEY, "k");
        env::set_var(PORT, "9100");
        env::set_var(RCE_HOST, "127.0.0.1");

        let config = Config::from_env().unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.host, "127.0.0.1");
        clear_env();
    }

    #[test]
    fn test_overrides_take_precedence() {
        let config = Config {
            port: 8000,
            host: "0.0.0.0".to_string(),
            api_key: "k".to_string(),
        };

        let overridden = config
            .clone()
            .with_overrides(Some(9000), Some("localhost".to_string()));
        assert_eq!(overridden.port, 9000);
        assert_eq!(overridden.host, "localhost");

        assert_eq!(config.clone().with_overrides(None, None), config);
    }
}
