//! Configuration management for the miner.

use serde::Deserialize;
use std::fs;

use crate::error::{ChainError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub mining: MiningConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Port the miner-to-miner listener binds; 0 picks a free port.
    #[serde(default)]
    pub p2p_port: u16,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Address advertised to the directory and peers. Defaults to the
    /// listener's local address.
    #[serde(default)]
    pub advertise_addr: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            p2p_port: 0,
            api_port: default_api_port(),
            advertise_addr: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiningConfig {
    #[serde(default = "default_mining_enabled")]
    pub enabled: bool,
}

impl Default for MiningConfig {
    fn default() -> Self {
        MiningConfig {
            enabled: default_mining_enabled(),
        }
    }
}

fn default_api_port() -> u16 {
    3000
}

fn default_mining_enabled() -> bool {
    true
}

/// Load `config.toml` from the working directory; an absent file yields
/// the defaults.
pub fn load_config() -> Result<Config> {
    let config_str = fs::read_to_string("config.toml").unwrap_or_default();
    if config_str.is_empty() {
        return Ok(Config::default());
    }
    toml::from_str(&config_str).map_err(|e| ChainError::ConfigError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.p2p_port, 0);
        assert_eq!(config.network.api_port, 3000);
        assert!(config.mining.enabled);
    }

    #[test]
    fn test_parse_overrides() {
        let config: Config = toml::from_str(
            r#"
            [network]
            p2p_port = 8334
            api_port = 8080
            advertise_addr = "203.0.113.7:8334"

            [mining]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.network.p2p_port, 8334);
        assert_eq!(config.network.api_port, 8080);
        assert_eq!(
            config.network.advertise_addr.as_deref(),
            Some("203.0.113.7:8334")
        );
        assert!(!config.mining.enabled);
    }
}
