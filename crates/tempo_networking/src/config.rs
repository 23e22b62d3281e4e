//! # Server Configuration
//!
//! Loaded once at startup from a TOML file. Every field has a default, so an
//! empty file is a valid configuration.
//!
//! ```toml
//! tick_rate = 30
//! rewind_horizon = 120
//! bind_address = "0.0.0.0:7777"
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use tempo_core::{Tick, WIRE_TICK_MODULUS};

use crate::error::ConfigError;

/// Server configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// How many ticks a late action may reach back.
    pub rewind_horizon: Tick,
    /// Requests each producer may queue before blocking.
    pub queue_capacity: usize,
    /// Players allowed in the world at once.
    pub max_players: usize,
    /// Listening address.
    pub bind_address: SocketAddr,
    /// Whether clients may create accounts.
    pub registration_enabled: bool,
    /// Failed login or register attempts allowed per connection.
    pub max_login_attempts: u32,
    /// Frames buffered per connection before it is dropped as too slow.
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            rewind_horizon: 120,
            queue_capacity: 64,
            max_players: 64,
            bind_address: SocketAddr::from(([0, 0, 0, 0], 7777)),
            registration_enabled: true,
            max_login_attempts: 5,
            outbound_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("tick_rate", u64::from(self.tick_rate)),
            ("queue_capacity", self.queue_capacity as u64),
            ("max_players", self.max_players as u64),
            ("max_login_attempts", u64::from(self.max_login_attempts)),
            ("outbound_capacity", self.outbound_capacity as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.tick_rate > 1_000 {
            return Err(ConfigError::Invalid(format!(
                "tick_rate of {} Hz exceeds 1000 Hz",
                self.tick_rate
            )));
        }
        if self.rewind_horizon >= WIRE_TICK_MODULUS {
            return Err(ConfigError::Invalid(format!(
                "rewind_horizon must be below {WIRE_TICK_MODULUS}, got {}",
                self.rewind_horizon
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(ServerConfig::from_toml_str("").unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = ServerConfig::from_toml_str(
            r#"
            tick_rate = 60
            bind_address = "127.0.0.1:9000"
            registration_enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.bind_address, "127.0.0.1:9000".parse().unwrap());
        assert!(!config.registration_enabled);
        assert_eq!(config.rewind_horizon, 120);
    }

    #[test]
    fn test_rejects_zero_and_wide_horizon() {
        assert!(matches!(
            ServerConfig::from_toml_str("queue_capacity = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("rewind_horizon = 65536"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(ServerConfig::from_toml_str("rewind_horizon = 65535").is_ok());
    }

    #[test]
    fn test_load_file() {
        let path = std::env::temp_dir().join(format!("tempo-config-{}.toml", std::process::id()));
        std::fs::write(&path, "max_players = 2\noutbound_capacity = 8\n").unwrap();
        let config = ServerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.max_players, 2);
        assert_eq!(config.outbound_capacity, 8);

        assert!(matches!(ServerConfig::load(&path), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_rejects_unknown_and_mistyped_keys() {
        assert!(matches!(
            ServerConfig::from_toml_str("tick_rat = 30"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("tick_rate = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
