// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Configuration module for the RouterOS connector service
//!
//! Loads and parses configuration from environment variables and JSON.

use serde::Deserialize;

use crate::mikrotik::Endpoint;


/// Default configuration values
pub mod defaults {
    pub const SERVER_ADDR: &str = "0.0.0.0:9090";
    pub const SWEEP_INTERVAL_SECS: u64 = 300;
    pub const CONNECTION_TTL_SECS: u64 = 1800;
    pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
    pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;
}

/// Environment variable names used by the application
pub mod env_vars {
    pub const SERVER_ADDR: &str = "SERVER_ADDR";
    pub const ROUTERS_CONFIG: &str = "ROUTERS_CONFIG";
    pub const SWEEP_INTERVAL_SECONDS: &str = "SWEEP_INTERVAL_SECONDS";
    pub const CONNECTION_TTL_SECONDS: &str = "CONNECTION_TTL_SECONDS";
    pub const SHUTDOWN_TIMEOUT_SECONDS: &str = "SHUTDOWN_TIMEOUT_SECONDS";
    pub const KEEPALIVE_INTERVAL_SECONDS: &str = "KEEPALIVE_INTERVAL_SECONDS";
}

/// A device addressable by logical id
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(flatten)]
    pub endpoint: Endpoint,
}

impl DeviceConfig {
    /// Validates device configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Device id cannot be empty".to_string());
        }
        self.endpoint
            .validate()
            .map_err(|e| format!("device '{}': {e}", self.id))
    }
}

/// Application-wide configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: String,
    pub devices: Vec<DeviceConfig>,
    pub sweep_interval_secs: u64,
    pub connection_ttl_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_addr: defaults::SERVER_ADDR.to_string(),
            devices: vec![],
            sweep_interval_secs: defaults::SWEEP_INTERVAL_SECS,
            connection_ttl_secs: defaults::CONNECTION_TTL_SECS,
            shutdown_timeout_secs: defaults::SHUTDOWN_TIMEOUT_SECS,
            keepalive_interval_secs: defaults::KEEPALIVE_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let seconds = |name: &str, default: u64| {
            lookup(name)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        let server_addr =
            lookup(env_vars::SERVER_ADDR).unwrap_or_else(|| defaults::SERVER_ADDR.to_string());

        // Load devices configuration from JSON
        let devices: Vec<DeviceConfig> = match lookup(env_vars::ROUTERS_CONFIG) {
            Some(config_json) => serde_json::from_str(&config_json).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse ROUTERS_CONFIG: {}. Using empty list.", e);
                vec![]
            }),
            None => {
                tracing::warn!(
                    "No device configuration found. Only direct endpoints can be used."
                );
                vec![]
            }
        };

        // Validate all device configurations
        let devices = devices
            .into_iter()
            .filter(|device| match device.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Invalid device configuration: {}", e);
                    tracing::warn!("Skipping invalid device: {}", device.id);
                    false
                }
            })
            .collect();

        Config {
            server_addr,
            devices,
            sweep_interval_secs: seconds(
                env_vars::SWEEP_INTERVAL_SECONDS,
                defaults::SWEEP_INTERVAL_SECS,
            ),
            connection_ttl_secs: seconds(
                env_vars::CONNECTION_TTL_SECONDS,
                defaults::CONNECTION_TTL_SECS,
            ),
            shutdown_timeout_secs: seconds(
                env_vars::SHUTDOWN_TIMEOUT_SECONDS,
                defaults::SHUTDOWN_TIMEOUT_SECS,
            ),
            keepalive_interval_secs: seconds(
                env_vars::KEEPALIVE_INTERVAL_SECONDS,
                defaults::KEEPALIVE_INTERVAL_SECS,
            ),
        }
    }

    /// Logical id to endpoint pairs for the resolver
    pub fn endpoints(&self) -> impl Iterator<Item = (String, Endpoint)> + '_ {
        self.devices
            .iter()
            .map(|d| (d.id.clone(), d.endpoint.clone()))
    }
}
