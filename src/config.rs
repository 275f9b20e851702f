//! Configuration management for Palisade.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Main configuration for the Palisade service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PalisadeConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

impl Default for PalisadeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rate_limiting: RateLimitingConfig::default(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP listener address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Maximum request payload bytes read (and discarded) on the allow path
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Read timeout for the request payload, in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Delay before closing each connection, in milliseconds
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_request_bytes: default_max_request_bytes(),
            read_timeout_ms: default_read_timeout_ms(),
            response_delay_ms: default_response_delay_ms(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_max_request_bytes() -> usize {
    1024
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_response_delay_ms() -> u64 {
    50
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum requests admitted per client per window
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Fixed window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Inactivity TTL in seconds before a client record is evicted
    #[serde(default = "default_cleanup_ttl_secs")]
    pub cleanup_ttl_secs: u64,

    /// Number of requests between eviction sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Hard cap on tracked client records; 0 disables the cap
    #[serde(default = "default_max_tracked_clients")]
    pub max_tracked_clients: usize,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_secs: default_window_secs(),
            cleanup_ttl_secs: default_cleanup_ttl_secs(),
            cleanup_interval: default_cleanup_interval(),
            max_tracked_clients: default_max_tracked_clients(),
        }
    }
}

fn default_limit() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_cleanup_ttl_secs() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    30
}

fn default_max_tracked_clients() -> usize {
    10000
}

impl PalisadeConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: PalisadeConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::PalisadeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check configuration values that would make the limiter degenerate.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.rate_limiting.window_secs == 0 {
            return Err(crate::error::PalisadeError::Config(
                "window_secs must be greater than zero".to_string(),
            ));
        }
        if self.rate_limiting.cleanup_interval == 0 {
            return Err(crate::error::PalisadeError::Config(
                "cleanup_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
