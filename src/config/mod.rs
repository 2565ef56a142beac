//! Configuration management for the NodeDash engine
//!
//! Handles server configuration, database connection, engine time/resource
//! budgets and the maintenance API key. Every value can be overridden through
//! environment variables for container deployment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Flow execution budgets
    pub engine: EngineConfig,
    /// Maintenance endpoint settings
    pub maintenance: MaintenanceConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration for entity and history storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL (default: "sqlite://data/nodedash.db")
    pub url: String,
}

/// Time and resource budgets applied to every flow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget for a single function script
    pub function_timeout_ms: u64,
    /// Lua allocator limit for a single function script, in bytes
    pub function_memory_limit: usize,
    /// Default timeout for an HTTP request or MQTT publish
    pub integration_timeout_ms: u64,
    /// Maximum stored size of an HTTP response body, in bytes
    pub response_body_limit: usize,
    /// Maximum number of nodes a single path may visit
    pub max_path_depth: usize,
    /// Timeout for a single history write
    pub history_write_timeout_ms: u64,
    /// Records queued for the history writer before new ones are dropped
    pub history_queue_capacity: usize,
}

/// Settings for the history cleanup endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Key expected in the X-API-Key header; the endpoint is closed when unset
    pub api_key: Option<String>,
}

impl EngineConfig {
    pub fn function_timeout(&self) -> Duration {
        Duration::from_millis(self.function_timeout_ms)
    }

    pub fn integration_timeout(&self) -> Duration {
        Duration::from_millis(self.integration_timeout_ms)
    }

    pub fn history_write_timeout(&self) -> Duration {
        Duration::from_millis(self.history_write_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            function_timeout_ms: env_or("NODEDASH_FUNCTION_TIMEOUT_MS", 2_000),
            function_memory_limit: env_or("NODEDASH_FUNCTION_MEMORY_LIMIT", 16 * 1024 * 1024),
            integration_timeout_ms: env_or("NODEDASH_INTEGRATION_TIMEOUT_MS", 10_000),
            response_body_limit: env_or("NODEDASH_RESPONSE_BODY_LIMIT", 4_096),
            max_path_depth: env_or("NODEDASH_MAX_PATH_DEPTH", 64),
            history_write_timeout_ms: env_or("NODEDASH_HISTORY_WRITE_TIMEOUT_MS", 5_000),
            history_queue_capacity: env_or("NODEDASH_HISTORY_QUEUE_CAPACITY", 10_000),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("NODEDASH_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("NODEDASH_PORT", 8001),
            },
            database: DatabaseConfig {
                url: std::env::var("NODEDASH_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/nodedash.db".to_string()),
            },
            engine: EngineConfig::default(),
            maintenance: MaintenanceConfig {
                api_key: std::env::var("NODEDASH_MAINTENANCE_API_KEY")
                    .ok()
                    .filter(|key| !key.is_empty()),
            },
        }
    }
}

/// Read a numeric environment variable, falling back when unset or unparseable
fn env_or<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(fallback)
}
