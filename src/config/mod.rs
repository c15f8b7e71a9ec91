/// Configuration management for the flowlite engine
///
/// Handles server configuration, database location, and script runner limits.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Name of the sandbox executable built alongside the server
pub const SANDBOX_BIN_NAME: &str = "flowlite-sandbox";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Execution engine configuration
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// SQLite location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory created at startup to hold the database file (default: "data")
    pub data_dir: String,
    /// sqlx connection URL (default: sqlite://{data_dir}/flowlite.db)
    pub url: String,
}

/// Code node limits and sandbox location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget per Code node run
    pub code_timeout_ms: u64,
    /// Lua heap limit in bytes
    pub script_memory_limit: usize,
    /// Explicit sandbox executable; resolved next to the server binary when unset
    pub sandbox_program: Option<String>,
}

impl EngineConfig {
    pub fn code_timeout(&self) -> Duration {
        Duration::from_millis(self.code_timeout_ms)
    }

    /// Path of the sandbox executable to spawn
    pub fn sandbox_program(&self) -> PathBuf {
        if let Some(program) = &self.sandbox_program {
            return PathBuf::from(program);
        }

        let file_name = format!("{}{}", SANDBOX_BIN_NAME, std::env::consts::EXE_SUFFIX);
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
            .filter(|candidate| candidate.exists())
            .unwrap_or_else(|| PathBuf::from(file_name))
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let data_dir = std::env::var("FLOWLITE_DATA_DIR").unwrap_or_else(|_| "data".to_string());
        let url = std::env::var("FLOWLITE_DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/flowlite.db", data_dir));

        Self {
            server: ServerConfig {
                host: std::env::var("FLOWLITE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("FLOWLITE_PORT", 3004),
            },
            database: DatabaseConfig { data_dir, url },
            engine: EngineConfig {
                code_timeout_ms: env_or("FLOWLITE_CODE_TIMEOUT_MS", 2000),
                script_memory_limit: env_or(
                    "FLOWLITE_SCRIPT_MEMORY_LIMIT",
                    crate::runtime::sandbox::DEFAULT_MEMORY_LIMIT,
                ),
                sandbox_program: std::env::var("FLOWLITE_SANDBOX_BIN").ok(),
            },
        }
    }
}
