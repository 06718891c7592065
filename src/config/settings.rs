//! Configuration settings for the vaultline engine.
//!
//! All settings are loaded from `VAULTLINE_*` environment variables.
//! The server master key must be a base64-encoded 32-byte value
//! (generate one with `openssl rand -base64 32`).

use crate::errors::{Result, VaultlineError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub crypto: CryptoConfig,
    pub rotation: RotationConfig,
    pub reconciler: ReconcilerConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database: DatabaseConfig::from_env()?,
            crypto: CryptoConfig::from_env()?,
            rotation: RotationConfig::from_env()?,
            reconciler: ReconcilerConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(VaultlineError::config("Database URL must start with 'sqlite:'"));
        }
        if self.database.max_connections == 0 {
            return Err(VaultlineError::config("Database max_connections must be at least 1"));
        }
        if self.rotation.sweep_interval_secs == 0 {
            return Err(VaultlineError::config("Rotation sweep interval must be non-zero"));
        }
        if self.reconciler.interval_secs == 0 {
            return Err(VaultlineError::config("Reconciler interval must be non-zero"));
        }
        Ok(())
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Connection acquire timeout in seconds
    pub connect_timeout_secs: u64,
    /// Run embedded migrations on startup
    pub auto_migrate: bool,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("VAULTLINE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://vaultline.db".to_string());
        let max_connections = parse_env("VAULTLINE_DATABASE_MAX_CONNECTIONS", 10)?;
        let connect_timeout_secs = parse_env("VAULTLINE_DATABASE_CONNECT_TIMEOUT_SECS", 30)?;
        let auto_migrate = std::env::var("VAULTLINE_DATABASE_AUTO_MIGRATE")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        Ok(Self { url, max_connections, connect_timeout_secs, auto_migrate })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://vaultline.db".to_string(),
            max_connections: 10,
            connect_timeout_secs: 30,
            auto_migrate: true,
        }
    }
}

/// Server-wide crypto configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Base64-encoded 32-byte master key for symmetric metadata encryption
    pub server_key_base64: String,
}

impl CryptoConfig {
    pub fn from_env() -> Result<Self> {
        let server_key_base64 = std::env::var("VAULTLINE_SERVER_KEY").map_err(|_| {
            VaultlineError::config(
                "VAULTLINE_SERVER_KEY environment variable not set. \
                 Generate a key with: openssl rand -base64 32",
            )
        })?;
        Ok(Self { server_key_base64 })
    }
}

/// Rotation scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Seconds between rotation sweeps
    pub sweep_interval_secs: u64,
    /// Maximum items rotated concurrently within one sweep
    pub max_concurrency: usize,
}

impl RotationConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            sweep_interval_secs: parse_env("VAULTLINE_ROTATION_SWEEP_INTERVAL_SECS", 3600)?,
            max_concurrency: parse_env("VAULTLINE_ROTATION_MAX_CONCURRENCY", 8)?,
        })
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { sweep_interval_secs: 3600, max_concurrency: 8 }
    }
}

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Seconds between reconciliation passes
    pub interval_secs: u64,
}

impl ReconcilerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self { interval_secs: parse_env("VAULTLINE_RECONCILER_INTERVAL_SECS", 300)? })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| VaultlineError::config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite://vaultline.db");
        assert_eq!(config.max_connections, 10);
        assert!(config.auto_migrate);
    }

    #[test]
    fn test_validate_rejects_non_sqlite_url() {
        let config = AppConfig {
            database: DatabaseConfig { url: "postgres://x".to_string(), ..Default::default() },
            crypto: CryptoConfig { server_key_base64: "AAAA".to_string() },
            rotation: RotationConfig::default(),
            reconciler: ReconcilerConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let config = AppConfig {
            database: DatabaseConfig::default(),
            crypto: CryptoConfig { server_key_base64: "AAAA".to_string() },
            rotation: RotationConfig { sweep_interval_secs: 0, max_concurrency: 8 },
            reconciler: ReconcilerConfig::default(),
        };
        assert!(config.validate().is_err());
    }
}
