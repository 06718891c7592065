//! # Configuration Management
//!
//! Environment-driven configuration for the vaultline engine.

mod settings;

pub use settings::{AppConfig, CryptoConfig, DatabaseConfig, ReconcilerConfig, RotationConfig};
