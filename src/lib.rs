//! # Vaultline
//!
//! Vaultline is a secret versioning and distribution engine: it stores
//! encrypted secrets and plain variables per project and environment, keeps
//! an append-only version history with rollback, rotates secrets on a
//! schedule, and pushes every change to live subscribers and to third-party
//! integrations (Discord, Slack, Vercel, AWS Lambda).
//!
//! ## Architecture
//!
//! ```text
//! Secret/Variable Engine → Version Store → Change Notification Channel
//!          ↓                     ↓                    ↓
//!   Crypto Provider      Persistence Layer   Integration Dispatch
//!                                                    ↓
//!                                      Plugins + Run Ledger + Reconciler
//! ```
//!
//! ## Core Components
//!
//! - **Secret/Variable Engine**: orchestrates create/update/rollback/delete
//!   and scheduled rotation with per-environment version numbering
//! - **Crypto Provider**: project-scoped hybrid asymmetric encryption for
//!   values, server-wide symmetric encryption for integration metadata
//! - **Integration Layer**: pluggable external targets with a persistent
//!   run ledger and a background cleanup reconciler
//! - **Persistence Layer**: SQLx with SQLite for all durable state

pub mod config;
pub mod crypto;
pub mod domain;
pub mod errors;
pub mod integrations;
pub mod notify;
pub mod observability;
pub mod services;
pub mod storage;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use errors::{Result, VaultlineError};
pub use observability::init_tracing;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
