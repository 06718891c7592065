//! # Error Handling
//!
//! Error types for the vaultline engine, defined with `thiserror`.
//! The taxonomy mirrors the user-visible failure classes: conflicts,
//! missing entities, authorization denials, domain-rule violations
//! (with a structured header/body explanation), decryption failures,
//! and defensive internal errors.

mod types;

pub use types::{Result, VaultlineError};
