//! Error types for the vaultline engine.

/// Custom result type for vaultline operations
pub type Result<T> = std::result::Result<T, VaultlineError>;

/// Main error type for the vaultline engine
#[derive(thiserror::Error, Debug)]
pub enum VaultlineError {
    /// Resource conflict errors (e.g., a name already exists)
    #[error("Conflict: {message}")]
    Conflict { message: String, resource_type: String },

    /// Resource not found, or a required field the row claims to carry is
    /// actually absent (data-integrity fault)
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Authorization failure (owned by the authz collaborator)
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Domain-rule violation with a structured explanation. `header` is the
    /// short classification, `body` carries detail (including third-party
    /// error text for live validation failures).
    #[error("{header}: {body}")]
    BadRequest { header: String, body: String },

    /// Decryption of malformed or wrong-key ciphertext
    #[error("Decryption failed: {message}")]
    Decryption { message: String },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal errors (unreachable/defensive branches)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl VaultlineError {
    /// Create a conflict error
    pub fn conflict<M: Into<String>, R: Into<String>>(message: M, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Create a forbidden error
    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::Forbidden { message: message.into() }
    }

    /// Create a bad request error with a structured header/body explanation
    pub fn bad_request<H: Into<String>, B: Into<String>>(header: H, body: B) -> Self {
        Self::BadRequest { header: header.into(), body: body.into() }
    }

    /// Create a decryption error
    pub fn decryption<S: Into<String>>(message: S) -> Self {
        Self::Decryption { message: message.into() }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self {
            VaultlineError::Conflict { .. } => 409,
            VaultlineError::NotFound { .. } => 404,
            VaultlineError::Forbidden { .. } => 403,
            VaultlineError::BadRequest { .. } => 400,
            VaultlineError::Decryption { .. } => 400,
            VaultlineError::Database { .. } => 500,
            VaultlineError::Serialization { .. } => 500,
            VaultlineError::Config { .. } => 500,
            VaultlineError::Internal { .. } => 500,
        }
    }
}

impl From<sqlx::Error> for VaultlineError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<serde_json::Error> for VaultlineError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = VaultlineError::conflict("Secret 'db-url' already exists", "config_item");
        assert!(matches!(error, VaultlineError::Conflict { .. }));
        assert_eq!(error.to_string(), "Conflict: Secret 'db-url' already exists");
    }

    #[test]
    fn test_bad_request_carries_header_and_body() {
        let error = VaultlineError::bad_request(
            "Invalid metadata",
            "Missing metadata parameter webhookUrl",
        );
        assert_eq!(
            error.to_string(),
            "Invalid metadata: Missing metadata parameter webhookUrl"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(VaultlineError::conflict("test", "item").status_code(), 409);
        assert_eq!(VaultlineError::not_found("test").status_code(), 404);
        assert_eq!(VaultlineError::forbidden("test").status_code(), 403);
        assert_eq!(VaultlineError::bad_request("test", "detail").status_code(), 400);
        assert_eq!(VaultlineError::decryption("test").status_code(), 400);
        assert_eq!(VaultlineError::internal("test").status_code(), 500);
    }

    #[test]
    fn test_error_conversions() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: VaultlineError = json_error.into();
        assert!(matches!(error, VaultlineError::Serialization { .. }));
    }
}
