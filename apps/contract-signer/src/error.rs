//! Error types for the contract signer.
//!
//! Every error carries a stable error code and maps to a process exit
//! status, so the binary can report failures without string matching.

use std::path::PathBuf;

use thiserror::Error;

/// Contract signer error type.
#[derive(Error, Debug)]
pub enum ContractError {
    // Keystore errors
    #[error("Keystore not found: {}", .0.display())]
    KeystoreNotFound(PathBuf),

    #[error("Keystore decryption failed: {0}")]
    KeystoreDecryption(String),

    #[error("Keystore is missing required material: {0}")]
    KeystoreIncomplete(String),

    // Template and manifest errors
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("Manifest corrupt at {}: {reason}", path.display())]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("Unsupported manifest schema version: {0}")]
    UnsupportedSchemaVersion(u32),

    // Verification outcomes
    #[error("Invalid signature of {signer}: {reason}")]
    SignatureVerificationFailed { signer: String, reason: String },

    #[error("Template modified since {signer} signed it")]
    TemplateModified { signer: String },

    // Crypto errors
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    // Input validation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Concurrency errors
    #[error("Failed to lock manifest: {0}")]
    LockFailed(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ContractError {
    /// Get the error code for structured error output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::KeystoreNotFound(_) => "KEYSTORE_NOT_FOUND",
            Self::KeystoreDecryption(_) => "KEYSTORE_DECRYPTION_FAILED",
            Self::KeystoreIncomplete(_) => "KEYSTORE_INCOMPLETE",
            Self::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            Self::ManifestNotFound(_) => "MANIFEST_NOT_FOUND",
            Self::ManifestCorrupt { .. } => "MANIFEST_CORRUPT",
            Self::UnsupportedSchemaVersion(_) => "UNSUPPORTED_SCHEMA_VERSION",
            Self::SignatureVerificationFailed { .. } => "SIGNATURE_VERIFICATION_FAILED",
            Self::TemplateModified { .. } => "TEMPLATE_MODIFIED",
            Self::InvalidCertificate(_) => "INVALID_CERTIFICATE",
            Self::Signing(_) => "SIGNING_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::LockFailed(_) => "LOCK_FAILED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Deserialization(_) => "DESERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            // 1 - Verification outcomes
            Self::SignatureVerificationFailed { .. } | Self::TemplateModified { .. } => 1,

            // 2 - Caller errors
            Self::InvalidInput(_) | Self::Config(_) => 2,

            // 3 - Keystore errors
            Self::KeystoreDecryption(_) | Self::KeystoreIncomplete(_) => 3,

            // 4 - Missing files
            Self::KeystoreNotFound(_) | Self::TemplateNotFound(_) | Self::ManifestNotFound(_) => 4,

            // 5 - Manifest content errors
            Self::ManifestCorrupt { .. } | Self::UnsupportedSchemaVersion(_) => 5,

            // 10 - Everything else
            Self::InvalidCertificate(_)
            | Self::Signing(_)
            | Self::LockFailed(_)
            | Self::Storage(_)
            | Self::Serialization(_)
            | Self::Deserialization(_)
            | Self::Internal(_) => 10,
        }
    }

    /// Whether this error is an expected verification outcome rather than a fault.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            Self::SignatureVerificationFailed { .. } | Self::TemplateModified { .. }
        )
    }
}

// Conversion from common error types

impl From<std::io::Error> for ContractError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ContractError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<openssl::error::ErrorStack> for ContractError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Signing(err.to_string())
    }
}

impl From<redb::Error> for ContractError {
    fn from(err: redb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::DatabaseError> for ContractError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TableError> for ContractError {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for ContractError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for ContractError {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for ContractError {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias for contract signer operations.
pub type ContractResult<T> = Result<T, ContractError>;
