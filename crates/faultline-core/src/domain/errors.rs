//! Domain error types

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Id is empty, too long, or contains characters unsafe for file names
    #[error("Invalid artifact id: {0}")]
    InvalidArtifactId(String),

    /// DSN string does not match `https://KEY@HOST/PROJECT`
    #[error("Invalid DSN: {0}")]
    InvalidDsn(String),
}
