//! Error types for shmkv
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using ShmkvError
pub type Result<T> = std::result::Result<T, ShmkvError>;

/// Unified error type for shmkv operations
#[derive(Debug, Error)]
pub enum ShmkvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Parameter Errors (detected before any mutation)
    // -------------------------------------------------------------------------
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // -------------------------------------------------------------------------
    // Resource Exhaustion (never triggers implicit region growth)
    // -------------------------------------------------------------------------
    #[error("{pool} pool exhausted")]
    PoolExhausted { pool: &'static str },

    // -------------------------------------------------------------------------
    // Structural Errors
    // -------------------------------------------------------------------------
    #[error("Region corruption detected: {0}")]
    Corruption(String),

    #[error("Incompatible region: {0}")]
    IncompatibleRegion(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Lock error: {0}")]
    Lock(String),
}

/// Coarse classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input; nothing was mutated
    Parameter,
    /// No free element node or page
    Exhausted,
    /// Wrong on-disk version, inconsistent lengths, broken links
    Corruption,
    /// Advisory lock acquisition failed at the OS level
    Lock,
    /// Underlying file or mapping I/O
    Io,
}

impl ShmkvError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            ShmkvError::Io(_) => ErrorCategory::Io,
            ShmkvError::InvalidParameter(_) | ShmkvError::Config(_) => ErrorCategory::Parameter,
            ShmkvError::PoolExhausted { .. } => ErrorCategory::Exhausted,
            ShmkvError::Corruption(_) | ShmkvError::IncompatibleRegion(_) => {
                ErrorCategory::Corruption
            }
            ShmkvError::Lock(_) => ErrorCategory::Lock,
        }
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        ShmkvError::Corruption(msg.into())
    }

    pub(crate) fn param(msg: impl Into<String>) -> Self {
        ShmkvError::InvalidParameter(msg.into())
    }
}
