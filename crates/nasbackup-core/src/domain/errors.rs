//! Domain error types
//!
//! Validation failures raised while constructing domain values.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid remote ID format
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// A changed path does not live under the root it was reported for
    #[error("Path {path} is not under root {root}")]
    PathOutsideRoot {
        /// The reported path
        path: String,
        /// The watched root
        root: String,
    },

    /// Local path stored in directory metadata is not absolute
    #[error("Local path must be absolute: {0}")]
    RelativeLocalPath(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
