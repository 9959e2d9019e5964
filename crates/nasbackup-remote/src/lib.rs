//! NAS Backup Remote - HTTP client for the NAS drive API
//!
//! Provides:
//! - A bearer-authenticated JSON client for the NAS REST endpoints
//! - [`provider::HttpRemoteDrive`], the `IRemoteDrive` adapter used by the daemon
//!
//! ## Modules
//!
//! - [`client`] - request construction and status mapping
//! - [`provider`] - drive, directory and upload operations

pub mod client;
pub mod provider;

use thiserror::Error;

/// Errors that can occur when talking to the NAS
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The configured base URL cannot carry API paths
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// The token is missing, invalid or expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The requested drive or entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The entry already exists or was modified concurrently
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other non-success status
    #[error("Server error ({status}): {body}")]
    ServerError { status: u16, body: String },

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}
