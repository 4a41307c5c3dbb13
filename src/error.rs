//! Error types for the acquisition layer

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error from the remote service collaborator
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors produced by the transport collaborator
///
/// Both variants abort a fetch Task identically; consumers only ever observe
/// `done(false)`. Drift between local and server projections is not an error
/// and has no variant here.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network or IO failure while talking to the service
    #[error("Network failure: {0}")]
    Network(String),

    /// Payload arrived but could not be interpreted
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;
