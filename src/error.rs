use thiserror::Error;

/// The error type for netpool operations.
///
/// Only construction-time failures surface as errors: once the pool is
/// running, everything observable by the application arrives through the
/// [`PoolCallback`](crate::PoolCallback) trait on the loop thread. A failed
/// send becomes a `dropped` upcall, a refused connect becomes
/// `connection_status(node, false)`, and so on.
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // I/O and Networking Errors
    // ============================================================================

    /// Low-level I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The provided address could not be parsed or resolved.
    #[error("Invalid socket address '{0}'")]
    InvalidAddress(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================

    /// Configuration file parsing or key lookup failed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
