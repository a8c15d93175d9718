//! Error types for `relaytun` core library.

use thiserror::Error;

/// Result type alias using `relaytun` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `relaytun` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
