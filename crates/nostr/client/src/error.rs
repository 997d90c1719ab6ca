//! Client error types

use thiserror::Error;

/// Client error type
///
/// Only construction can fail. Once a session or relay set exists, transport
/// trouble is recovered internally and surfaces through
/// [`ConnectionState`](crate::ConnectionState) instead of as an error.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Constructed outside of a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
