//! Error types for hevcore

use thiserror::Error;

/// Result type alias for hevcore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hevcore
#[derive(Error, Debug)]
pub enum Error {
    /// Codec error
    #[error("Codec error: {0}")]
    Codec(String),

    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create a codec error
    pub fn codec<S: Into<String>>(msg: S) -> Self {
        Error::Codec(msg.into())
    }

    /// Create an initialization error
    pub fn init<S: Into<String>>(msg: S) -> Self {
        Error::Init(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::codec("bad transform size");
        assert_eq!(err.to_string(), "Codec error: bad transform size");

        let err = Error::init("scratch buffers");
        assert_eq!(err.to_string(), "Initialization error: scratch buffers");
    }

    #[test]
    fn test_error_helpers() {
        assert!(matches!(Error::codec("x"), Error::Codec(_)));
        assert!(matches!(Error::invalid_input("x"), Error::InvalidInput(_)));
    }
}
