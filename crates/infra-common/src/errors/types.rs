use thiserror::Error;

/// Result type for infrastructure operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by logging and configuration plumbing
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read or deserialized
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration document failed to parse
    #[error("Failed to parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    /// Logging could not be initialized or reconfigured
    #[error("Logging error: {0}")]
    Logging(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a parse error for a named source
    pub fn parse(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
