//! Error types for the SolarNetwork core.

/// Core error type for SolarNetwork client infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum SolarNetError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An environment could not be derived from a URL.
    #[error("invalid environment URL: {0}")]
    InvalidEnvironment(String),

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for SolarNetwork core operations.
pub type SolarNetResult<T> = Result<T, SolarNetError>;
