//! Error types for SolarNetwork API calls and control toggling.

use solarnet_auth::AuthError;
use solarnet_core::response::describe_error;

/// Errors from SolarNetwork API calls.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// No saved signing key, or the saved key has expired.
    #[error("No valid signing key configured")]
    SigningKeyNotConfigured,

    /// The request could not be signed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The HTTP exchange itself failed.
    #[error("HTTP error calling {url}: {source}")]
    Transport {
        /// The requested URL.
        url: String,
        /// The underlying transport error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The server returned a non-2xx status.
    #[error("{url} returned {status}: {message}")]
    Status {
        /// The requested URL.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The envelope message, or the HTTP status text.
        message: String,
    },

    /// The server answered with `success: false`.
    #[error("{}", describe_error(.message, .code.as_deref()))]
    Api {
        /// The envelope message.
        message: String,
        /// The envelope error code, if any.
        code: Option<String>,
    },

    /// The response body was not the expected JSON.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        /// The requested URL.
        url: String,
        /// The JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A request header could not be built.
    #[error("Invalid header {0}")]
    InvalidHeader(String),
}

/// Convenience result type for API and toggler operations.
pub type ControlResult<T> = Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_append_code_to_api_message() {
        let err = ControlError::Api {
            message: "Access denied".to_owned(),
            code: Some("SEC.001".to_owned()),
        };
        assert_eq!(err.to_string(), "Access denied (SEC.001)");

        let err = ControlError::Api {
            message: "Oops".to_owned(),
            code: None,
        };
        assert_eq!(err.to_string(), "Oops");
    }

    #[test]
    fn test_should_describe_status_error() {
        let err = ControlError::Status {
            url: "http://localhost/x".to_owned(),
            status: 403,
            message: "Forbidden".to_owned(),
        };
        assert_eq!(err.to_string(), "http://localhost/x returned 403: Forbidden");
    }
}
