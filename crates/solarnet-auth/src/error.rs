//! Error types for `SNWS2` request signing.

/// Errors that can occur while building or verifying `SNWS2` authorization.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A signing operation required a saved signing key but none was saved.
    #[error("No signing key saved; call save_signing_key() or set_signing_key() first")]
    MissingSigningKey,

    /// A content digest was not valid hex.
    #[error("Invalid content digest: {0}")]
    InvalidDigest(String),

    /// A URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A header name or value could not be used in an HTTP request.
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader {
        /// The header name.
        name: String,
        /// Why the header was rejected.
        reason: String,
    },

    /// The `Authorization` header is missing from the request.
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    /// The `Authorization` header could not be parsed.
    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    /// The credential token ID is not known to the verifier.
    #[error("Unknown security token: {0}")]
    UnknownToken(String),

    /// The signed date header could not be parsed as an HTTP date.
    #[error("Invalid request date: {0}")]
    InvalidDate(String),

    /// The authorization scheme is not supported (only `SNWS2` is).
    #[error("Unsupported authorization scheme: {0}")]
    UnsupportedScheme(String),

    /// A header listed in `SignedHeaders` is missing from the request.
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// The computed signature does not match the provided signature.
    #[error("Signature does not match")]
    SignatureDoesNotMatch,
}

/// Convenience result type for signing operations.
pub type AuthResult<T> = Result<T, AuthError>;
