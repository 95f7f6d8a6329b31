//! Server-side `SNWS2` signature verification.
//!
//! The verification flow mirrors signing:
//!
//! 1. Parse the `Authorization` header into credential, signed header names
//!    and signature.
//! 2. Look up the token secret for the credential.
//! 3. Reconstruct the canonical request from the HTTP request parts, using
//!    exactly the signed header names the client listed.
//! 4. Derive the signing key for the request date and compare signatures in
//!    constant time.

use chrono::{DateTime, Utc};
use http::request::Parts;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::builder::RequestDescriptor;
use crate::canonical::{DATE, X_SN_DATE};
use crate::error::{AuthError, AuthResult};
use crate::signing::{SCHEME, compute_signature, compute_signature_data, compute_signing_key};

/// Components of an `SNWS2` `Authorization` header.
///
/// ```text
/// SNWS2 Credential=<token>,SignedHeaders=date;host,Signature=<hex-signature>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuthorization {
    /// The security token ID.
    pub token_id: String,
    /// The signed header names, lower-case and sorted.
    pub signed_headers: Vec<String>,
    /// The hex-encoded signature.
    pub signature: String,
}

/// Parse an `SNWS2` `Authorization` header value.
///
/// # Examples
///
/// ```
/// use solarnet_auth::verify::parse_authorization_header;
///
/// let parsed = parse_authorization_header(
///     "SNWS2 Credential=abc,SignedHeaders=date;host,Signature=0123",
/// )
/// .unwrap();
/// assert_eq!(parsed.token_id, "abc");
/// assert_eq!(parsed.signed_headers, vec!["date", "host"]);
/// ```
pub fn parse_authorization_header(header: &str) -> AuthResult<ParsedAuthorization> {
    let (scheme, rest) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::InvalidAuthHeader)?;
    if scheme != SCHEME {
        return Err(AuthError::UnsupportedScheme(scheme.to_owned()));
    }

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in rest.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("Credential=") {
            credential = Some(value);
        } else if let Some(value) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(value);
        } else if let Some(value) = part.strip_prefix("Signature=") {
            signature = Some(value);
        }
    }

    let credential = credential
        .filter(|c| !c.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)?;
    let signed_headers = signed_headers.ok_or(AuthError::InvalidAuthHeader)?;
    let signature = signature
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)?;

    Ok(ParsedAuthorization {
        token_id: credential.to_owned(),
        signed_headers: signed_headers
            .split(';')
            .filter(|n| !n.is_empty())
            .map(str::to_ascii_lowercase)
            .collect(),
        signature: signature.to_owned(),
    })
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> AuthResult<&'a str> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| AuthError::MissingHeader(name.to_owned()))?
        .to_str()
        .map_err(|e| AuthError::InvalidHeader {
            name: name.to_owned(),
            reason: e.to_string(),
        })
}

fn request_date(parts: &Parts, signed_headers: &[String]) -> AuthResult<DateTime<Utc>> {
    let name = if signed_headers.iter().any(|n| n == X_SN_DATE) {
        X_SN_DATE
    } else {
        DATE
    };
    let value = header_str(parts, name)?;
    DateTime::parse_from_rfc2822(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| AuthError::InvalidDate(value.to_owned()))
}

/// Reconstruct the signable request from HTTP request parts.
fn descriptor_from_parts(
    parts: &Parts,
    signed_headers: &[String],
    date: DateTime<Utc>,
    content_sha256: Option<&[u8]>,
) -> AuthResult<RequestDescriptor> {
    let env = solarnet_core::Environment::default();
    let mut request = RequestDescriptor::new(&env);
    request
        .method(parts.method.clone())
        .path(parts.uri.path())
        .date(date)
        .headers(&parts.headers);
    if !parts.headers.contains_key(http::header::HOST) {
        if let Some(authority) = parts.uri.authority() {
            request.host(authority.as_str())?;
        }
    }
    if let Some(query) = parts.uri.query() {
        request.query_params(form_urlencoded::parse(query.as_bytes()));
    }
    for name in signed_headers {
        if name != DATE && name != X_SN_DATE && !parts.headers.contains_key(name.as_str()) {
            return Err(AuthError::MissingHeader(name.clone()));
        }
        request.sign_header(name.clone());
    }
    if let Some(digest) = content_sha256 {
        request.content_sha256(digest.to_vec());
    }
    Ok(request)
}

/// Verify the `SNWS2` signature of an incoming request.
///
/// `secret_for` maps a token ID to its secret. `content_sha256` is the SHA-256
/// of the request body, or `None` for an empty body.
///
/// Clock skew is not checked; callers should compare the returned request
/// date with their own clock.
///
/// # Errors
///
/// Returns an [`AuthError`] describing the first verification step that failed.
pub fn verify_authorization<F>(
    parts: &Parts,
    content_sha256: Option<&[u8]>,
    secret_for: F,
) -> AuthResult<(ParsedAuthorization, DateTime<Utc>)>
where
    F: Fn(&str) -> Option<String>,
{
    let header = header_str(parts, "authorization").map_err(|e| match e {
        AuthError::MissingHeader(_) => AuthError::MissingAuthHeader,
        other => other,
    })?;
    let parsed = parse_authorization_header(header)?;
    let secret = secret_for(&parsed.token_id)
        .ok_or_else(|| AuthError::UnknownToken(parsed.token_id.clone()))?;

    let date = request_date(parts, &parsed.signed_headers)?;
    let request = descriptor_from_parts(parts, &parsed.signed_headers, date, content_sha256)?;

    let canonical_request = request.canonical_request_for(&parsed.signed_headers);
    debug!(canonical_request, "Reconstructed SNWS2 canonical request");

    let signature_data = compute_signature_data(&canonical_request, &date);
    let key = compute_signing_key(&secret, &date);
    let expected = compute_signature(&key, &signature_data);

    if parsed.signature.as_bytes().ct_eq(expected.as_bytes()).into() {
        debug!(token_id = %parsed.token_id, "SNWS2 signature verification succeeded");
        Ok((parsed, date))
    } else {
        debug!(
            expected = %expected,
            provided = %parsed.signature,
            "SNWS2 signature mismatch"
        );
        Err(AuthError::SignatureDoesNotMatch)
    }
}
