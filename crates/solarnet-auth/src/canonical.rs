//! Canonical request construction for SolarNetwork `SNWS2` signatures.
//!
//! The canonical request is six newline-separated sections:
//!
//! ```text
//! HTTPRequestMethod\n
//! RequestPath\n
//! CanonicalQueryString\n
//! CanonicalHeaders               (each line "name:value\n")
//! SignedHeaders\n
//! ContentSHA256
//! ```
//!
//! Unlike SigV4 there is no blank line between the headers block and the
//! signed header names: the headers block is already newline-terminated.
//! Every function here is pure; the request state lives in
//! [`RequestDescriptor`](crate::builder::RequestDescriptor).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use http::HeaderMap;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::signing::{EMPTY_STRING_SHA256_HEX, format_http_date};

/// Characters percent-encoded in query keys and values.
///
/// Everything except the RFC 3986 unreserved characters (A-Z, a-z, 0-9,
/// `-`, `_`, `.`, `~`). This is standard URI component encoding with
/// `!`, `'`, `(`, `)` and `*` escaped as well.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// `Host` header name, lower-case.
pub const HOST: &str = "host";
/// `Date` header name, lower-case.
pub const DATE: &str = "date";
/// `X-SN-Date` header name, lower-case.
pub const X_SN_DATE: &str = "x-sn-date";
/// `Content-MD5` header name, lower-case.
pub const CONTENT_MD5: &str = "content-md5";
/// `Content-Type` header name, lower-case.
pub const CONTENT_TYPE: &str = "content-type";
/// `Digest` header name, lower-case.
pub const DIGEST: &str = "digest";

/// Build the full canonical request string from its components.
///
/// `canonical_headers` must already be newline-terminated per line, as
/// produced by [`build_canonical_headers`].
///
/// # Examples
///
/// ```
/// use solarnet_auth::canonical::build_canonical_request;
///
/// let canonical = build_canonical_request(
///     "GET",
///     "/solarquery/api/v1/pub/datum/list",
///     "",
///     "date:Wed, 10 Jan 2024 15:30:00 GMT\nhost:localhost\n",
///     &["date".to_owned(), "host".to_owned()],
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
/// );
/// assert!(canonical.starts_with("GET\n/solarquery/api/v1/pub/datum/list\n\n"));
/// assert!(canonical.contains("host:localhost\ndate;host\n"));
/// ```
#[must_use]
pub fn build_canonical_request(
    method: &str,
    path: &str,
    canonical_query: &str,
    canonical_headers: &str,
    signed_headers: &[String],
    content_sha256: &str,
) -> String {
    let signed_headers_str = build_signed_headers_string(signed_headers);
    format!(
        "{method}\n{path}\n{canonical_query}\n{canonical_headers}{signed_headers_str}\n{content_sha256}"
    )
}

/// Build the canonical query string.
///
/// Keys are visited in lexicographic (byte-wise) order, which a `BTreeMap`
/// of `String` keys already guarantees. Each key emits all of its values in
/// insertion order as `key=value` pairs, joined with `&`. Keys and values
/// are percent-encoded with [`uri_encode`].
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
///
/// use solarnet_auth::canonical::build_canonical_query_string;
///
/// let mut params = BTreeMap::new();
/// params.insert("b".to_owned(), vec!["2".to_owned()]);
/// params.insert("a".to_owned(), vec!["1".to_owned(), "3".to_owned()]);
/// assert_eq!(build_canonical_query_string(&params), "a=1&a=3&b=2");
/// ```
#[must_use]
pub fn build_canonical_query_string(params: &BTreeMap<String, Vec<String>>) -> String {
    params
        .iter()
        .flat_map(|(key, values)| {
            let key = uri_encode(key);
            values
                .iter()
                .map(move |value| format!("{key}={}", uri_encode(value)))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the canonical headers block.
///
/// `signed_headers` must be lower-case and sorted, as produced by
/// [`build_canonical_header_names`]. Each header emits `name:value\n` with
/// the header's first value trimmed; a header that is absent emits an empty
/// value. The `date` and `x-sn-date` headers always use `request_date`
/// formatted as an HTTP date, whatever the header map holds.
#[must_use]
pub fn build_canonical_headers(
    headers: &HeaderMap,
    signed_headers: &[String],
    request_date: &DateTime<Utc>,
) -> String {
    let mut result = String::new();
    for name in signed_headers {
        result.push_str(name);
        result.push(':');
        if name == DATE || name == X_SN_DATE {
            result.push_str(&format_http_date(request_date));
        } else if let Some(value) = headers.get(name.as_str()) {
            result.push_str(String::from_utf8_lossy(value.as_bytes()).trim());
        }
        result.push('\n');
    }
    result
}

/// Compute the minimal set of header names to sign.
///
/// Always `host`; then `x-sn-date` when `use_sn_date` is set, otherwise
/// `date`; then `content-md5`, `content-type` and `digest` only when present
/// in `headers`; then every name in `additional`. The result is lower-case,
/// sorted and free of duplicates.
///
/// # Examples
///
/// ```
/// use http::HeaderMap;
///
/// use solarnet_auth::canonical::build_canonical_header_names;
///
/// let names = build_canonical_header_names(&HeaderMap::new(), false, &[]);
/// assert_eq!(names, vec!["date", "host"]);
/// ```
#[must_use]
pub fn build_canonical_header_names(
    headers: &HeaderMap,
    use_sn_date: bool,
    additional: &[String],
) -> Vec<String> {
    let mut names: BTreeSet<String> = BTreeSet::new();
    names.insert(HOST.to_owned());
    names.insert(if use_sn_date { X_SN_DATE } else { DATE }.to_owned());
    for optional in [CONTENT_MD5, CONTENT_TYPE, DIGEST] {
        if headers.contains_key(optional) {
            names.insert(optional.to_owned());
        }
    }
    names.extend(additional.iter().map(|name| name.to_ascii_lowercase()));
    names.into_iter().collect()
}

/// Build the signed headers string as a semicolon-separated list.
///
/// The names are expected to be lower-case and sorted already.
#[must_use]
pub fn build_signed_headers_string(signed_headers: &[String]) -> String {
    signed_headers.join(";")
}

/// Hex-encoded content digest, or the SHA-256 of the empty string when no
/// digest is configured.
#[must_use]
pub fn canonical_content_sha256(digest: Option<&[u8]>) -> String {
    digest.map_or_else(|| EMPTY_STRING_SHA256_HEX.to_owned(), hex::encode)
}

/// Percent-encode a query key or value using the strict encoding rules.
///
/// Hex digits are always upper-case.
///
/// # Examples
///
/// ```
/// use solarnet_auth::canonical::uri_encode;
///
/// assert_eq!(uri_encode("a b"), "a%20b");
/// assert_eq!(uri_encode("it's (really) *fine*!"), "it%27s%20%28really%29%20%2Afine%2A%21");
/// assert_eq!(uri_encode("-_.~"), "-_.~");
/// ```
#[must_use]
pub fn uri_encode(input: &str) -> String {
    utf8_percent_encode(input, QUERY_ENCODE_SET).to_string()
}
