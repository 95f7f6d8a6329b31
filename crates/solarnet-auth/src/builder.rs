//! Stateful `SNWS2` authorization builder.
//!
//! [`AuthorizationV2Builder`] holds the long-lived signing state: the token
//! ID, the [`Environment`] that supplies the `Host` header, and optionally a
//! saved [`SigningKey`]. The per-request attributes live in a
//! [`RequestDescriptor`].
//!
//! Two usage styles are supported:
//!
//! - The builder owns a current descriptor. Configure it through the builder
//!   setters, sign with one of the `build*` methods, then [`reset`] it for the
//!   next request. The saved signing key survives a reset.
//! - Create an independent descriptor with [`request`], configure it, and sign
//!   it with [`sign_with_key`] or [`sign_with_saved_key`]. The builder is not
//!   mutated, so concurrent requests can share one builder.
//!
//! [`reset`]: AuthorizationV2Builder::reset
//! [`request`]: AuthorizationV2Builder::request
//! [`sign_with_key`]: AuthorizationV2Builder::sign_with_key
//! [`sign_with_saved_key`]: AuthorizationV2Builder::sign_with_saved_key
//!
//! # Examples
//!
//! ```
//! use http::Method;
//! use solarnet_auth::AuthorizationV2Builder;
//! use solarnet_core::Environment;
//!
//! let mut auth = AuthorizationV2Builder::new("my-token", Environment::default());
//! auth.save_signing_key("my-secret");
//! auth.method(Method::GET)
//!     .url("https://data.solarnetwork.net/solarquery/api/v1/sec/datum/mostRecent?nodeId=1", false)
//!     .unwrap();
//! let header = auth.build_with_saved_key().unwrap();
//! assert!(header.starts_with("SNWS2 Credential=my-token,SignedHeaders=date;host,Signature="));
//! ```

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use solarnet_core::Environment;
use solarnet_core::environment::host_with_port;
use tracing::{debug, warn};

use crate::canonical::{
    self, CONTENT_TYPE, DIGEST, HOST, X_SN_DATE, build_canonical_header_names,
    build_canonical_headers, build_canonical_query_string, build_canonical_request,
};
use crate::error::{AuthError, AuthResult};
use crate::signing::{
    SigningKey, authorization_header_value, compute_signature, compute_signature_data,
    compute_signing_key, format_http_date, sha256,
};

fn header_name(name: &str) -> AuthResult<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| AuthError::InvalidHeader {
        name: name.to_owned(),
        reason: e.to_string(),
    })
}

fn header_value(name: &str, value: &str) -> AuthResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| AuthError::InvalidHeader {
        name: name.to_owned(),
        reason: e.to_string(),
    })
}

/// The signable attributes of one HTTP request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    date: DateTime<Utc>,
    headers: HeaderMap,
    query: BTreeMap<String, Vec<String>>,
    content_digest: Option<Vec<u8>>,
    signed_header_names: Vec<String>,
}

impl RequestDescriptor {
    /// A `GET /` request dated now, with the `Host` header of `environment`.
    #[must_use]
    pub fn new(environment: &Environment) -> Self {
        let mut request = Self {
            method: Method::GET,
            path: "/".to_owned(),
            date: Utc::now(),
            headers: HeaderMap::new(),
            query: BTreeMap::new(),
            content_digest: None,
            signed_header_names: Vec::new(),
        };
        let host = environment.host_header();
        if request.host(&host).is_err() {
            warn!(host = %host, "environment host is not a valid Host header value");
        }
        request
    }

    /// Set the HTTP method.
    pub fn method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    /// Set the request path.
    pub fn path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = path.into();
        self
    }

    /// Set the request date.
    pub fn date(&mut self, date: DateTime<Utc>) -> &mut Self {
        self.date = date;
        self
    }

    /// Set the `Host` header.
    pub fn host(&mut self, host: &str) -> AuthResult<&mut Self> {
        self.header(HOST, host)
    }

    /// Set the `Content-Type` header.
    pub fn content_type(&mut self, content_type: &str) -> AuthResult<&mut Self> {
        self.header(CONTENT_TYPE, content_type)
    }

    /// Set a header, replacing any existing values. Names are case-insensitive.
    pub fn header(&mut self, name: &str, value: &str) -> AuthResult<&mut Self> {
        let value = header_value(name, value)?;
        let name = header_name(name)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Set every header in `headers`, replacing existing values of the same names.
    pub fn headers(&mut self, headers: &HeaderMap) -> &mut Self {
        for name in headers.keys() {
            self.headers.remove(name);
            for value in headers.get_all(name) {
                self.headers.append(name.clone(), value.clone());
            }
        }
        self
    }

    /// Add a query parameter value after any existing values of the same key.
    pub fn query_param(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.query.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Add every query parameter in `params`, merging with existing ones.
    pub fn query_params<K, V>(&mut self, params: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.query_param(k, v);
        }
        self
    }

    /// Configure path, query parameters and (unless `ignore_host`) host from a URL.
    ///
    /// Query parameters are merged into the existing ones. The host is taken
    /// only when the URL has one, with the port appended when it is not the
    /// scheme default. For `ws`/`wss` URLs the path is the WebSocket resource
    /// name: the path followed by `?` and the raw query, when present.
    pub fn url(&mut self, url: &str, ignore_host: bool) -> AuthResult<&mut Self> {
        let uri: Uri = url
            .parse()
            .map_err(|_| AuthError::InvalidUrl(url.to_owned()))?;
        let scheme = uri.scheme_str().unwrap_or_default().to_ascii_lowercase();

        if let Some(query) = uri.query() {
            for (k, v) in form_urlencoded::parse(query.as_bytes()) {
                self.query_param(k, v);
            }
        }

        if !ignore_host {
            if let Some(host) = uri.host() {
                let host = host_with_port(&scheme, host, uri.port_u16());
                self.host(&host)?;
            }
        }

        let path = match (scheme.as_str(), uri.query()) {
            ("ws" | "wss", Some(query)) => format!("{}?{query}", uri.path()),
            _ => uri.path().to_owned(),
        };
        Ok(self.path(path))
    }

    /// Toggle signing of `X-SN-Date` instead of `Date`.
    ///
    /// Enabling adds `X-SN-Date` to the additionally signed header names and
    /// removes any `X-SN-Date` header value: the caller sends the computed
    /// [`request_date_header_value`](Self::request_date_header_value) instead.
    /// Disabling removes it from the signed header names again.
    pub fn set_use_sn_date(&mut self, enabled: bool) -> &mut Self {
        let existing = self
            .signed_header_names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(X_SN_DATE));
        if enabled {
            if existing.is_none() {
                self.signed_header_names.push(X_SN_DATE.to_owned());
            }
            self.headers.remove(X_SN_DATE);
        } else if let Some(index) = existing {
            self.signed_header_names.remove(index);
        }
        self
    }

    /// Sign an additional header name.
    pub fn sign_header(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self
            .signed_header_names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&name))
        {
            self.signed_header_names.push(name);
        }
        self
    }

    /// Set the SHA-256 digest of the request body.
    pub fn content_sha256(&mut self, digest: impl Into<Vec<u8>>) -> &mut Self {
        self.content_digest = Some(digest.into());
        self
    }

    /// Set the SHA-256 digest of the request body from hex.
    pub fn content_sha256_hex(&mut self, digest: &str) -> AuthResult<&mut Self> {
        let bytes = hex::decode(digest.trim())
            .map_err(|_| AuthError::InvalidDigest(digest.to_owned()))?;
        Ok(self.content_sha256(bytes))
    }

    /// Digest `content`, store the digest, and set the `Digest` header to
    /// `sha-256=<base64>`. The caller must send that header with the request.
    pub fn compute_content_digest(&mut self, content: &[u8]) -> &mut Self {
        let digest = sha256(content);
        let value = format!("sha-256={}", BASE64.encode(&digest));
        // base64 output is always a valid header value
        if let Ok(value) = HeaderValue::from_str(&value) {
            self.headers.insert(DIGEST, value);
        }
        self.content_sha256(digest)
    }

    /// The HTTP method.
    #[must_use]
    pub fn http_method(&self) -> &Method {
        &self.method
    }

    /// The request path.
    #[must_use]
    pub fn request_path(&self) -> &str {
        &self.path
    }

    /// The request date.
    #[must_use]
    pub fn request_date(&self) -> &DateTime<Utc> {
        &self.date
    }

    /// The request date as an HTTP date, the value to send as `Date` or `X-SN-Date`.
    #[must_use]
    pub fn request_date_header_value(&self) -> String {
        format_http_date(&self.date)
    }

    /// The name of the date header that is signed and must be sent.
    #[must_use]
    pub fn date_header_name(&self) -> &'static str {
        if self.use_sn_date() { "X-SN-Date" } else { "Date" }
    }

    /// The request headers.
    #[must_use]
    pub fn http_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The query parameters, keyed in sorted order, values in insertion order.
    #[must_use]
    pub fn query_parameters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.query
    }

    /// The configured body digest, if any.
    #[must_use]
    pub fn content_digest(&self) -> Option<&[u8]> {
        self.content_digest.as_deref()
    }

    /// The additionally signed header names.
    #[must_use]
    pub fn signed_header_names(&self) -> &[String] {
        &self.signed_header_names
    }

    /// Whether `X-SN-Date` is signed instead of `Date`.
    #[must_use]
    pub fn use_sn_date(&self) -> bool {
        self.signed_header_names
            .iter()
            .any(|name| name.eq_ignore_ascii_case(X_SN_DATE))
    }

    /// The canonical query string.
    #[must_use]
    pub fn canonical_query_parameters(&self) -> String {
        build_canonical_query_string(&self.query)
    }

    /// The canonical headers block for the given sorted, lower-case names.
    #[must_use]
    pub fn canonical_headers(&self, names: &[String]) -> String {
        build_canonical_headers(&self.headers, names, &self.date)
    }

    /// The sorted, lower-case header names to sign.
    #[must_use]
    pub fn canonical_header_names(&self) -> Vec<String> {
        build_canonical_header_names(&self.headers, self.use_sn_date(), &self.signed_header_names)
    }

    /// The hex body digest, or the digest of the empty string.
    #[must_use]
    pub fn canonical_content_sha256(&self) -> String {
        canonical::canonical_content_sha256(self.content_digest())
    }

    /// The canonical request string.
    #[must_use]
    pub fn build_canonical_request_data(&self) -> String {
        self.canonical_request_for(&self.canonical_header_names())
    }

    pub(crate) fn canonical_request_for(&self, names: &[String]) -> String {
        build_canonical_request(
            self.method.as_str(),
            &self.path,
            &self.canonical_query_parameters(),
            &self.canonical_headers(names),
            names,
            &self.canonical_content_sha256(),
        )
    }

    /// The data to sign for this request.
    #[must_use]
    pub fn compute_signature_data(&self) -> String {
        compute_signature_data(&self.build_canonical_request_data(), &self.date)
    }
}

/// Builder of `SNWS2` `Authorization` header values.
#[derive(Debug, Clone)]
pub struct AuthorizationV2Builder {
    token_id: String,
    environment: Environment,
    signing_key: Option<SigningKey>,
    request: RequestDescriptor,
}

impl AuthorizationV2Builder {
    /// Create a builder for `token_id`, taking the `Host` from `environment`.
    #[must_use]
    pub fn new(token_id: impl Into<String>, environment: Environment) -> Self {
        let request = RequestDescriptor::new(&environment);
        Self {
            token_id: token_id.into(),
            environment,
            signing_key: None,
            request,
        }
    }

    /// A copy of this builder bound to another environment.
    ///
    /// The token ID and saved signing key are kept; the request state starts
    /// fresh with the other environment's host.
    #[must_use]
    pub fn with_environment(&self, environment: Environment) -> Self {
        Self {
            token_id: self.token_id.clone(),
            request: RequestDescriptor::new(&environment),
            environment,
            signing_key: self.signing_key.clone(),
        }
    }

    /// The security token ID.
    #[must_use]
    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    /// The environment supplying the `Host` header.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// A new, independent request descriptor for this builder's environment.
    #[must_use]
    pub fn request(&self) -> RequestDescriptor {
        RequestDescriptor::new(&self.environment)
    }

    /// The current request descriptor.
    #[must_use]
    pub fn current(&self) -> &RequestDescriptor {
        &self.request
    }

    /// Mutable access to the current request descriptor.
    pub fn current_mut(&mut self) -> &mut RequestDescriptor {
        &mut self.request
    }

    /// Clear all per-request state, keeping the saved signing key.
    ///
    /// The method becomes `GET`, the path `/`, the date now; headers, query
    /// parameters, content digest and additionally signed header names are
    /// cleared, and the `Host` header is re-applied from the environment.
    pub fn reset(&mut self) -> &mut Self {
        self.request = RequestDescriptor::new(&self.environment);
        self
    }

    /// Set the HTTP method.
    pub fn method(&mut self, method: Method) -> &mut Self {
        self.request.method(method);
        self
    }

    /// Set the request path.
    pub fn path(&mut self, path: impl Into<String>) -> &mut Self {
        self.request.path(path);
        self
    }

    /// Set the request date.
    pub fn date(&mut self, date: DateTime<Utc>) -> &mut Self {
        self.request.date(date);
        self
    }

    /// Set the `Host` header.
    pub fn host(&mut self, host: &str) -> AuthResult<&mut Self> {
        self.request.host(host)?;
        Ok(self)
    }

    /// Set the `Content-Type` header.
    pub fn content_type(&mut self, content_type: &str) -> AuthResult<&mut Self> {
        self.request.content_type(content_type)?;
        Ok(self)
    }

    /// Set a header, replacing any existing values.
    pub fn header(&mut self, name: &str, value: &str) -> AuthResult<&mut Self> {
        self.request.header(name, value)?;
        Ok(self)
    }

    /// Set every header in `headers`.
    pub fn headers(&mut self, headers: &HeaderMap) -> &mut Self {
        self.request.headers(headers);
        self
    }

    /// Add query parameters, merging with existing ones.
    pub fn query_params<K, V>(&mut self, params: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.request.query_params(params);
        self
    }

    /// Configure path, query parameters and host from a URL.
    pub fn url(&mut self, url: &str, ignore_host: bool) -> AuthResult<&mut Self> {
        self.request.url(url, ignore_host)?;
        Ok(self)
    }

    /// Toggle signing of `X-SN-Date` instead of `Date`.
    pub fn set_use_sn_date(&mut self, enabled: bool) -> &mut Self {
        self.request.set_use_sn_date(enabled);
        self
    }

    /// Whether `X-SN-Date` is signed instead of `Date`.
    #[must_use]
    pub fn use_sn_date(&self) -> bool {
        self.request.use_sn_date()
    }

    /// Sign an additional header name.
    pub fn sign_header(&mut self, name: impl Into<String>) -> &mut Self {
        self.request.sign_header(name);
        self
    }

    /// Set the SHA-256 digest of the request body.
    pub fn content_sha256(&mut self, digest: impl Into<Vec<u8>>) -> &mut Self {
        self.request.content_sha256(digest);
        self
    }

    /// Set the SHA-256 digest of the request body from hex.
    pub fn content_sha256_hex(&mut self, digest: &str) -> AuthResult<&mut Self> {
        self.request.content_sha256_hex(digest)?;
        Ok(self)
    }

    /// Digest `content` and set the `Digest` header.
    pub fn compute_content_digest(&mut self, content: &[u8]) -> &mut Self {
        self.request.compute_content_digest(content);
        self
    }

    /// The current request date as an HTTP date.
    #[must_use]
    pub fn request_date_header_value(&self) -> String {
        self.request.request_date_header_value()
    }

    /// The canonical request string of the current request.
    #[must_use]
    pub fn build_canonical_request_data(&self) -> String {
        self.request.build_canonical_request_data()
    }

    /// Derive the signing key from `secret` for the current request date.
    #[must_use]
    pub fn compute_signing_key(&self, secret: &str) -> Vec<u8> {
        compute_signing_key(secret, &self.request.date)
    }

    /// Derive and save the signing key for the current request date.
    ///
    /// The key expires seven days after that date, at midnight UTC.
    pub fn save_signing_key(&mut self, secret: &str) -> &mut Self {
        let key = self.compute_signing_key(secret);
        self.signing_key = Some(SigningKey::new(key, &self.request.date));
        self
    }

    /// Install an externally obtained signing key issued for `date`.
    pub fn set_signing_key(&mut self, key: impl Into<Vec<u8>>, date: &DateTime<Utc>) -> &mut Self {
        self.signing_key = Some(SigningKey::new(key, date));
        self
    }

    /// The saved signing key, if any.
    #[must_use]
    pub fn signing_key(&self) -> Option<&SigningKey> {
        self.signing_key.as_ref()
    }

    /// Whether a saved signing key exists and has not expired.
    #[must_use]
    pub fn signing_key_valid(&self) -> bool {
        self.signing_key_valid_at(&Utc::now())
    }

    /// Whether a saved signing key exists and is valid at `now`.
    #[must_use]
    pub fn signing_key_valid_at(&self, now: &DateTime<Utc>) -> bool {
        self.signing_key.as_ref().is_some_and(|k| k.is_valid_at(now))
    }

    /// Sign the current request with a key derived from `secret`, without
    /// saving the key.
    #[must_use]
    pub fn build(&self, secret: &str) -> String {
        let key = self.compute_signing_key(secret);
        self.build_with_key(&key)
    }

    /// Sign the current request with `signing_key`.
    #[must_use]
    pub fn build_with_key(&self, signing_key: &[u8]) -> String {
        self.sign_with_key(&self.request, signing_key)
    }

    /// Sign the current request with the saved signing key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingSigningKey`] if no key was saved.
    pub fn build_with_saved_key(&self) -> AuthResult<String> {
        self.sign_with_saved_key(&self.request)
    }

    /// Sign `request` with `signing_key`.
    #[must_use]
    pub fn sign_with_key(&self, request: &RequestDescriptor, signing_key: &[u8]) -> String {
        let names = request.canonical_header_names();
        let canonical_request = request.canonical_request_for(&names);
        debug!(canonical_request, "Built SNWS2 canonical request");

        let signature_data = compute_signature_data(&canonical_request, request.request_date());
        debug!(signature_data, "Built SNWS2 signature data");

        let signature = compute_signature(signing_key, &signature_data);
        authorization_header_value(&self.token_id, &names, &signature)
    }

    /// Sign `request` with the saved signing key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingSigningKey`] if no key was saved.
    pub fn sign_with_saved_key(&self, request: &RequestDescriptor) -> AuthResult<String> {
        let key = self
            .signing_key
            .as_ref()
            .ok_or(AuthError::MissingSigningKey)?;
        Ok(self.sign_with_key(request, key.as_bytes()))
    }
}
